//! Removal of sparse rows (notes, subtotals, stray cells) from decoded sheets.
use crate::document::SheetRecord;
use crate::document::WorkbookDocument;
use tracing::debug;

/// A row is kept when it populates at least this share of the widest row of its sheet.
pub const MIN_COLUMN_VALUE_RATIO: f64 = 0.5;

/// Drops rows whose populated column count is below [`MIN_COLUMN_VALUE_RATIO`] of the
/// widest row in the same sheet. Returns the document unchanged when `enabled` is false.
///
/// Sheet order, sheet names, and the order of kept rows are preserved.
pub fn smart_cleanup(document: WorkbookDocument, enabled: bool) -> WorkbookDocument {
    if !enabled {
        return document;
    }
    WorkbookDocument::new(document.sheets.into_iter().map(cleanup_sheet).collect())
}

fn cleanup_sheet(sheet: SheetRecord) -> SheetRecord {
    let max_columns = sheet.rows.iter().map(|row| row.len()).max().unwrap_or(0);
    if max_columns == 0 {
        return sheet;
    }

    let total = sheet.rows.len();
    let rows: Vec<_> = sheet
        .rows
        .into_iter()
        .filter(|row| row.len() as f64 / max_columns as f64 >= MIN_COLUMN_VALUE_RATIO)
        .collect();
    debug!(sheet = %sheet.name, kept = rows.len(), dropped = total - rows.len(), "cleaned sheet");
    SheetRecord {
        name: sheet.name,
        rows,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::CellRecord;
    use crate::document::CellValue;
    use crate::document::RowRecord;

    fn row(columns: &[&str]) -> RowRecord {
        let mut row = RowRecord::new();
        for column in columns {
            row.insert(*column, CellRecord::new(CellValue::Text((*column).to_owned())));
        }
        row
    }

    fn document(rows: Vec<RowRecord>) -> WorkbookDocument {
        WorkbookDocument::new(vec![SheetRecord {
            name: "Sheet1".to_owned(),
            rows,
        }])
    }

    #[test]
    fn keeps_rows_at_threshold() {
        let cleaned = smart_cleanup(document(vec![
            row(&["A", "B", "C", "D"]),
            row(&["A", "B"]),
            row(&["A"]),
            row(&[]),
        ]), true);
        let counts: Vec<_> = cleaned.sheets[0].rows.iter().map(RowRecord::len).collect();
        assert_eq!(counts, vec![4, 2]);
    }

    #[test]
    fn name_and_age_scenario() {
        let cleaned = smart_cleanup(document(vec![
            row(&["Name", "Age"]),
            row(&["Name"]),
            row(&[]),
        ]), true);
        let counts: Vec<_> = cleaned.sheets[0].rows.iter().map(RowRecord::len).collect();
        assert_eq!(counts, vec![2, 1]);
    }

    #[test]
    fn disabled_is_identity() {
        let original = document(vec![row(&["A", "B", "C"]), row(&[])]);
        assert_eq!(smart_cleanup(original.clone(), false), original);
    }

    #[test]
    fn all_empty_rows_are_kept() {
        let original = document(vec![row(&[]), row(&[])]);
        assert_eq!(smart_cleanup(original.clone(), true), original);
    }

    #[test]
    fn sheets_are_cleaned_independently() {
        let mut input = document(vec![row(&["A", "B", "C"]), row(&["A"])]);
        input.sheets.push(SheetRecord {
            name: "Narrow".to_owned(),
            rows: vec![row(&["A"]), row(&["B"])],
        });
        let cleaned = smart_cleanup(input, true);
        assert_eq!(cleaned.sheets[0].rows.len(), 1);
        assert_eq!(cleaned.sheets[1].rows.len(), 2);
        assert_eq!(cleaned.sheets[1].name, "Narrow");
    }
}
