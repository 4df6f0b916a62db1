use crate::document::RowRecord;
use crate::document::SheetRecord;
use crate::error::DecodeError;
use crate::spreadsheet::cell::Cell;
use crate::spreadsheet::reference::CellRange;
use crate::spreadsheet::SpreadsheetError;
use std::collections::BTreeMap;

/// Represents a sheet read from a spreadsheet file, cells keyed by (row, col).
#[derive(Debug)]
pub(crate) struct Sheet {
    /// Sheet name
    pub(crate) name: String,
    /// All cells holding a value
    cells: BTreeMap<(usize, usize), Cell>,
    /// Bounding box of the cells, `None` while the sheet is empty
    bounds: Option<CellRange>,
}

impl Sheet {
    /// Creates a new empty sheet.
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            cells: BTreeMap::new(),
            bounds: None,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.cells.len()
    }

    /// Adds a cell to the sheet, a later cell at the same position replaces the earlier one.
    pub(crate) fn push(&mut self, cell: Cell) {
        match &mut self.bounds {
            Some(bounds) => bounds.extend(cell.row, cell.col),
            None => self.bounds = Some(CellRange::cell(cell.row, cell.col)),
        }
        self.cells.insert((cell.row, cell.col), cell);
    }

    /// Attaches a hyperlink target to every cell inside the range.
    pub(crate) fn link(&mut self, range: &CellRange, target: &str) {
        let lower = (range.row_lower_bound, range.col_lower_bound);
        let upper = (range.row_upper_bound, range.col_upper_bound);
        self.cells
            .range_mut(lower..=upper)
            .filter(|((_, col), _)| (range.col_lower_bound..=range.col_upper_bound).contains(col))
            .for_each(|(_, cell)| cell.hyperlink = Some(target.to_owned()));
    }

    /// Column names from the header row (row 0), in column order.
    /// Only non-empty text cells name a column.
    pub(crate) fn header(&self) -> Vec<(usize, &str)> {
        self.cells
            .range((0, 0)..(1, 0))
            .map(|(_, cell)| cell)
            .filter(|cell| cell.kind.is_text() && !cell.value.is_empty())
            .map(|cell| (cell.col, cell.value.as_str()))
            .collect()
    }

    /// Converts the sheet to its document record.
    ///
    /// Data rows run from the row after the header (or the first occupied row, whichever is later)
    /// through the last occupied row. Rows without populated cells stay as empty records.
    pub(crate) fn into_record(self) -> Result<SheetRecord, DecodeError> {
        let Some(bounds) = self.bounds else {
            return Ok(SheetRecord {
                name: self.name,
                rows: Vec::new(),
            });
        };

        let header = self.header();
        let mut rows = Vec::new();
        for row in bounds.row_lower_bound.max(1)..=bounds.row_upper_bound {
            let mut record = RowRecord::new();
            for (col, name) in &header {
                if let Some(cell) = self.cells.get(&(row, *col)) {
                    let cell_record = cell.to_record().map_err(|message| {
                        SpreadsheetError::CellValueError(self.name.to_owned(), cell.reference(), message)
                    })?;
                    record.insert(*name, cell_record);
                }
            }
            rows.push(record);
        }

        Ok(SheetRecord {
            name: self.name.to_owned(),
            rows,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::CellValue;
    use crate::spreadsheet::cell::CellType;

    fn push(sheet: &mut Sheet, row: usize, col: usize, kind: CellType, value: &str) {
        sheet.push(Cell::new(row, col, kind, value));
    }

    #[test]
    fn sheet_initial() {
        let sheet = Sheet::new("Sheet1");
        assert_eq!(sheet.len(), 0);
        assert_eq!(sheet.bounds, None);
        assert!(sheet.into_record().unwrap().rows.is_empty());
    }

    #[test]
    fn sheet_update_bounds() {
        let mut sheet = Sheet::new("Sheet1");
        push(&mut sheet, 1, 1, CellType::Number, "1");
        push(&mut sheet, 1, 3, CellType::Number, "2");
        push(&mut sheet, 3, 1, CellType::Number, "3");
        push(&mut sheet, 3, 3, CellType::Number, "4");
        push(&mut sheet, 3, 3, CellType::Number, "5");

        assert_eq!(sheet.len(), 4);
        assert_eq!(sheet.bounds, Some(CellRange {
            row_lower_bound: 1,
            row_upper_bound: 3,
            col_lower_bound: 1,
            col_upper_bound: 3,
        }));
    }

    #[test]
    fn header_uses_text_cells_only() {
        let mut sheet = Sheet::new("Sheet1");
        push(&mut sheet, 0, 0, CellType::SharedString, "Name");
        push(&mut sheet, 0, 1, CellType::Number, "2024");
        push(&mut sheet, 0, 2, CellType::InlineString, "  ");
        push(&mut sheet, 0, 3, CellType::InlineString, "Age");
        push(&mut sheet, 0, 4, CellType::Boolean, "1");
        push(&mut sheet, 0, 6, CellType::SharedString, "");
        push(&mut sheet, 1, 0, CellType::SharedString, "Ann");
        push(&mut sheet, 1, 1, CellType::Number, "7");
        push(&mut sheet, 1, 3, CellType::Number, "30");
        push(&mut sheet, 1, 5, CellType::Number, "99");

        assert_eq!(sheet.header(), vec![(0, "Name"), (2, "  "), (3, "Age")]);
        let record = sheet.into_record().unwrap();
        assert_eq!(record.rows.len(), 1);
        let row = &record.rows[0];
        assert_eq!(row.columns().collect::<Vec<_>>(), vec!["Name", "Age"]);
        assert_eq!(row.get("Age").unwrap().value, CellValue::Number(30.0));
    }

    #[test]
    fn empty_strings_populate_columns() {
        let mut sheet = Sheet::new("Sheet1");
        push(&mut sheet, 0, 0, CellType::SharedString, "A");
        push(&mut sheet, 0, 1, CellType::SharedString, "B");
        push(&mut sheet, 1, 0, CellType::SharedString, "x");
        push(&mut sheet, 1, 1, CellType::InlineString, "");

        let record = sheet.into_record().unwrap();
        assert_eq!(record.rows[0].len(), 2);
        assert_eq!(record.rows[0].get("B").unwrap().value, CellValue::Text(String::new()));
    }

    #[test]
    fn empty_rows_are_kept() {
        let mut sheet = Sheet::new("Sheet1");
        push(&mut sheet, 0, 0, CellType::SharedString, "A");
        push(&mut sheet, 1, 0, CellType::Number, "1");
        push(&mut sheet, 3, 0, CellType::Number, "3");

        let record = sheet.into_record().unwrap();
        assert_eq!(record.rows.len(), 3);
        assert!(record.rows[1].is_empty());
    }

    #[test]
    fn sheet_without_header_row() {
        let mut sheet = Sheet::new("Sheet1");
        push(&mut sheet, 2, 0, CellType::Number, "1");
        push(&mut sheet, 3, 0, CellType::Number, "2");

        let record = sheet.into_record().unwrap();
        assert_eq!(record.rows.len(), 2);
        assert!(record.rows.iter().all(RowRecord::is_empty));
    }

    #[test]
    fn header_only_sheet() {
        let mut sheet = Sheet::new("Sheet1");
        push(&mut sheet, 0, 0, CellType::SharedString, "A");
        assert!(sheet.into_record().unwrap().rows.is_empty());
    }

    #[test]
    fn link_cells_in_range() {
        let mut sheet = Sheet::new("Sheet1");
        push(&mut sheet, 0, 0, CellType::SharedString, "A");
        push(&mut sheet, 0, 1, CellType::SharedString, "B");
        push(&mut sheet, 1, 0, CellType::SharedString, "a");
        push(&mut sheet, 1, 1, CellType::SharedString, "b");
        push(&mut sheet, 2, 0, CellType::SharedString, "c");
        sheet.link(&CellRange::try_from("B1:B3").unwrap(), "https://example.com");

        let record = sheet.into_record().unwrap();
        assert_eq!(record.rows[0].get("A").unwrap().hyperlink, None);
        assert_eq!(record.rows[0].get("B").unwrap().hyperlink.as_deref(), Some("https://example.com"));
        assert_eq!(record.rows[1].get("A").unwrap().hyperlink, None);
    }

    #[test]
    fn invalid_value_names_sheet_and_cell() {
        let mut sheet = Sheet::new("Data");
        push(&mut sheet, 0, 0, CellType::SharedString, "A");
        push(&mut sheet, 1, 0, CellType::Number, "x1");
        let error = sheet.into_record().unwrap_err();
        assert_eq!(error.to_string(), "Invalid cell value at 'Data'!A2: parse 'x1' to number failed");
    }
}
