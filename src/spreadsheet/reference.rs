//! Excel-style A1 references and ranges
use crate::error::DecodeError;
use crate::spreadsheet::SpreadsheetError;
use regex::Regex;
use std::sync::LazyLock;

static RANGE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\$?([A-Z]{1,3})\$?(\d+)(?::\$?([A-Z]{1,3})\$?(\d+))?$").expect("Hardcode regex pattern")
});

/// Rows of a worksheet (1048576)
pub(crate) const MAX_ROWS: usize = 1 << 20;
/// Columns of a worksheet (16384, `XFD`)
pub(crate) const MAX_COLUMNS: usize = 1 << 14;

/// Converts column letters to a 0-based column index (A = 0, Z = 25, AA = 26).
/// Columns past `XFD` are rejected.
pub(crate) fn col_to_index(letters: &str) -> Option<usize> {
    if letters.is_empty() || letters.len() > 3 || !letters.bytes().all(|byte| byte.is_ascii_alphabetic()) {
        return None;
    }
    letters
        .bytes()
        .map(|byte| (byte.to_ascii_uppercase() - b'A') as usize + 1)
        .reduce(|index, digit| index * 26 + digit)
        .map(|col| col - 1)
        .filter(|col| *col < MAX_COLUMNS)
}

/// Converts a 1-based row number to a 0-based row index.
/// Rows past 1048576 are rejected.
pub(crate) fn row_to_index(digits: &str) -> Option<usize> {
    digits
        .parse::<usize>()
        .ok()
        .filter(|row| (1..=MAX_ROWS).contains(row))
        .map(|row| row - 1)
}

/// Converts a 0-based column index to column letters.
pub(crate) fn index_to_col(col: usize) -> String {
    let mut col = col + 1;
    let mut letters = Vec::new();
    while col > 0 {
        col -= 1;
        letters.push(b'A' + (col % 26) as u8);
        col /= 26;
    }
    letters.reverse();
    String::from_utf8(letters).expect("ASCII letters")
}

/// Converts 0-based indexes to an A1 reference such as "B3".
pub(crate) fn index_to_reference(row: usize, col: usize) -> String {
    format!("{}{}", index_to_col(col), row + 1)
}

/// Parses an A1 reference such as "B3" or "$B$3" to 0-based (row, col) indexes.
pub(crate) fn reference_to_index(reference: &str) -> Option<(usize, usize)> {
    let reference = reference.replace('$', "");
    let split = reference.find(|c: char| c.is_ascii_digit())?;
    let (letters, digits) = reference.split_at(split);
    Some((row_to_index(digits)?, col_to_index(letters)?))
}

/// A rectangular block of cells, bounds are 0-based and inclusive.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct CellRange {
    pub(crate) row_lower_bound: usize,
    pub(crate) row_upper_bound: usize,
    pub(crate) col_lower_bound: usize,
    pub(crate) col_upper_bound: usize,
}

impl CellRange {
    /// A range covering a single cell
    pub(crate) fn cell(row: usize, col: usize) -> Self {
        CellRange {
            row_lower_bound: row,
            row_upper_bound: row,
            col_lower_bound: col,
            col_upper_bound: col,
        }
    }

    /// Grows the range so that it covers the given cell.
    pub(crate) fn extend(&mut self, row: usize, col: usize) {
        self.row_lower_bound = self.row_lower_bound.min(row);
        self.row_upper_bound = self.row_upper_bound.max(row);
        self.col_lower_bound = self.col_lower_bound.min(col);
        self.col_upper_bound = self.col_upper_bound.max(col);
    }
}

impl TryFrom<&str> for CellRange {
    type Error = DecodeError;

    /// Parses "A1" or "B2:C5" (absolute markers allowed, case-insensitive).
    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let upper = value.trim().to_ascii_uppercase();
        let invalid = || SpreadsheetError::InvalidRange(value.to_owned());
        let captures = RANGE_PATTERN.captures(&upper).ok_or_else(invalid)?;
        let col_lower = col_to_index(&captures[1]).ok_or_else(invalid)?;
        let row_lower = row_to_index(&captures[2]).ok_or_else(invalid)?;
        let (row_upper, col_upper) = match (captures.get(3), captures.get(4)) {
            (Some(col), Some(row)) => (
                row_to_index(row.as_str()).ok_or_else(invalid)?,
                col_to_index(col.as_str()).ok_or_else(invalid)?,
            ),
            _ => (row_lower, col_lower),
        };
        Ok(CellRange {
            row_lower_bound: row_lower.min(row_upper),
            row_upper_bound: row_lower.max(row_upper),
            col_lower_bound: col_lower.min(col_upper),
            col_upper_bound: col_lower.max(col_upper),
        })
    }
}
