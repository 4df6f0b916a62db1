use crate::document::CellRecord;
use crate::document::CellValue;
use crate::spreadsheet::reference::index_to_reference;
use chrono::DateTime;
use chrono::Duration;
use chrono::NaiveDate;
use chrono::NaiveDateTime;
use chrono::NaiveTime;
use iso8601_duration::Duration as IsoDuration;

/// Output format of every date, time, and datetime value
const ISO_DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// Largest serial number Excel accepts (9999-12-31)
const MAX_SERIAL: f64 = 2_958_466.0;

const MILLISECONDS_PER_DAY: f64 = 86_400_000.0;

/// Types of cell data in spreadsheet files.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub(crate) enum CellType {
    #[default]
    Empty,
    /// Boolean values (true/false)
    Boolean,
    /// Numeric values
    Number,
    /// Numeric values shown as percentages
    NumberPercent,
    /// Date/time values stored as numbers from 1900 epoch
    NumberDateTime1900,
    /// Date values stored as numbers from 1900 epoch
    NumberDate1900,
    /// Time values stored as numbers from 1900 epoch
    NumberTime1900,
    /// Date/time values stored as numbers from 1904 epoch
    NumberDateTime1904,
    /// Date values stored as numbers from 1904 epoch
    NumberDate1904,
    /// Time values stored as numbers from 1904 epoch
    NumberTime1904,
    /// ISO 8601 date/time strings
    IsoDateTime,
    /// ISO 8601 duration strings
    IsoDuration,
    /// Inline string values
    InlineString,
    /// Shared string table references
    SharedString,
    /// Formula errors such as `#DIV/0!` or `#N/A`.
    /// The literal is kept as a text value and as the display text, no numeric error code is stored.
    Error,
}

impl CellType {
    /// Parses built-in Excel number format IDs to determine cell type.
    pub(crate) fn parse_builtin_number_format_id(id: &str, is_1904: bool) -> Option<Self> {
        match id {
            "9" | "10" => Some(Self::NumberPercent),
            "22" => Some(if is_1904 { Self::NumberDateTime1904 } else { Self::NumberDateTime1900 }),
            "14" | "15" | "16" | "17" => Some(if is_1904 { Self::NumberDate1904 } else { Self::NumberDate1900 }),
            "18" | "19" | "20" | "21" | "45" | "46" | "47" => Some(if is_1904 { Self::NumberTime1904 } else { Self::NumberTime1900 }),
            _ => None,
        }
    }

    /// Parses custom number format strings to determine cell type.
    /// Analyzes format codes for date/time and percent patterns.
    pub(crate) fn parse_custom_number_format(format: &str, is_1904: bool) -> Self {
        let mut is_escaped = false;
        let mut is_literal = false;
        let mut is_date = false;
        let mut is_time = false;
        let mut is_color = false;
        let mut is_percent = false;
        for character in format.chars() {
            match character {
                _ if is_escaped => is_escaped = false,
                '_' | '\\' if !is_escaped => is_escaped = true,

                '"' if is_literal => is_literal = false,
                '"' if !is_literal && !is_color => is_literal = true,

                ']' if is_color => is_color = false,
                '[' if !is_color && !is_literal => is_color = true,
                _ if is_literal || is_color => (),

                'Y' | 'y' | 'D' | 'd' => is_date = true,
                'H' | 'h' | 'S' | 's' => is_time = true,
                '%' => is_percent = true,
                _ => (),
            }
        }

        match (is_date, is_time, is_1904) {
            (true, true, false) => Self::NumberDateTime1900,
            (true, true, true) => Self::NumberDateTime1904,
            (true, false, false) => Self::NumberDate1900,
            (true, false, true) => Self::NumberDate1904,
            (false, true, false) => Self::NumberTime1900,
            (false, true, true) => Self::NumberTime1904,
            (false, false, _) if is_percent => Self::NumberPercent,
            (false, false, _) => Self::Number,
        }
    }

    /// Returns true for values holding text, which are the only ones that can name a column.
    pub(crate) fn is_text(&self) -> bool {
        matches!(self, Self::InlineString | Self::SharedString)
    }
}

/// Represents a single cell in a spreadsheet with position, type, and value.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct Cell {
    /// Row index (0-based)
    pub(crate) row: usize,
    /// Column index (0-based)
    pub(crate) col: usize,
    /// Cell data type
    pub(crate) kind: CellType,
    /// Cell value as string
    pub(crate) value: String,
    /// Formula text without the leading `=`
    pub(crate) formula: Option<String>,
    /// Formatted text stored by the source file
    pub(crate) display: Option<String>,
    pub(crate) hyperlink: Option<String>,
}

impl Cell {
    /// Creates a cell without formula, display text, or hyperlink.
    pub(crate) fn new(row: usize, col: usize, kind: CellType, value: impl Into<String>) -> Self {
        Cell {
            row,
            col,
            kind,
            value: value.into(),
            ..Cell::default()
        }
    }

    /// Returns the Excel-style cell reference (e.g., "A1", "B2").
    pub(crate) fn reference(&self) -> String {
        index_to_reference(self.row, self.col)
    }

    /// Converts cell value to boolean (1 or true = true, other = false).
    pub(crate) fn to_boolean(&self) -> bool {
        self.value == "1" || self.value.eq_ignore_ascii_case("true")
    }

    /// Converts cell value to a finite double-precision floating point.
    pub(crate) fn to_double(&self) -> Result<f64, String> {
        self.value
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|number| number.is_finite())
            .ok_or_else(|| format!("parse '{}' to number failed", self.value))
    }

    /// Converts date and time cells to a timestamp.
    /// Time-only values land on the spreadsheet epoch day 1899-12-30.
    pub(crate) fn to_datetime(&self) -> Result<NaiveDateTime, String> {
        let datetime = match self.kind {
            CellType::NumberDateTime1900 | CellType::NumberDate1900 => serial_to_datetime(self.to_double()?, false),
            CellType::NumberDateTime1904 | CellType::NumberDate1904 => serial_to_datetime(self.to_double()?, true),
            CellType::NumberTime1900 | CellType::NumberTime1904 => time_to_datetime(self.to_double()?),
            CellType::IsoDateTime => parse_iso_datetime(&self.value),
            CellType::IsoDuration => parse_iso_duration(&self.value),
            _ => None,
        };
        datetime.ok_or_else(|| format!("parse '{}' to datetime failed", self.value))
    }

    /// Converts the cell to its decoded value. Dates become ISO-8601 text, errors keep their literal.
    pub(crate) fn to_value(&self) -> Result<CellValue, String> {
        let value = match self.kind {
            CellType::Boolean => CellValue::Boolean(self.to_boolean()),
            CellType::Number | CellType::NumberPercent => CellValue::Number(self.to_double()?),
            CellType::NumberDateTime1900 | CellType::NumberDate1900 | CellType::NumberTime1900 |
            CellType::NumberDateTime1904 | CellType::NumberDate1904 | CellType::NumberTime1904 |
            CellType::IsoDateTime | CellType::IsoDuration => {
                CellValue::Text(self.to_datetime()?.format(ISO_DATETIME_FORMAT).to_string())
            }
            CellType::Empty | CellType::InlineString | CellType::SharedString | CellType::Error => {
                CellValue::Text(self.value.to_owned())
            }
        };
        Ok(value)
    }

    /// Human readable text of the cell: the stored display text when the file has one,
    /// otherwise rendered from the value.
    pub(crate) fn to_display_text(&self, value: &CellValue) -> Result<String, String> {
        if let Some(display) = &self.display {
            return Ok(display.to_owned());
        }
        let text = match (self.kind, value) {
            (_, CellValue::Boolean(boolean)) => if *boolean { "TRUE" } else { "FALSE" }.to_owned(),
            (CellType::NumberPercent, CellValue::Number(number)) => format!("{}%", to_general_string(number * 100.0)),
            (_, CellValue::Number(number)) => to_general_string(*number),
            (CellType::NumberDate1900 | CellType::NumberDate1904, _) => self.to_datetime()?.format("%Y-%m-%d").to_string(),
            (CellType::NumberTime1900 | CellType::NumberTime1904 | CellType::IsoDuration, _) => {
                self.to_datetime()?.format("%H:%M:%S").to_string()
            }
            (CellType::IsoDateTime, _) if !self.value.contains('T') => self.to_datetime()?.format("%Y-%m-%d").to_string(),
            (CellType::NumberDateTime1900 | CellType::NumberDateTime1904 | CellType::IsoDateTime, _) => {
                self.to_datetime()?.format("%Y-%m-%d %H:%M:%S").to_string()
            }
            (_, CellValue::Text(text)) => text.to_owned(),
        };
        Ok(text)
    }

    /// Builds the document record of this cell.
    pub(crate) fn to_record(&self) -> Result<CellRecord, String> {
        let value = self.to_value()?;
        let display_text = self.to_display_text(&value)?;
        Ok(CellRecord {
            value,
            display_text: Some(display_text),
            formula: self.formula.to_owned(),
            hyperlink: self.hyperlink.to_owned(),
        })
    }
}

fn spreadsheet_epoch() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(1899, 12, 30).expect("NaiveDate Literal").and_time(NaiveTime::MIN)
}

/// Converts an Excel serial number to a timestamp.
/// The 1900 date system counts a nonexistent 1900-02-29 (Lotus 1-2-3 bug), so serials before 60 move one day.
pub(crate) fn serial_to_datetime(serial: f64, is_1904: bool) -> Option<NaiveDateTime> {
    if !serial.is_finite() || serial.abs() > MAX_SERIAL {
        return None;
    }
    let days = serial.floor();
    let adjust = if is_1904 {
        1_462
    } else if days < 60.0 {
        1
    } else {
        0
    };
    let milliseconds = ((serial - days) * MILLISECONDS_PER_DAY).round() as i64;
    spreadsheet_epoch()
        .checked_add_signed(Duration::days(days as i64 + adjust))?
        .checked_add_signed(Duration::milliseconds(milliseconds))
}

/// Converts an Excel time fraction to a timestamp on the epoch day.
pub(crate) fn time_to_datetime(fraction: f64) -> Option<NaiveDateTime> {
    if !fraction.is_finite() || fraction.abs() > MAX_SERIAL {
        return None;
    }
    let milliseconds = (fraction * MILLISECONDS_PER_DAY).round() as i64;
    spreadsheet_epoch().checked_add_signed(Duration::milliseconds(milliseconds))
}

/// Parses ISO dates (`2024-01-15`), local datetimes (`2024-01-15T10:30:00`), and offset datetimes.
/// Offset datetimes are converted to UTC.
fn parse_iso_datetime(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    if let Ok(datetime) = DateTime::parse_from_rfc3339(value) {
        return Some(datetime.naive_utc());
    }
    let value = value.trim_end_matches('Z');
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M"))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .ok()
                .map(|date| date.and_time(NaiveTime::MIN))
        })
}

/// Parses ISO durations (`PT10H30M15S`) to a timestamp on the epoch day.
fn parse_iso_duration(value: &str) -> Option<NaiveDateTime> {
    let duration = value.trim().parse::<IsoDuration>().ok()?;
    let hours = duration.day as f64 * 24.0 + duration.hour as f64;
    let seconds = (hours * 60.0 + duration.minute as f64) * 60.0 + duration.second as f64;
    time_to_datetime(seconds / 86_400.0)
}

/// Formats a number the way the "General" number format shows it:
/// at most 11 significant digits, integers without a fraction, scientific notation outside 1e-9..1e11.
pub(crate) fn to_general_string(number: f64) -> String {
    if number == 0.0 {
        return "0".to_owned();
    }
    let magnitude = number.abs();
    if (1e-9..1e11).contains(&magnitude) {
        let rounded = format!("{number:.10e}").parse::<f64>().unwrap_or(number);
        format!("{rounded}")
    } else {
        let scientific = format!("{number:.5e}");
        let (mantissa, exponent) = scientific.split_once('e').unwrap_or((&scientific, "0"));
        let mantissa = if mantissa.contains('.') {
            mantissa.trim_end_matches('0').trim_end_matches('.')
        } else {
            mantissa
        };
        let exponent = exponent.parse::<i32>().unwrap_or(0);
        let sign = if exponent < 0 { '-' } else { '+' };
        format!("{mantissa}E{sign}{:02}", exponent.abs())
    }
}
