use crate::error::DecodeError;
use crate::helpers::xml::AttributeLookup;
use crate::helpers::xml::PushXmlText;
use crate::helpers::zip::ZipHelper;
use crate::match_xml_events;
use crate::spreadsheet::cell::Cell;
use crate::spreadsheet::cell::CellType;
use crate::spreadsheet::formula::normalize_ods_formula;
use crate::spreadsheet::reference::index_to_reference;
use crate::spreadsheet::reference::MAX_COLUMNS;
use crate::spreadsheet::reference::MAX_ROWS;
use crate::spreadsheet::sheet::Sheet;
use crate::spreadsheet::Spreadsheet;
use crate::spreadsheet::SpreadsheetError;
use quick_xml::events::Event;
use quick_xml::name::QName;
use std::io::Read;
use std::io::Seek;
use thiserror::Error;
use tracing::debug;
use zip::ZipArchive;

/// ODS file MIME type identifier
const MIME_TYPE: &[u8] = b"application/vnd.oasis.opendocument.spreadsheet";
/// XML element name for table (sheet)
const TABLE: QName = QName(b"table:table");
/// XML element name for table row
const TABLE_ROW: QName = QName(b"table:table-row");
/// XML element name for table cell
const TABLE_CELL: QName = QName(b"table:table-cell");
/// XML element name for covered table cell (merged cells)
const TABLE_COVERED_CELL: QName = QName(b"table:covered-table-cell");
/// XML element name for annotations (comments)
const ANNOTATION: QName = QName(b"office:annotation");
/// XML element name for paragraph text
const PARAGRAPH: QName = QName(b"text:p");
/// XML element name for string (space) text
const STRING: QName = QName(b"text:s");
/// XML element name for tab characters
const TAB: QName = QName(b"text:tab");
/// XML element name for line breaks inside a paragraph
const LINE_BREAK: QName = QName(b"text:line-break");
/// XML element name for hyperlinks
const LINK: QName = QName(b"text:a");
/// Most cells a single repeated cell may expand to
const MAX_REPEATED_CELLS: usize = 1 << 16;

/// Error types specific to ODS spreadsheet processing
#[derive(Error, Debug)]
pub enum OdsError {
    /// Invalid ODS MIME type detected in file
    #[error("Invalid ODS MIME type")]
    MimeTypeError,
}

/// ODS spreadsheet handler for reading OpenDocument Spreadsheet archives
pub(crate) struct OdsSpreadsheet<RS: Read + Seek> {
    /// ZIP archive containing the ODS file contents
    zip: ZipArchive<RS>,
}

impl<RS: Read + Seek> OdsSpreadsheet<RS> {
    /// Validates the format of an ODS archive
    ///
    /// # Arguments
    /// * `zip` - Archive holding an OpenDocument spreadsheet
    ///
    /// # Returns
    /// * `Result<Self, DecodeError>` - ODS spreadsheet instance or error
    pub(crate) fn open(mut zip: ZipArchive<RS>) -> Result<Self, DecodeError> {
        check_mime(&mut zip)?;
        if is_password_protected(&mut zip)? {
            Err(SpreadsheetError::SpreadsheetPasswordProtectedError)?;
        }
        Ok(OdsSpreadsheet { zip })
    }
}

impl<RS: Read + Seek> Spreadsheet for OdsSpreadsheet<RS> {
    /// Reads every table of `content.xml` in document order
    fn read_sheets(&mut self) -> Result<Vec<Sheet>, DecodeError> {
        let mut sheets = Vec::<Sheet>::new();
        let mut reader = self.zip
            .xml_reader("content.xml")?
            .ok_or_else(|| SpreadsheetError::FileError("content.xml".to_owned()))?;

        let mut sheet = None::<Sheet>;
        // Cell information
        let mut row = 0usize;
        let mut col = 0usize;
        let mut row_count = 0usize;
        let mut col_count = 0usize;
        let mut kind = CellType::default();
        let mut value = String::new();
        let mut text = String::new();
        let mut formula = None::<String>;
        let mut hyperlink = None::<String>;
        // Context information
        let mut element_context = false; // Whether child elements of a cell are read
        let mut comment_context = false; // Whether the content belongs to an annotation
        match_xml_events!(reader => {
            Event::Start(event) if event.name() == TABLE => {
                let name = event.get_attribute_value("table:name")?
                    .map(|name| name.to_string())
                    .unwrap_or_else(|| format!("Sheet{}", sheets.len() + 1));
                sheet = Some(Sheet::new(&name));
                row = 0;
            }
            Event::End(event) if event.name() == TABLE => {
                if let Some(sheet) = sheet.take() {
                    debug!(sheet = %sheet.name, cells = sheet.len(), "read ods sheet");
                    sheets.push(sheet);
                }
            }
            Event::Start(event) if event.name() == TABLE_ROW => {
                row_count = event.parse_attribute_value("table:number-rows-repeated")?.unwrap_or(1);
                col = 0;
            }
            Event::End(event) if event.name() == TABLE_ROW => {
                row = row.saturating_add(row_count);
            }
            Event::Start(event) if event.name() == TABLE_CELL || event.name() == TABLE_COVERED_CELL => {
                value.clear();
                text.clear();
                hyperlink = None;
                col_count = event.parse_attribute_value::<usize>("table:number-columns-repeated")?.unwrap_or(1);
                formula = event.get_attribute_value("table:formula")?
                    .map(|formula| normalize_ods_formula(&formula));
                let is_error = event.get_attribute_value("calcext:value-type")?
                    .map(|cow| cow == "error")
                    .unwrap_or(false);
                kind = if let Some(result_type) = event.get_attribute_value("office:value-type")? {
                    match result_type.as_ref() {
                        "boolean" => CellType::Boolean,
                        "date" => CellType::IsoDateTime,
                        "time" => CellType::IsoDuration,
                        "string" if is_error => CellType::Error,
                        "string" => CellType::InlineString,
                        "percentage" => CellType::NumberPercent,
                        _ => CellType::Number,
                    }
                } else {
                    CellType::Empty
                };

                if let Some(result_type) = event.get_attribute_value("office:value-type")? {
                    let attribute = match result_type.as_ref() {
                        "boolean" => "office:boolean-value",
                        "date" => "office:date-value",
                        "time" => "office:time-value",
                        "string" => "office:string-value",
                        _ => "office:value",
                    };
                    if let Some(data) = event.get_attribute_value(attribute)? {
                        if kind == CellType::Boolean {
                            value.push_str(if data != "false" && data != "0" { "1" } else { "0" });
                        } else {
                            value.push_str(&data);
                        }
                    }
                }
                element_context = kind != CellType::Empty;
            }
            Event::End(event) if event.name() == TABLE_CELL || event.name() == TABLE_COVERED_CELL => {
                if matches!(kind, CellType::InlineString | CellType::Error) && value.is_empty() {
                    value.push_str(&text);
                }
                // An empty string is a value, an empty number is not
                let has_value = kind != CellType::Empty && (kind.is_text() || !value.is_empty());
                if let Some(sheet) = sheet.as_mut().filter(|_| has_value) {
                    if row.saturating_add(row_count) > MAX_ROWS
                        || col.saturating_add(col_count) > MAX_COLUMNS
                        || row_count.saturating_mul(col_count) > MAX_REPEATED_CELLS
                    {
                        let last_row = row.saturating_add(row_count.saturating_sub(1)).min(MAX_ROWS);
                        let last_col = col.saturating_add(col_count.saturating_sub(1)).min(MAX_COLUMNS);
                        Err(SpreadsheetError::InvalidRange(format!(
                            "{}:{}",
                            index_to_reference(row.min(MAX_ROWS), col.min(MAX_COLUMNS)),
                            index_to_reference(last_row, last_col),
                        )))?;
                    }
                    for row_offset in 0..row_count {
                        for col_offset in 0..col_count {
                            let mut cell = Cell::new(row + row_offset, col + col_offset, kind, value.to_owned());
                            cell.formula = formula.to_owned();
                            cell.display = Some(text.to_owned()).filter(|text| !text.is_empty());
                            cell.hyperlink = hyperlink.to_owned();
                            sheet.push(cell);
                        }
                    }
                }
                col = col.saturating_add(col_count);
                kind = CellType::Empty;
                element_context = false;
                comment_context = false;
            }
            // Read string content
            Event::Start(event) if element_context && event.name() == ANNOTATION => comment_context = true,
            Event::End(event) if element_context && comment_context && event.name() == ANNOTATION => comment_context = false,
            Event::Start(event) if element_context && !comment_context && event.name() == PARAGRAPH => {
                if !text.is_empty() {
                    text.push('\n');
                }
            }
            Event::Start(event) if element_context && !comment_context && event.name() == STRING => {
                let count = event.parse_attribute_value("text:c")?.unwrap_or(1);
                for _ in 0..count {
                    text.push(' ');
                }
            }
            Event::Start(event) if element_context && !comment_context && event.name() == TAB => text.push('\t'),
            Event::Start(event) if element_context && !comment_context && event.name() == LINE_BREAK => text.push('\n'),
            Event::Start(event) if element_context && !comment_context && hyperlink.is_none() && event.name() == LINK => {
                hyperlink = event.get_attribute_value("xlink:href")?.map(|href| href.to_string());
            }
            Event::Text(event) if element_context && !comment_context => text.push_bytes_text(&event)?,
            Event::GeneralRef(event) if element_context && !comment_context => text.push_bytes_ref(&event)?,
        });

        Ok(sheets)
    }
}

/// Validates that the ZIP archive contains a valid ODS file by checking MIME type
///
/// # Arguments
/// * `zip` - ZIP archive to validate
///
/// # Returns
/// * `Result<(), DecodeError>` - Success or MIME type error
fn check_mime<RS: Read + Seek>(zip: &mut ZipArchive<RS>) -> Result<(), DecodeError> {
    if let Some(file) = &mut zip.file("mimetype")? {
        let mut buffer = Vec::new();
        file.read_to_end(&mut buffer)?;
        if buffer.trim_ascii() != MIME_TYPE {
            Err(OdsError::MimeTypeError)?;
        }
    }
    Ok(())
}

/// Checks if the ODS file is password protected by examining the manifest
///
/// # Arguments
/// * `zip` - ZIP archive to check
///
/// # Returns
/// * `Result<bool, DecodeError>` - True if password protected, false otherwise
fn is_password_protected<RS: Read + Seek>(zip: &mut ZipArchive<RS>) -> Result<bool, DecodeError> {
    let mut reader = match zip.xml_reader("META-INF/manifest.xml")? {
        Some(reader) => reader,
        None => return Ok(false),
    };
    let mut in_file_entry = false;
    match_xml_events!(reader => {
        Event::Start(event) if event.name() == QName(b"manifest:file-entry") => in_file_entry = true,
        Event::Start(event) if in_file_entry && event.name() == QName(b"manifest:encryption-data") => {
            return Ok(true);
        }
    });
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::CellValue;
    use crate::document::SheetRecord;
    use crate::spreadsheet::fixtures;
    use std::io::Cursor;

    fn read(bytes: Vec<u8>) -> Result<Vec<SheetRecord>, DecodeError> {
        let zip = ZipArchive::new(Cursor::new(bytes))?;
        OdsSpreadsheet::open(zip)?
            .read_sheets()?
            .into_iter()
            .map(|sheet| sheet.into_record())
            .collect()
    }

    #[test]
    fn typed_cells() -> Result<(), DecodeError> {
        let sheets = read(fixtures::ods(r#"
            <table:table table:name="People">
                <table:table-row>
                    <table:table-cell office:value-type="string"><text:p>Name</text:p></table:table-cell>
                    <table:table-cell office:value-type="string"><text:p>Age</text:p></table:table-cell>
                    <table:table-cell office:value-type="string"><text:p>Born</text:p></table:table-cell>
                    <table:table-cell office:value-type="string"><text:p>Member</text:p></table:table-cell>
                    <table:table-cell office:value-type="string"><text:p>Share</text:p></table:table-cell>
                </table:table-row>
                <table:table-row>
                    <table:table-cell office:value-type="string"><text:p>Ann<text:s text:c="2"/>Lee</text:p><office:annotation><text:p>note</text:p></office:annotation></table:table-cell>
                    <table:table-cell office:value-type="float" office:value="30"><text:p>30</text:p></table:table-cell>
                    <table:table-cell office:value-type="date" office:date-value="1994-05-01"><text:p>05/01/94</text:p></table:table-cell>
                    <table:table-cell office:value-type="boolean" office:boolean-value="true"><text:p>TRUE</text:p></table:table-cell>
                    <table:table-cell office:value-type="percentage" office:value="0.5"><text:p>50%</text:p></table:table-cell>
                </table:table-row>
            </table:table>"#))?;
        assert_eq!(sheets.len(), 1);
        assert_eq!(sheets[0].name, "People");
        let row = &sheets[0].rows[0];
        assert_eq!(row.get("Name").unwrap().value, CellValue::Text("Ann  Lee".to_owned()));
        assert_eq!(row.get("Age").unwrap().value, CellValue::Number(30.0));
        assert_eq!(row.get("Born").unwrap().value, CellValue::Text("1994-05-01T00:00:00.000Z".to_owned()));
        assert_eq!(row.get("Born").unwrap().display_text.as_deref(), Some("05/01/94"));
        assert_eq!(row.get("Member").unwrap().value, CellValue::Boolean(true));
        assert_eq!(row.get("Share").unwrap().value, CellValue::Number(0.5));
        assert_eq!(row.get("Share").unwrap().display_text.as_deref(), Some("50%"));
        Ok(())
    }

    #[test]
    fn repeated_cells_formulas_and_links() -> Result<(), DecodeError> {
        let sheets = read(fixtures::ods(r#"
            <table:table table:name="Sheet1">
                <table:table-row>
                    <table:table-cell office:value-type="string"><text:p>A</text:p></table:table-cell>
                    <table:table-cell office:value-type="string"><text:p>B</text:p></table:table-cell>
                    <table:table-cell office:value-type="string"><text:p>Link</text:p></table:table-cell>
                </table:table-row>
                <table:table-row table:number-rows-repeated="2">
                    <table:table-cell table:number-columns-repeated="2" office:value-type="float" office:value="1"><text:p>1</text:p></table:table-cell>
                    <table:table-cell office:value-type="string"><text:p><text:a xlink:href="https://example.com">site</text:a></text:p></table:table-cell>
                </table:table-row>
                <table:table-row table:number-rows-repeated="1000">
                    <table:table-cell table:number-columns-repeated="3"/>
                </table:table-row>
                <table:table-row>
                    <table:table-cell table:formula="of:=SUM([.A2:.B3])" office:value-type="float" office:value="4"><text:p>4</text:p></table:table-cell>
                </table:table-row>
            </table:table>
            <table:table table:name="Empty"/>"#))?;
        assert_eq!(sheets.len(), 2);
        let rows = &sheets[0].rows;
        assert_eq!(rows.len(), 1003);
        assert_eq!(rows[0].get("B").unwrap().value, CellValue::Number(1.0));
        assert_eq!(rows[1].get("A").unwrap().value, CellValue::Number(1.0));
        assert_eq!(rows[1].get("Link").unwrap().hyperlink.as_deref(), Some("https://example.com"));
        assert!(rows[500].is_empty());
        assert_eq!(rows[1002].get("A").unwrap().formula.as_deref(), Some("SUM(A2:B3)"));
        assert!(sheets[1].rows.is_empty());
        Ok(())
    }

    #[test]
    fn error_cells_keep_literal() -> Result<(), DecodeError> {
        let sheets = read(fixtures::ods(r#"
            <table:table table:name="Sheet1">
                <table:table-row><table:table-cell office:value-type="string"><text:p>R</text:p></table:table-cell></table:table-row>
                <table:table-row><table:table-cell table:formula="of:=1/0" office:value-type="string" office:string-value="" calcext:value-type="error"><text:p>#DIV/0!</text:p></table:table-cell></table:table-row>
            </table:table>"#))?;
        assert_eq!(sheets[0].rows[0].get("R").unwrap().value, CellValue::Text("#DIV/0!".to_owned()));
        assert_eq!(sheets[0].rows[0].get("R").unwrap().formula.as_deref(), Some("1/0"));
        Ok(())
    }

    #[test]
    fn empty_strings_and_whitespace_headers() -> Result<(), DecodeError> {
        let sheets = read(fixtures::ods(r#"
            <table:table table:name="Sheet1">
                <table:table-row>
                    <table:table-cell office:value-type="string"><text:p>A</text:p></table:table-cell>
                    <table:table-cell office:value-type="string"><text:p><text:s text:c="2"/></text:p></table:table-cell>
                    <table:table-cell office:value-type="string"><text:p>C</text:p></table:table-cell>
                </table:table-row>
                <table:table-row>
                    <table:table-cell office:value-type="string" office:string-value=""/>
                    <table:table-cell office:value-type="string"><text:p/></table:table-cell>
                    <table:table-cell office:value-type="float"/>
                </table:table-row>
            </table:table>"#))?;
        let row = &sheets[0].rows[0];
        assert_eq!(row.columns().collect::<Vec<_>>(), vec!["A", "  "]);
        assert_eq!(row.get("A").unwrap().value, CellValue::Text(String::new()));
        assert_eq!(row.get("  ").unwrap().value, CellValue::Text(String::new()));
        Ok(())
    }

    #[test]
    fn repeats_beyond_sheet_limits() {
        let cases = [
            (1, r#"<table:table-cell table:number-columns-repeated="20000" office:value-type="float" office:value="1"/>"#, "A1:XFE1"),
            (300, r#"<table:table-cell table:number-columns-repeated="300" office:value-type="string"><text:p>x</text:p></table:table-cell>"#, "A1:KN300"),
        ];
        for (repeat, cell, range) in cases {
            let bytes = fixtures::ods(&format!(
                r#"<table:table table:name="Sheet1"><table:table-row table:number-rows-repeated="{repeat}">{cell}</table:table-row></table:table>"#
            ));
            let error = read(bytes).unwrap_err();
            assert_eq!(error.to_string(), format!("Invalid cell range '{range}'"));
        }

        let bytes = fixtures::ods(r#"<table:table table:name="Sheet1">
            <table:table-row><table:table-cell office:value-type="string"><text:p>A</text:p></table:table-cell></table:table-row>
            <table:table-row table:number-rows-repeated="1048575"><table:table-cell table:number-columns-repeated="16384"/></table:table-row>
        </table:table>"#);
        assert!(read(bytes).unwrap()[0].rows.is_empty());
    }

    #[test]
    fn invalid_mime_type() {
        let bytes = fixtures::zip(&[("mimetype", "application/zip"), ("content.xml", "<office:document-content/>")]);
        let error = read(bytes).unwrap_err();
        assert_eq!(error.to_string(), "Invalid ODS MIME type");
    }

    #[test]
    fn password_protected() {
        let bytes = fixtures::zip(&[
            ("mimetype", "application/vnd.oasis.opendocument.spreadsheet"),
            ("META-INF/manifest.xml", r#"<manifest:manifest><manifest:file-entry manifest:full-path="content.xml"><manifest:encryption-data/></manifest:file-entry></manifest:manifest>"#),
            ("content.xml", "<office:document-content/>"),
        ]);
        let error = read(bytes).unwrap_err();
        assert_eq!(error.to_string(), "Spreadsheet is password protected");
    }
}
