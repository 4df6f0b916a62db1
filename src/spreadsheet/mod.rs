//! # Workbook Decoder
//!
//! Reads Office Open XML (.xlsx, .xlsm) and OpenDocument (.ods) workbooks from memory
//! and converts them to a [`WorkbookDocument`]: row 0 of every sheet names the columns,
//! every later row up to the last occupied one becomes a row record.
pub(crate) mod cell;
pub(crate) mod excel;
pub(crate) mod formula;
pub(crate) mod ods;
pub(crate) mod reference;
pub(crate) mod sheet;
pub(crate) mod xlsx;

pub use crate::spreadsheet::ods::OdsError;

use crate::document::WorkbookDocument;
use crate::error::DecodeError;
use crate::helpers::zip::ZipHelper;
use crate::spreadsheet::ods::OdsSpreadsheet;
use crate::spreadsheet::sheet::Sheet;
use crate::spreadsheet::xlsx::XlsxSpreadsheet;
use std::io::Cursor;
use thiserror::Error;
use tracing::debug;
use zip::ZipArchive;

/// Local file header signature of a ZIP archive
const ZIP_SIGNATURE: &[u8] = b"PK\x03\x04";
/// End of central directory signature, the first record of an empty ZIP archive
const EMPTY_ZIP_SIGNATURE: &[u8] = b"PK\x05\x06";
/// Compound File Binary signature (legacy .xls, encrypted OOXML packages)
const CFB_SIGNATURE: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

/// Format and structure errors of a workbook
#[derive(Error, Debug)]
pub enum SpreadsheetError {
    #[error("Missing file part '{0}'")]
    FileError(String),

    #[error("Invalid cell range '{0}'")]
    InvalidRange(String),

    /// sheet name, cell reference, and reason
    #[error("Invalid cell value at '{0}'!{1}: {2}")]
    CellValueError(String, String, String),

    #[error("Spreadsheet is password protected")]
    SpreadsheetPasswordProtectedError,

    #[error("Unsupported spreadsheet format: {0}")]
    UnsupportedFormat(String),

    #[error("Cannot detect spreadsheet format")]
    UnknownFormat,
}

/// A workbook opened from an archive, able to read its sheets in source order.
pub(crate) trait Spreadsheet {
    fn read_sheets(&mut self) -> Result<Vec<Sheet>, DecodeError>;
}

/// Decodes workbook bytes into the normalized document.
///
/// # Arguments
/// * `bytes` - The complete file content
///
/// # Returns
/// One sheet record per sheet, in workbook order. A sheet without cells has no rows.
///
/// # Errors
/// Unrecognized or unsupported formats, corrupt archives, and malformed parts or values.
pub fn decode_workbook(bytes: &[u8]) -> Result<WorkbookDocument, DecodeError> {
    let mut spreadsheet = open(bytes)?;
    let sheets = spreadsheet
        .read_sheets()?
        .into_iter()
        .map(Sheet::into_record)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(WorkbookDocument::new(sheets))
}

/// Detects the format from the byte signature and the archive content.
fn open<'a>(bytes: &'a [u8]) -> Result<Box<dyn Spreadsheet + 'a>, DecodeError> {
    if bytes.starts_with(CFB_SIGNATURE) {
        Err(SpreadsheetError::UnsupportedFormat("legacy .xls or encrypted workbook".to_owned()))?;
    }
    if !bytes.starts_with(ZIP_SIGNATURE) && !bytes.starts_with(EMPTY_ZIP_SIGNATURE) {
        Err(SpreadsheetError::UnknownFormat)?;
    }

    let zip = ZipArchive::new(Cursor::new(bytes))?;
    if zip.contains("xl/workbook.xml") {
        debug!(format = "xlsx", "detected spreadsheet format");
        Ok(Box::new(XlsxSpreadsheet::open(zip)?))
    } else if zip.contains("mimetype") || zip.contains("content.xml") {
        debug!(format = "ods", "detected spreadsheet format");
        Ok(Box::new(OdsSpreadsheet::open(zip)?))
    } else {
        Err(SpreadsheetError::UnknownFormat.into())
    }
}

/// In-memory workbook builders shared by the tests of the crate.
#[cfg(test)]
pub(crate) mod fixtures {
    use std::io::Cursor;
    use std::io::Write;
    use zip::write::SimpleFileOptions;
    use zip::CompressionMethod;
    use zip::ZipWriter;

    /// Builds a ZIP archive, `mimetype` entries are stored uncompressed.
    pub(crate) fn zip(files: &[(&str, &str)]) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, content) in files {
            let options = if *name == "mimetype" {
                SimpleFileOptions::default().compression_method(CompressionMethod::Stored)
            } else {
                SimpleFileOptions::default()
            };
            writer.start_file(*name, options).unwrap();
            writer.write_all(content.as_bytes()).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    /// Builds an XLSX workbook. `sheets` holds sheet names and the worksheet body (`<sheetData>` and siblings),
    /// shared string items are plain text or rich text runs.
    pub(crate) fn xlsx(sheets: &[(&str, &str)], shared_strings: &[&str]) -> Vec<u8> {
        xlsx_with(sheets, shared_strings, &[])
    }

    /// Same as [`xlsx`], files in `extra` are added or replace the generated ones.
    pub(crate) fn xlsx_with(sheets: &[(&str, &str)], shared_strings: &[&str], extra: &[(&str, &str)]) -> Vec<u8> {
        let mut files = Vec::<(String, String)>::new();
        let sheet_entries: String = sheets
            .iter()
            .enumerate()
            .map(|(index, (name, _))| format!(r#"<sheet name="{name}" sheetId="{0}" r:id="rId{0}"/>"#, index + 1))
            .collect();
        files.push(("xl/workbook.xml".to_owned(), format!(
            r#"<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><workbookPr date1904="false"/><sheets>{sheet_entries}</sheets></workbook>"#
        )));
        let relationships: String = (1..=sheets.len())
            .map(|id| format!(r#"<Relationship Id="rId{id}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet{id}.xml"/>"#))
            .collect();
        files.push(("xl/_rels/workbook.xml.rels".to_owned(), format!(
            r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">{relationships}</Relationships>"#
        )));
        for (index, (_, body)) in sheets.iter().enumerate() {
            files.push((format!("xl/worksheets/sheet{}.xml", index + 1), format!(
                r#"<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships">{body}</worksheet>"#
            )));
        }
        let items: String = shared_strings
            .iter()
            .map(|item| if item.starts_with('<') { format!("<si>{item}</si>") } else { format!("<si><t>{item}</t></si>") })
            .collect();
        files.push(("xl/sharedStrings.xml".to_owned(), format!(
            r#"<sst xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" count="{0}" uniqueCount="{0}">{items}</sst>"#,
            shared_strings.len()
        )));
        // Style 0 general, 1 date, 2 custom percent, 3 datetime
        files.push(("xl/styles.xml".to_owned(), r#"<styleSheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">
            <numFmts count="1"><numFmt numFmtId="164" formatCode="0.0%"/></numFmts>
            <cellStyleXfs count="1"><xf numFmtId="0"/></cellStyleXfs>
            <cellXfs count="4"><xf numFmtId="0"/><xf numFmtId="14" applyNumberFormat="1"/><xf numFmtId="164" applyNumberFormat="1"/><xf numFmtId="22" applyNumberFormat="1"/></cellXfs>
        </styleSheet>"#.to_owned()));

        for (name, content) in extra {
            files.retain(|(existing, _)| existing != name);
            files.push((name.to_string(), content.to_string()));
        }
        let files: Vec<(&str, &str)> = files.iter().map(|(name, content)| (name.as_str(), content.as_str())).collect();
        zip(&files)
    }

    /// Builds an ODS document whose spreadsheet body holds the given tables.
    pub(crate) fn ods(tables: &str) -> Vec<u8> {
        let content = format!(
            r#"<office:document-content xmlns:office="urn:oasis:names:tc:opendocument:xmlns:office:1.0" xmlns:table="urn:oasis:names:tc:opendocument:xmlns:table:1.0" xmlns:text="urn:oasis:names:tc:opendocument:xmlns:text:1.0" xmlns:xlink="http://www.w3.org/1999/xlink" xmlns:calcext="urn:org:documentfoundation:names:experimental:calc:xmlns:calcext:1.0"><office:body><office:spreadsheet>{tables}</office:spreadsheet></office:body></office:document-content>"#
        );
        zip(&[
            ("mimetype", "application/vnd.oasis.opendocument.spreadsheet"),
            ("META-INF/manifest.xml", r#"<manifest:manifest xmlns:manifest="urn:oasis:names:tc:opendocument:xmlns:manifest:1.0"><manifest:file-entry manifest:full-path="/" manifest:media-type="application/vnd.oasis.opendocument.spreadsheet"/><manifest:file-entry manifest:full-path="content.xml" manifest:media-type="text/xml"/></manifest:manifest>"#),
            ("content.xml", content.as_str()),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::CellValue;

    fn people_xlsx() -> Vec<u8> {
        fixtures::xlsx(&[("People", r#"<dimension ref="A1:B3"/><sheetData>
            <row r="1"><c r="A1" t="s"><v>0</v></c><c r="B1" t="s"><v>1</v></c></row>
            <row r="2"><c r="A2" t="s"><v>2</v></c><c r="B2"><v>30</v></c></row>
            <row r="3"><c r="A3" t="s"><v>3</v></c></row>
        </sheetData>"#)], &["Name", "Age", "Ann", "Bob"])
    }

    #[test]
    fn decode_xlsx_workbook() {
        let document = decode_workbook(&people_xlsx()).unwrap();
        let sheet = document.sheet("People").unwrap();
        assert_eq!(sheet.rows.len(), 2);
        assert_eq!(sheet.rows[0].get("Name").unwrap().value, CellValue::Text("Ann".to_owned()));
        assert_eq!(sheet.rows[0].get("Age").unwrap().value, CellValue::Number(30.0));
        assert_eq!(sheet.rows[1].columns().collect::<Vec<_>>(), vec!["Name"]);
    }

    #[test]
    fn decode_ods_workbook() {
        let bytes = fixtures::ods(r#"<table:table table:name="Only">
            <table:table-row><table:table-cell office:value-type="string"><text:p>Header</text:p></table:table-cell></table:table-row>
        </table:table>"#);
        let document = decode_workbook(&bytes).unwrap();
        assert_eq!(document.sheets.len(), 1);
        assert_eq!(document.sheets[0].name, "Only");
        assert!(document.sheets[0].rows.is_empty());
    }

    #[test]
    fn workbook_without_sheets() {
        let document = decode_workbook(&fixtures::xlsx(&[], &[])).unwrap();
        assert!(document.sheets.is_empty());
    }

    #[test]
    fn oversized_references_are_rejected() {
        let xlsx = fixtures::xlsx(&[("Huge", r#"<sheetData>
            <row r="1"><c r="A1" t="s"><v>0</v></c></row>
            <row r="2"><c r="AAAAAAAAAAAAAAAA2"><v>1</v></c></row>
        </sheetData>"#)], &["A"]);
        let error = decode_workbook(&xlsx).unwrap_err();
        assert_eq!(error.to_string(), "Read sheet 'Huge': Invalid cell range 'AAAAAAAAAAAAAAAA2'");

        let ods = fixtures::ods(r#"<table:table table:name="Huge">
            <table:table-row table:number-rows-repeated="4000000000"><table:table-cell office:value-type="float" office:value="1"/></table:table-row>
        </table:table>"#);
        assert!(decode_workbook(&ods).is_err());
    }

    #[test]
    fn unsupported_formats() {
        let mut legacy = CFB_SIGNATURE.to_vec();
        legacy.extend_from_slice(&[0u8; 504]);
        let error = decode_workbook(&legacy).unwrap_err();
        assert_eq!(error.to_string(), "Unsupported spreadsheet format: legacy .xls or encrypted workbook");

        let error = decode_workbook(b"Name,Age\nAnn,30\n").unwrap_err();
        assert_eq!(error.to_string(), "Cannot detect spreadsheet format");

        let error = decode_workbook(&fixtures::zip(&[("readme.txt", "hello")])).unwrap_err();
        assert_eq!(error.to_string(), "Cannot detect spreadsheet format");

        assert!(decode_workbook(b"PK\x03\x04truncated").is_err());
        assert!(decode_workbook(&[]).is_err());
    }
}
