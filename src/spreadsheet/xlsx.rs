use crate::error::DecodeError;
use crate::error::ResultMessage;
use crate::helpers::xml::AttributeLookup;
use crate::helpers::xml::XmlReader;
use crate::helpers::xml::PushXmlText;
use crate::helpers::zip::ZipHelper;
use crate::match_xml_events;
use crate::spreadsheet::cell::Cell;
use crate::spreadsheet::cell::CellType;
use crate::spreadsheet::excel;
use crate::spreadsheet::excel::load_relationships;
use crate::spreadsheet::excel::to_relationships_path;
use crate::spreadsheet::excel::to_zip_path;
use crate::spreadsheet::formula::shift_formula;
use crate::spreadsheet::reference::index_to_reference;
use crate::spreadsheet::reference::reference_to_index;
use crate::spreadsheet::reference::row_to_index;
use crate::spreadsheet::reference::MAX_COLUMNS;
use crate::spreadsheet::reference::MAX_ROWS;
use crate::spreadsheet::reference::CellRange;
use crate::spreadsheet::sheet::Sheet;
use crate::spreadsheet::Spreadsheet;
use crate::spreadsheet::SpreadsheetError;
use quick_xml::events::Event;
use quick_xml::name::QName;
use std::borrow::Cow;
use std::collections::HashMap;
use std::io::BufReader;
use std::io::Read;
use std::io::Seek;
use tracing::debug;
use zip::read::ZipFile;
use zip::ZipArchive;

// XML tag names for parsing Excel XLSX format
const TAG_CUSTOM_FORMATS: QName = QName(b"numFmts"); // Custom number formats container
const TAG_CUSTOM_FORMAT: QName = QName(b"numFmt");   // Individual custom number format
const TAG_FORMAT_INDEXES: QName = QName(b"cellXfs");  // Cell format indexes container
const TAG_FORMAT_INDEX: QName = QName(b"xf");         // Individual cell format index
const TAG_SHARED_STRING_ITEM: QName = QName(b"si");   // Shared string table item
const TAG_PHONETIC_TEXT: QName = QName(b"rPh");       // Phonetic text for Asian languages
const TAG_TEXT: QName = QName(b"t");                  // Text content within strings
const TAG_WORKBOOK_PROPERTIES: QName = QName(b"workbookPr"); // Workbook properties
const TAG_SHEET: QName = QName(b"sheet");             // Worksheet definition
const TAG_DIMENSION: QName = QName(b"dimension");     // Declared used range of a worksheet
const TAG_ROW: QName = QName(b"row");                 // Row in worksheet
const TAG_CELL: QName = QName(b"c");                  // Cell in worksheet
const TAG_INLINE_STRING: QName = QName(b"is");        // Inline string value
const TAG_VALUE: QName = QName(b"v");                 // Cell value content
const TAG_FORMULA: QName = QName(b"f");               // Cell formula
const TAG_HYPERLINK: QName = QName(b"hyperlink");     // Hyperlink attached to a cell range

/// A `<hyperlink>` element waiting for its relationship to be resolved:
/// cell range, relationship id, and in-workbook location.
type PendingHyperlink = (String, Option<String>, Option<String>);

/// Represents an Excel XLSX spreadsheet loaded from an archive
pub(crate) struct XlsxSpreadsheet<RS: Read + Seek> {
    /// ZIP archive containing the XLSX file contents
    zip: ZipArchive<RS>,
    /// Parsed number formats for cell type detection
    number_formats: Vec<CellType>,
    /// Shared string table
    shared_strings: Vec<String>,
    /// List of worksheets with (name, zip_path) pairs
    sheets: Vec<(String, String)>,
}

impl<RS: Read + Seek> XlsxSpreadsheet<RS> {
    /// Parses the workbook structure, number formats, and shared strings of an XLSX archive
    ///
    /// # Arguments
    /// * `zip` - Archive holding an Office Open XML workbook
    ///
    /// # Returns
    /// Result containing the initialized XlsxSpreadsheet or an error
    pub(crate) fn open(mut zip: ZipArchive<RS>) -> Result<Self, DecodeError> {
        let (sheets, is_1904) = load_workbook(&mut zip)?;
        let number_formats = load_number_formats(&mut zip, is_1904)?;
        let shared_strings = load_shared_strings(&mut zip)?;
        Ok(XlsxSpreadsheet {
            zip,
            number_formats,
            shared_strings,
            sheets,
        })
    }
}

impl<RS: Read + Seek> Spreadsheet for XlsxSpreadsheet<RS> {
    /// Reads every worksheet in workbook order
    fn read_sheets(&mut self) -> Result<Vec<Sheet>, DecodeError> {
        let mut sheets = Vec::<Sheet>::new();
        for (sheet_name, zip_path) in &self.sheets {
            let sheet = read_sheet(&mut self.zip, &self.number_formats, &self.shared_strings, sheet_name, zip_path)
                .with_prefix(&format!("Read sheet '{sheet_name}'"))?;
            debug!(sheet = %sheet_name, cells = sheet.len(), "read xlsx sheet");
            sheets.push(sheet);
        }
        Ok(sheets)
    }
}

/// Reads one worksheet: cell values, formulas (shared formulas expanded), and hyperlinks
///
/// # Arguments
/// * `zip` - ZIP archive containing the XLSX file
/// * `number_formats` - Cell types indexed by style ID
/// * `shared_strings` - Shared string table
/// * `sheet_name` - Name of the worksheet
/// * `zip_path` - Path of the worksheet part
fn read_sheet<RS: Read + Seek>(
    zip: &mut ZipArchive<RS>,
    number_formats: &[CellType],
    shared_strings: &[String],
    sheet_name: &str,
    zip_path: &str,
) -> Result<Sheet, DecodeError> {
    let mut sheet = Sheet::new(sheet_name);
    let mut hyperlinks = Vec::<PendingHyperlink>::new();
    {
        let mut reader = zip.xml_reader(zip_path)?
            .ok_or_else(|| SpreadsheetError::FileError(zip_path.to_owned()))?;
        // Master cell and formula text by shared formula index
        let mut shared_formulas = HashMap::<String, (usize, usize, String)>::new();
        let mut row_count = 0usize;
        let mut col_count = 0usize;
        let mut row = 0usize;
        let mut col = 0usize;
        let mut kind = CellType::default();
        let mut value = String::new();
        let mut has_value = false;
        let mut formula = None::<String>;
        match_xml_events!(reader => {
            Event::Start(event) if event.name() == TAG_DIMENSION => {
                if let Some(reference) = event.get_attribute_value("ref")? {
                    CellRange::try_from(reference.as_ref())?;
                }
            }
            Event::Start(event) if event.name() == TAG_ROW => {
                if let Some(number) = event.get_attribute_value("r")? {
                    row_count = row_to_index(&number)
                        .ok_or_else(|| SpreadsheetError::InvalidRange(number.to_string()))?;
                }
                col_count = 0;
            }
            Event::End(event) if event.name() == TAG_ROW => {
                row_count += 1;
                col_count = 0;
            }
            Event::Start(event) if event.name() == TAG_CELL => {
                (row, col) = match event.get_attribute_value("r")? {
                    Some(reference) => reference_to_index(&reference)
                        .ok_or_else(|| SpreadsheetError::InvalidRange(reference.to_string()))?,
                    None if row_count < MAX_ROWS && col_count < MAX_COLUMNS => (row_count, col_count),
                    None => Err(SpreadsheetError::InvalidRange(index_to_reference(row_count, col_count)))?,
                };
                col_count = col + 1;
                has_value = false;
                value.clear();
                formula = None;
                kind = event.get_attribute_value("t")?.map(|t| {
                    match t.as_ref() {
                        "inlineStr" | "str" => CellType::InlineString,
                        "s" => CellType::SharedString,
                        "d" => CellType::IsoDateTime,
                        "b" => CellType::Boolean,
                        "e" => CellType::Error,
                        _ => CellType::Number,
                    }
                }).unwrap_or(CellType::Number);
                if let Some(format_id) = event.get_attribute_value("s")? {
                    if kind == CellType::Number && !format_id.is_empty() {
                        let index = format_id.parse::<usize>()?;
                        kind = number_formats.get(index).copied().unwrap_or(CellType::Number);
                    }
                }
            }
            Event::Start(event) if kind != CellType::Empty && event.name() == TAG_INLINE_STRING => {
                value = read_string_value(&mut reader, TAG_INLINE_STRING, false)?;
                has_value = true;
            }
            Event::Start(event) if kind != CellType::Empty && event.name() == TAG_VALUE => {
                value = read_string_value(&mut reader, TAG_VALUE, true)?;
                has_value = true;
            }
            Event::Start(event) if kind != CellType::Empty && event.name() == TAG_FORMULA => {
                let is_shared = event.get_attribute_value("t")?
                    .map(|t| t == "shared")
                    .unwrap_or(false);
                let shared_index = event.get_attribute_value("si")?
                    .filter(|_| is_shared)
                    .map(|index| index.to_string());
                let text = read_string_value(&mut reader, TAG_FORMULA, true)?;
                formula = match shared_index {
                    Some(index) if text.is_empty() => shared_formulas
                        .get(&index)
                        .map(|(master_row, master_col, master)| {
                            shift_formula(master, row as isize - *master_row as isize, col as isize - *master_col as isize)
                        }),
                    Some(index) => {
                        shared_formulas.insert(index, (row, col, text.to_owned()));
                        Some(text)
                    }
                    None => Some(text).filter(|text| !text.is_empty()),
                };
            }
            Event::End(event) if kind != CellType::Empty && event.name() == TAG_CELL => {
                if kind == CellType::SharedString && !value.is_empty() {
                    let index = value.parse::<usize>()?;
                    value = shared_strings.get(index).cloned().ok_or_else(|| SpreadsheetError::CellValueError(
                        sheet_name.to_owned(),
                        index_to_reference(row, col),
                        format!("shared string index {index} out of range"),
                    ))?;
                }
                // An empty string is a value, an empty number is not
                if has_value && (kind.is_text() || !value.is_empty()) {
                    let mut cell = Cell::new(row, col, kind, value.to_owned());
                    cell.formula = formula.take();
                    sheet.push(cell);
                }
                kind = CellType::Empty;
                value.clear();
            }
            Event::Start(event) if event.name() == TAG_HYPERLINK => {
                if let Some(reference) = event.get_attribute_value("ref")? {
                    let id = event.get_local_attribute_value("id")?.map(|id| id.to_string());
                    let location = event.get_attribute_value("location")?.map(|location| location.to_string());
                    hyperlinks.push((reference.to_string(), id, location));
                }
            }
        });
    }

    if !hyperlinks.is_empty() {
        let relationships_path = to_relationships_path(zip_path);
        let relationships = if zip.contains(&relationships_path) {
            load_relationships(zip, &relationships_path)?
        } else {
            HashMap::new()
        };
        for (reference, id, location) in hyperlinks {
            let target = id
                .and_then(|id| relationships.get(&id))
                .filter(|relationship| relationship.is("/hyperlink"))
                .map(|relationship| relationship.target.to_owned())
                .or_else(|| location.map(|location| format!("#{location}")));
            if let Some(target) = target {
                sheet.link(&CellRange::try_from(reference.as_str())?, &target);
            }
        }
    }

    Ok(sheet)
}

/// Loads shared strings from the XLSX file
///
/// Shared strings are stored in a separate XML file and referenced by index
/// to reduce file size when the same string appears multiple times.
fn load_shared_strings<RS: Read + Seek>(zip: &mut ZipArchive<RS>) -> Result<Vec<String>, DecodeError> {
    let mut shared_strings = Vec::<String>::new();
    let mut reader = match zip.xml_reader("xl/sharedStrings.xml")? {
        Some(reader) => reader,
        None => return Ok(shared_strings),
    };

    match_xml_events!(reader => {
        Event::Start(event) if event.name() == TAG_SHARED_STRING_ITEM => {
            let string = read_string_value(&mut reader, TAG_SHARED_STRING_ITEM, false)?;
            shared_strings.push(string);
        }
    });
    Ok(shared_strings)
}

/// Loads workbook structure and worksheet information from XLSX file
///
/// Parses the workbook.xml file to extract worksheet names and their corresponding
/// XML file paths, and determines the date system (1900 vs 1904) used in the file.
///
/// # Arguments
/// * `zip` - ZIP archive containing the XLSX file
///
/// # Returns
/// Tuple of (worksheets, is_1904_date_system) where worksheets are (name, zip_path) pairs
fn load_workbook<RS: Read + Seek>(zip: &mut ZipArchive<RS>) -> Result<(Vec<(String, String)>, bool), DecodeError> {
    let relationships = load_relationships(zip, "xl/_rels/workbook.xml.rels")?;
    let mut reader = zip.xml_reader("xl/workbook.xml")?
        .ok_or_else(|| SpreadsheetError::FileError("xl/workbook.xml".to_string()))?;
    let mut sheets: Vec<(String, String)> = Vec::new();
    let mut is_1904 = false;
    match_xml_events!(reader => {
        Event::Start(event) if event.name() == TAG_SHEET => {
            let name = event.get_attribute_value("name")?;
            let id = event.get_local_attribute_value("id")?;
            if let Some((name, id)) = name.zip(id) {
                // Only worksheets hold cells, chart sheets are skipped
                let worksheet = relationships
                    .get(id.as_ref())
                    .filter(|relationship| relationship.kind.is_empty() || relationship.is("/worksheet"));
                if let Some(relationship) = worksheet {
                    sheets.push((name.to_string(), to_zip_path(Cow::Borrowed(&relationship.target))));
                }
            }
        }
        Event::Start(event) if event.name() == TAG_WORKBOOK_PROPERTIES => {
            is_1904 = event.get_attribute_value("date1904")?
                .map(|value| value.eq("1") || value.eq("true"))
                .unwrap_or(false);
        }
    });
    Ok((sheets, is_1904))
}

/// Loads number formats and cell styles from XLSX styles.xml file
///
/// Parses custom number formats and cell style indexes to determine
/// how numeric values should be interpreted (dates, times, percentages, etc.)
///
/// # Arguments
/// * `zip` - ZIP archive containing the XLSX file
/// * `is_1904` - Whether the file uses the 1904 date system
///
/// # Returns
/// Vector of CellType values indexed by style ID
fn load_number_formats<RS: Read + Seek>(zip: &mut ZipArchive<RS>, is_1904: bool) -> Result<Vec<CellType>, DecodeError> {
    let mut reader = match zip.xml_reader("xl/styles.xml")? {
        Some(reader) => reader,
        None => return Ok(Vec::new()),
    };

    let mut has_custom_formats = false;
    let mut custom_formats_context = false;
    let mut custom_formats = HashMap::<String, CellType>::new();

    let mut has_format_indexes = false;
    let mut format_indexes_context = false;
    let mut format_indexes = Vec::<String>::new();

    match_xml_events!(reader => {
        Event::Start(event) if !custom_formats_context && event.name() == TAG_CUSTOM_FORMATS => {
            has_custom_formats = true;
            custom_formats_context = true;
        }
        Event::End(event) if custom_formats_context && event.name() == TAG_CUSTOM_FORMATS => {
            custom_formats_context = false;
            if has_custom_formats && has_format_indexes {
                break;
            }
        }
        Event::Start(event) if custom_formats_context && event.name() == TAG_CUSTOM_FORMAT => {
            let id = event.get_attribute_value("numFmtId")?;
            let format = event.get_attribute_value("formatCode")?;
            if let Some((id, format)) = id.zip(format) {
                let style = CellType::parse_custom_number_format(&format, is_1904);
                custom_formats.insert(id.to_string(), style);
            }
        }

        Event::Start(event) if !format_indexes_context && event.name() == TAG_FORMAT_INDEXES => {
            has_format_indexes = true;
            format_indexes_context = true;
        }
        Event::End(event) if format_indexes_context && event.name() == TAG_FORMAT_INDEXES => {
            format_indexes_context = false;
            if has_custom_formats && has_format_indexes {
                break;
            }
        }
        Event::Start(event) if format_indexes_context && event.name() == TAG_FORMAT_INDEX => {
            if let Some(id) = event.get_attribute_value("numFmtId")? {
                format_indexes.push(id.to_string());
            }
        }
    });

    Ok(excel::load_number_formats(format_indexes, custom_formats, is_1904))
}

/// Reads string value from XML content, handling text and CDATA sections
///
/// Extracts string content from XML elements, skipping phonetic text annotations
/// and properly handling both text nodes and CDATA sections.
///
/// # Arguments
/// * `reader` - XML reader positioned at the start of the string content
/// * `end_tag` - XML tag that marks the end of the string content
/// * `is_text_content` - Whether to treat the content as text by default
///
/// # Returns
/// Extracted string value
fn read_string_value<RS: Read>(
    reader: &mut XmlReader<BufReader<ZipFile<'_, RS>>>,
    end_tag: QName,
    is_text_content: bool,
) -> Result<String, DecodeError> {
    let mut is_phonetic_text = false;
    let mut is_text = is_text_content;
    let mut text = String::new();
    match_xml_events!(reader => {
        Event::End(event) if event.name() == end_tag => break,
        Event::Start(event) if event.name() == TAG_PHONETIC_TEXT => is_phonetic_text = true,
        Event::End(event) if event.name() == TAG_PHONETIC_TEXT => is_phonetic_text = false,
        Event::Start(event) if !is_phonetic_text && event.name() == TAG_TEXT => is_text = true,
        Event::End(event) if is_text && event.name() == TAG_TEXT => is_text = false,
        Event::Text(event) if is_text => text.push_bytes_text(&event)?,
        Event::CData(event) if is_text => text.push_str(&event.xml_content()?),
        Event::GeneralRef(event) if is_text => text.push_bytes_ref(&event)?,
    });
    Ok(text)
}
