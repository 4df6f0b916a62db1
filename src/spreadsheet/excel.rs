//! Microsoft Office Excel Helpers
use crate::error::DecodeError;
use crate::helpers::xml::AttributeLookup;
use crate::helpers::zip::ZipHelper;
use crate::match_xml_events;
use crate::spreadsheet::cell::CellType;
use crate::spreadsheet::SpreadsheetError;
use quick_xml::events::Event;
use std::borrow::Cow;
use std::collections::HashMap;
use std::io::Read;
use std::io::Seek;
use zip::ZipArchive;

/// XML tag name for relationship elements in Excel files
const TAG_RELATIONSHIP: &[u8] = b"Relationship";

/// A package relationship (`Relationship` element of a `.rels` part)
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Relationship {
    /// Relationship type URI, e.g. `.../relationships/worksheet`
    pub(crate) kind: String,
    /// Target as written in the part
    pub(crate) target: String,
    /// `TargetMode="External"`: the target is a URL, not a package part
    pub(crate) external: bool,
}

impl Relationship {
    /// Returns true if the relationship type ends with the given suffix (e.g. `/worksheet`).
    pub(crate) fn is(&self, suffix: &str) -> bool {
        self.kind.ends_with(suffix)
    }
}

/// Loads relationships from an Excel file
///
/// # Arguments
/// * `zip` - Zip archive handle
/// * `path` - Path to the relationships XML file within the archive
///
/// # Returns
/// Mapping of relationship IDs to relationships
pub(super) fn load_relationships<RS: Read + Seek>(zip: &mut ZipArchive<RS>, path: &str) -> Result<HashMap<String, Relationship>, DecodeError> {
    let mut reader = zip.xml_reader(path)?
        .ok_or_else(|| SpreadsheetError::FileError(path.to_string()))?;
    let mut relationships: HashMap<String, Relationship> = HashMap::new();
    match_xml_events!(reader => {
        Event::Start(event) if event.local_name().as_ref() == TAG_RELATIONSHIP => {
            let id = event.get_attribute_value("Id")?;
            let kind = event.get_attribute_value("Type")?;
            let target = event.get_attribute_value("Target")?;
            let external = event.get_attribute_value("TargetMode")?
                .map(|mode| mode.eq_ignore_ascii_case("External"))
                .unwrap_or(false);
            if let Some((id, target)) = id.zip(target) {
                relationships.insert(id.to_string(), Relationship {
                    kind: kind.map(|kind| kind.to_string()).unwrap_or_default(),
                    target: target.to_string(),
                    external,
                });
            }
        }
    });
    Ok(relationships)
}

/// Maps format indexes to cell types using custom and built-in formats
///
/// # Arguments
/// * `format_indexes` - List of format identifiers
/// * `custom_formats` - Custom format mappings defined in the workbook
/// * `is_1904` - Whether the workbook uses the 1904 date system
///
/// # Returns
/// Vector of cell types corresponding to each format index
pub(super) fn load_number_formats(format_indexes: Vec<String>, custom_formats: HashMap<String, CellType>, is_1904: bool) -> Vec<CellType> {
    format_indexes
        .iter()
        .map(|id| {
            custom_formats
                .get(id)
                .map(Clone::clone)
                .or_else(|| CellType::parse_builtin_number_format_id(id, is_1904))
                .unwrap_or(CellType::Number)
        })
        .collect()
}

/// Normalizes a path to ensure it points to the correct location within the Excel zip archive
///
/// # Arguments
/// * `path` - Original path from relationship or reference
///
/// # Returns
/// Normalized path suitable for accessing files within the zip archive
pub(crate) fn to_zip_path(path: Cow<'_, str>) -> String {
    if path.starts_with("/xl/") {
        path[1..].to_string()
    } else if path.starts_with("xl/") {
        path.to_string()
    } else {
        format!("xl/{path}")
    }
}

/// Path of the relationships part that belongs to a package part,
/// `xl/worksheets/sheet1.xml` has its relationships in `xl/worksheets/_rels/sheet1.xml.rels`.
pub(crate) fn to_relationships_path(path: &str) -> String {
    match path.rsplit_once('/') {
        Some((directory, file_name)) => format!("{directory}/_rels/{file_name}.rels"),
        None => format!("_rels/{path}.rels"),
    }
}
