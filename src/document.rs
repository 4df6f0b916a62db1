//! # Workbook Document Model
//!
//! The normalized tabular form a workbook is decoded into, cleaned, compressed, and stored as.
//!
//! Serialized shape (one object per sheet, keyed by the sheet name):
//!
//! ```json
//! [{"Sheet1": [{"Name": {"raw_value": "Ann", "row_str_value": "Ann", "formula": null, "data_type": "string"}}]}]
//! ```
//!
//! Rows and manifests are insertion ordered: column order follows the source sheet,
//! which a JSON object keyed by column name has to preserve.
use serde::de::Error as _;
use serde::de::MapAccess;
use serde::de::Visitor;
use serde::ser::SerializeMap;
use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde::Serializer;
use serde_json::Value;
use std::fmt;

/// Which of the three value kinds a cell holds.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    #[serde(rename = "string")]
    Text,
    Number,
    Boolean,
}

/// Decoded value of a cell. Dates are already normalized to ISO-8601 text.
#[derive(Clone, Debug, PartialEq)]
pub enum CellValue {
    Text(String),
    Number(f64),
    Boolean(bool),
}

impl CellValue {
    /// The kind tag of this value, fixed when the value was decoded.
    pub fn kind(&self) -> ValueKind {
        match self {
            CellValue::Text(_) => ValueKind::Text,
            CellValue::Number(_) => ValueKind::Number,
            CellValue::Boolean(_) => ValueKind::Boolean,
        }
    }
}

/// One decoded cell.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(into = "CellWire", try_from = "CellWire")]
pub struct CellRecord {
    pub value: CellValue,
    /// Human readable rendering, when the source supplies or implies one.
    pub display_text: Option<String>,
    /// Opaque source formula, never evaluated.
    pub formula: Option<String>,
    pub hyperlink: Option<String>,
}

impl CellRecord {
    /// A plain value cell without display text, formula, or hyperlink.
    pub fn new(value: CellValue) -> Self {
        CellRecord {
            value,
            display_text: None,
            formula: None,
            hyperlink: None,
        }
    }

    pub fn value_kind(&self) -> ValueKind {
        self.value.kind()
    }
}

/// Wire form of a cell, field names kept compatible with already stored payloads.
#[derive(Serialize, Deserialize)]
struct CellWire {
    raw_value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    row_str_value: Option<String>,
    #[serde(default)]
    formula: Option<String>,
    data_type: ValueKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    hyperlink: Option<String>,
}

impl From<CellRecord> for CellWire {
    fn from(cell: CellRecord) -> Self {
        let data_type = cell.value_kind();
        let raw_value = match cell.value {
            CellValue::Text(text) => Value::String(text),
            // Non-finite numbers are rejected at decode time, `Null` is unreachable in practice.
            CellValue::Number(number) => serde_json::Number::from_f64(number).map(Value::Number).unwrap_or(Value::Null),
            CellValue::Boolean(boolean) => Value::Bool(boolean),
        };
        CellWire {
            raw_value,
            row_str_value: cell.display_text,
            formula: cell.formula,
            data_type,
            hyperlink: cell.hyperlink,
        }
    }
}

impl TryFrom<CellWire> for CellRecord {
    type Error = String;

    fn try_from(wire: CellWire) -> Result<Self, Self::Error> {
        let value = match (wire.data_type, wire.raw_value) {
            (ValueKind::Text, Value::String(text)) => CellValue::Text(text),
            (ValueKind::Number, Value::Number(number)) => CellValue::Number(
                number.as_f64().ok_or_else(|| format!("number '{number}' out of range"))?,
            ),
            (ValueKind::Boolean, Value::Bool(boolean)) => CellValue::Boolean(boolean),
            (kind, raw) => return Err(format!("raw_value {raw} does not match data_type {kind:?}")),
        };
        Ok(CellRecord {
            value,
            display_text: wire.row_str_value,
            formula: wire.formula,
            hyperlink: wire.hyperlink,
        })
    }
}

/// One data row: column name to cell, in source column order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RowRecord {
    cells: Vec<(String, CellRecord)>,
}

impl RowRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a cell under a column name.
    /// An existing column keeps its position and takes the new cell.
    pub fn insert(&mut self, column: impl Into<String>, cell: CellRecord) {
        let column = column.into();
        match self.cells.iter_mut().find(|(name, _)| *name == column) {
            Some((_, existing)) => *existing = cell,
            None => self.cells.push((column, cell)),
        }
    }

    pub fn get(&self, column: &str) -> Option<&CellRecord> {
        self.cells.iter().find(|(name, _)| name == column).map(|(_, cell)| cell)
    }

    /// Number of populated columns.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.cells.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &CellRecord)> {
        self.cells.iter().map(|(name, cell)| (name.as_str(), cell))
    }
}

impl Serialize for RowRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.cells.len()))?;
        for (name, cell) in &self.cells {
            map.serialize_entry(name, cell)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for RowRecord {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct RowVisitor;

        impl<'de> Visitor<'de> for RowVisitor {
            type Value = RowRecord;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a map of column name to cell")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<RowRecord, A::Error> {
                let mut row = RowRecord::new();
                while let Some((name, cell)) = access.next_entry::<String, CellRecord>()? {
                    row.insert(name, cell);
                }
                Ok(row)
            }
        }

        deserializer.deserialize_map(RowVisitor)
    }
}

/// A named sheet and its data rows. The header row is never part of `rows`.
#[derive(Clone, Debug, PartialEq)]
pub struct SheetRecord {
    pub name: String,
    pub rows: Vec<RowRecord>,
}

impl Serialize for SheetRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(&self.name, &self.rows)?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for SheetRecord {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct SheetVisitor;

        impl<'de> Visitor<'de> for SheetVisitor {
            type Value = SheetRecord;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a map with exactly one sheet name")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<SheetRecord, A::Error> {
                let (name, rows) = access
                    .next_entry::<String, Vec<RowRecord>>()?
                    .ok_or_else(|| A::Error::custom("sheet entry is empty"))?;
                if access.next_key::<String>()?.is_some() {
                    return Err(A::Error::custom(format!("sheet entry '{name}' has more than one key")));
                }
                Ok(SheetRecord { name, rows })
            }
        }

        deserializer.deserialize_map(SheetVisitor)
    }
}

/// All sheets of a workbook in source order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkbookDocument {
    pub sheets: Vec<SheetRecord>,
}

impl WorkbookDocument {
    pub fn new(sheets: Vec<SheetRecord>) -> Self {
        WorkbookDocument { sheets }
    }

    pub fn sheet(&self, name: &str) -> Option<&SheetRecord> {
        self.sheets.iter().find(|sheet| sheet.name == name)
    }
}

/// Sheet name to the column names of its first data row.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ColumnManifest {
    entries: Vec<(String, Vec<String>)>,
}

impl ColumnManifest {
    /// Builds the manifest of a (cleaned) document.
    /// A sheet without rows maps to an empty column list.
    pub fn from_document(document: &WorkbookDocument) -> Self {
        let entries = document
            .sheets
            .iter()
            .map(|sheet| {
                let columns = sheet
                    .rows
                    .first()
                    .map(|row| row.columns().map(str::to_owned).collect())
                    .unwrap_or_default();
                (sheet.name.to_owned(), columns)
            })
            .collect();
        ColumnManifest { entries }
    }

    pub fn columns(&self, sheet: &str) -> Option<&[String]> {
        self.entries.iter().find(|(name, _)| name == sheet).map(|(_, columns)| columns.as_slice())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// JSON text as stored in the `all_columns` and `allowed_columns` fields.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl Serialize for ColumnManifest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (sheet, columns) in &self.entries {
            map.serialize_entry(sheet, columns)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ColumnManifest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ManifestVisitor;

        impl<'de> Visitor<'de> for ManifestVisitor {
            type Value = ColumnManifest;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a map of sheet name to column names")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<ColumnManifest, A::Error> {
                let mut entries = Vec::new();
                while let Some(entry) = access.next_entry::<String, Vec<String>>()? {
                    entries.push(entry);
                }
                Ok(ColumnManifest { entries })
            }
        }

        deserializer.deserialize_map(ManifestVisitor)
    }
}
