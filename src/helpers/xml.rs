//! Event-level XML access for the workbook parts of both archive formats.

use crate::error::DecodeError;
use quick_xml::escape::resolve_xml_entity;
use quick_xml::events::BytesRef;
use quick_xml::events::BytesStart;
use quick_xml::events::BytesText;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::borrow::Cow;
use std::io::BufRead;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum XmlError {
    #[error("Unknown XML entity '&{0};'")]
    UnknownEntity(String),

    #[error("Invalid value '{value}' for attribute '{name}'")]
    InvalidAttributeValue { name: String, value: String },
}

/// Pull reader over one archive part, reusing a single event buffer.
pub(crate) struct XmlReader<R: BufRead> {
    reader: Reader<R>,
    buffer: Vec<u8>,
}

impl<R: BufRead> XmlReader<R> {
    /// `<f/>` and `<f></f>` produce the same events, and text keeps its whitespace.
    pub(crate) fn new(source: R) -> XmlReader<R> {
        let mut reader = Reader::from_reader(source);
        let config = reader.config_mut();
        config.check_comments = false;
        config.check_end_names = false;
        config.expand_empty_elements = true;
        config.trim_text(false);
        XmlReader {
            reader,
            buffer: Vec::with_capacity(1024),
        }
    }

    /// Next event, `None` once the document ends.
    pub(crate) fn next(&'_ mut self) -> Result<Option<Event<'_>>, DecodeError> {
        self.buffer.clear();
        match self.reader.read_event_into(&mut self.buffer)? {
            Event::Eof => Ok(None),
            event => Ok(Some(event)),
        }
    }
}

/// Attribute lookup on start tags.
pub(crate) trait AttributeLookup<'a> {
    /// Unescaped value of the attribute with this qualified name.
    fn get_attribute_value(&'a self, name: &str) -> Result<Option<Cow<'a, str>>, DecodeError>;

    /// Unescaped value of the first attribute with this local name, whatever its prefix.
    /// Relationship ids are usually written `r:id`, but the prefix is not fixed.
    fn get_local_attribute_value(&'a self, local_name: &str) -> Result<Option<Cow<'a, str>>, DecodeError>;

    fn parse_attribute_value<T: FromStr>(&'a self, name: &str) -> Result<Option<T>, DecodeError>;
}

impl<'a> AttributeLookup<'a> for BytesStart<'a> {
    fn get_attribute_value(&'a self, name: &str) -> Result<Option<Cow<'a, str>>, DecodeError> {
        match self.try_get_attribute(name)? {
            Some(attribute) => Ok(Some(attribute.unescape_value()?)),
            None => Ok(None),
        }
    }

    fn get_local_attribute_value(&'a self, local_name: &str) -> Result<Option<Cow<'a, str>>, DecodeError> {
        for attribute in self.attributes() {
            let attribute = attribute?;
            if attribute.key.local_name().as_ref() == local_name.as_bytes() {
                return Ok(Some(attribute.unescape_value()?));
            }
        }
        Ok(None)
    }

    fn parse_attribute_value<T: FromStr>(&'a self, name: &str) -> Result<Option<T>, DecodeError> {
        let Some(value) = self.get_attribute_value(name)? else {
            return Ok(None);
        };
        match value.parse() {
            Ok(parsed) => Ok(Some(parsed)),
            Err(_) => Err(XmlError::InvalidAttributeValue {
                name: name.to_owned(),
                value: value.into_owned(),
            }
            .into()),
        }
    }
}

/// Accumulates character data split across text and reference events.
pub(crate) trait PushXmlText {
    fn push_bytes_text(&mut self, text: &BytesText) -> Result<(), DecodeError>;

    /// Resolves `&#...;` character references and the predefined entities.
    fn push_bytes_ref(&mut self, reference: &BytesRef) -> Result<(), DecodeError>;
}

impl PushXmlText for String {
    fn push_bytes_text(&mut self, text: &BytesText) -> Result<(), DecodeError> {
        self.push_str(&text.xml_content()?);
        Ok(())
    }

    fn push_bytes_ref(&mut self, reference: &BytesRef) -> Result<(), DecodeError> {
        if let Some(character) = reference.resolve_char_ref()? {
            self.push(character);
            return Ok(());
        }
        let name = reference.xml_content()?;
        let entity = resolve_xml_entity(&name).ok_or_else(|| XmlError::UnknownEntity(name.to_string()))?;
        self.push_str(entity);
        Ok(())
    }
}

/// Drives an `XmlReader` until end of document, dispatching each event to the given match arms.
/// Unmatched events are ignored; `break` inside an arm stops reading.
#[macro_export]
macro_rules! match_xml_events {
    ($reader:expr => { $($arms:tt)* }) => {
        while let Some(result) = $reader.next()? {
            match result {
                Event::Eof => break,
                $($arms)*
                _ => (),
            }
        }
    };
}
