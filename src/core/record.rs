//! Session records and their line encoding.
//!
//! A record is an ordered tuple of fields, usually `[timestamp, value...]`.
//! On disk each record is one line of space separated fields. Text fields are
//! percent-escaped so that a field can never contain the separator or a line
//! break, and text that would read as a number has its first character
//! escaped so it reads back as text.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Field {
    Int(i64),
    Float(f64),
    Text(String),
}

impl Field {
    /// Decode one on-disk token.
    ///
    /// Only numbers are written as bare numeric tokens; text never is.
    pub fn parse(token: &str) -> Field {
        if let Ok(i) = token.parse::<i64>() {
            return Field::Int(i);
        }
        if let Ok(f) = token.parse::<f64>() {
            return Field::Float(f);
        }
        Field::Text(unescape(token))
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Field::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Field::Int(i) => Some(*i as f64),
            Field::Float(f) => Some(*f),
            Field::Text(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Field::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Int(i) => write!(f, "{i}"),
            // Debug keeps the decimal point, so 1.0 does not read back as an integer.
            Field::Float(v) => write!(f, "{v:?}"),
            Field::Text(s) => f.write_str(&escape(s)),
        }
    }
}

impl From<i64> for Field {
    fn from(v: i64) -> Self {
        Field::Int(v)
    }
}

impl From<i32> for Field {
    fn from(v: i32) -> Self {
        Field::Int(i64::from(v))
    }
}

impl From<u32> for Field {
    fn from(v: u32) -> Self {
        Field::Int(i64::from(v))
    }
}

impl From<f64> for Field {
    fn from(v: f64) -> Self {
        Field::Float(v)
    }
}

impl From<&str> for Field {
    fn from(v: &str) -> Self {
        Field::Text(v.to_string())
    }
}

impl From<String> for Field {
    fn from(v: String) -> Self {
        Field::Text(v)
    }
}

/// One buffered row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record(Vec<Field>);

impl Record {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Append a field, builder style.
    pub fn with(mut self, field: impl Into<Field>) -> Self {
        self.0.push(field.into());
        self
    }

    pub fn push(&mut self, field: impl Into<Field>) {
        self.0.push(field.into());
    }

    pub fn fields(&self) -> &[Field] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Encode as a single line without the trailing newline.
    pub fn to_line(&self) -> String {
        self.0
            .iter()
            .map(|f| f.to_string())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Decode a line written by [`Record::to_line`].
    pub fn parse_line(line: &str) -> Record {
        let line = line.trim_end_matches(['\n', '\r']);
        if line.is_empty() {
            return Record::new();
        }
        Record(line.split(' ').map(Field::parse).collect())
    }
}

impl From<Vec<Field>> for Record {
    fn from(fields: Vec<Field>) -> Self {
        Self(fields)
    }
}

/// Build a [`Record`] from a list of values convertible into [`Field`].
#[macro_export]
macro_rules! record {
    ($($field:expr),* $(,)?) => {
        $crate::core::record::Record::from(vec![$($crate::core::record::Field::from($field)),*])
    };
}

fn escape(s: &str) -> String {
    if s.is_empty() {
        return "%00".to_string();
    }
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '%' => out.push_str("%25"),
            ' ' => out.push_str("%20"),
            '\n' => out.push_str("%0A"),
            '\r' => out.push_str("%0D"),
            '\t' => out.push_str("%09"),
            c => out.push(c),
        }
    }
    if reads_as_number(&out) {
        // A numeric token starts with an ASCII character.
        let first = format!("%{:02X}", out.as_bytes()[0]);
        out.replace_range(..1, &first);
    }
    out
}

fn reads_as_number(token: &str) -> bool {
    token.parse::<i64>().is_ok() || token.parse::<f64>().is_ok()
}

fn unescape(s: &str) -> String {
    if s == "%00" {
        return String::new();
    }
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let decoded = rest
            .get(pos + 1..pos + 3)
            .filter(|code| code.bytes().all(|b| b.is_ascii_hexdigit()))
            .and_then(|code| u8::from_str_radix(code, 16).ok())
            .filter(u8::is_ascii)
            .map(char::from);
        match decoded {
            Some(c) => {
                out.push(c);
                rest = &rest[pos + 3..];
            }
            None => {
                out.push('%');
                rest = &rest[pos + 1..];
            }
        }
    }
    out.push_str(rest);
    out
}
