//! Outbound record framing.
//!
//! Every record is `<tag>,<field>[,<field>]*` followed by CRLF on the wire. The first
//! character of the tag gives its routing class.

use std::fmt;

/// Routing class taken from the first tag character.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordClass {
    /// `p` records.
    Parameter,
    /// `d` records.
    Data,
    /// `f` records.
    File,
    /// `x` records.
    Debug,
    /// Anything else.
    Other,
}

/// Fields carried by a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fields {
    /// One decimal value.
    Single(i64),
    /// Two decimal values.
    Dual(i64, i64),
    /// Free text, sent as is.
    Text(String),
}

/// One outbound protocol record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Record tag, e.g. `dB3` or `fE`.
    pub tag: String,
    /// Comma-separated payload.
    pub fields: Fields,
}

impl Record {
    /// `tag,value`
    pub fn single(tag: impl Into<String>, value: impl Into<i64>) -> Self {
        Self {
            tag: tag.into(),
            fields: Fields::Single(value.into()),
        }
    }

    /// `tag,value1,value2`
    pub fn dual(tag: impl Into<String>, first: impl Into<i64>, second: impl Into<i64>) -> Self {
        Self {
            tag: tag.into(),
            fields: Fields::Dual(first.into(), second.into()),
        }
    }

    /// `tag,text`
    pub fn text(tag: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            fields: Fields::Text(text.into()),
        }
    }

    /// Which output path the record belongs to.
    pub fn class(&self) -> RecordClass {
        match self.tag.as_bytes().first() {
            Some(b'p') => RecordClass::Parameter,
            Some(b'd') => RecordClass::Data,
            Some(b'f') => RecordClass::File,
            Some(b'D') => RecordClass::Debug,
            _ => RecordClass::Other,
        }
    }

    /// The record as sent, CRLF included.
    pub fn to_wire(&self) -> String {
        format!("{self}\r\n")
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.fields {
            Fields::Single(v) => write!(f, "{},{}", self.tag, v),
            Fields::Dual(a, b) => write!(f, "{},{},{}", self.tag, a, b),
            Fields::Text(s) => write!(f, "{},{}", self.tag, s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_match_wire_layout() {
        assert_eq!(Record::single("fE", 0).to_wire(), "fE,0\r\n");
        assert_eq!(Record::dual("dB1", -57, 3441).to_wire(), "dB1,-57,3441\r\n");
        assert_eq!(
            Record::text("dE", "Data Acquisition System,1.00").to_wire(),
            "dE,Data Acquisition System,1.00\r\n"
        );
    }

    #[test]
    fn class_follows_first_character() {
        assert_eq!(Record::single("pH", 0).class(), RecordClass::Parameter);
        assert_eq!(Record::single("ds", 0).class(), RecordClass::Data);
        assert_eq!(Record::single("fE", 0).class(), RecordClass::File);
        assert_eq!(Record::text("D", "x").class(), RecordClass::Debug);
    }
}
