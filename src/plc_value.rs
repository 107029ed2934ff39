//! Typed process values exchanged with a PLC.
//!
//! [`PlcValue`] is what tag reads decode into and what tag writes encode
//! from. Variant names follow the IEC 61131-3 elementary types; the wire
//! representation is decided by each protocol's data item codec.
//!
//! # Example
//!
//! ```
//! use plc_wire::PlcValue;
//!
//! let v = PlcValue::Int(-12);
//! assert_eq!(v.as_i64(), Some(-12));
//! assert_eq!(v.type_name(), "INT");
//!
//! let list = PlcValue::List(vec![PlcValue::Bool(true), PlcValue::Bool(false)]);
//! assert_eq!(list.to_string(), "[true, false]");
//! ```

use std::fmt;

/// A calendar timestamp as carried by S7 `DATE_AND_TIME`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DateAndTime {
    /// Full year, 1990..=2089.
    pub year: u16,
    /// Month, 1..=12.
    pub month: u8,
    /// Day of month, 1..=31.
    pub day: u8,
    /// Hour, 0..=23.
    pub hour: u8,
    /// Minute, 0..=59.
    pub minute: u8,
    /// Second, 0..=59.
    pub second: u8,
    /// Millisecond, 0..=999.
    pub millisecond: u16,
    /// Day of week, 1 (Sunday) ..= 7.
    pub weekday: u8,
}

impl DateAndTime {
    /// Creates a timestamp with zero milliseconds and an unset weekday.
    ///
    /// # Example
    ///
    /// ```
    /// use plc_wire::DateAndTime;
    ///
    /// let dt = DateAndTime::new(2024, 3, 15, 12, 30, 5);
    /// assert_eq!(dt.to_string(), "2024-03-15T12:30:05.000");
    /// ```
    pub fn new(year: u16, month: u8, day: u8, hour: u8, minute: u8, second: u8) -> Self {
        Self {
            year,
            month,
            day,
            hour,
            minute,
            second,
            millisecond: 0,
            weekday: 0,
        }
    }

    /// Sets the millisecond part.
    pub fn with_millisecond(mut self, millisecond: u16) -> Self {
        self.millisecond = millisecond;
        self
    }

    /// Sets the day of week (1 = Sunday).
    pub fn with_weekday(mut self, weekday: u8) -> Self {
        self.weekday = weekday;
        self
    }
}

impl fmt::Display for DateAndTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:03}",
            self.year, self.month, self.day, self.hour, self.minute, self.second, self.millisecond
        )
    }
}

/// A single value, or a list of values, read from or written to a tag.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PlcValue {
    /// No value, e.g. for a failed item.
    Null,
    /// BOOL.
    Bool(bool),
    /// BYTE (bit string of 8).
    Byte(u8),
    /// WORD (bit string of 16).
    Word(u16),
    /// DWORD (bit string of 32).
    DWord(u32),
    /// LWORD (bit string of 64).
    LWord(u64),
    /// SINT.
    SInt(i8),
    /// USINT.
    USInt(u8),
    /// INT.
    Int(i16),
    /// UINT.
    UInt(u16),
    /// DINT.
    DInt(i32),
    /// UDINT.
    UDInt(u32),
    /// LINT.
    LInt(i64),
    /// ULINT.
    ULInt(u64),
    /// REAL.
    Real(f32),
    /// LREAL.
    LReal(f64),
    /// CHAR (single byte).
    Char(char),
    /// WCHAR (UTF-16 code unit).
    WChar(char),
    /// STRING.
    String(String),
    /// WSTRING.
    WString(String),
    /// TIME in milliseconds.
    Time(i64),
    /// LTIME in nanoseconds.
    LTime(i64),
    /// DATE as days since 1990-01-01.
    Date(u16),
    /// TIME_OF_DAY in milliseconds since midnight.
    TimeOfDay(u32),
    /// DATE_AND_TIME.
    DateAndTime(DateAndTime),
    /// Array of values.
    List(Vec<PlcValue>),
}

impl PlcValue {
    /// IEC type name of the variant.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Bool(_) => "BOOL",
            Self::Byte(_) => "BYTE",
            Self::Word(_) => "WORD",
            Self::DWord(_) => "DWORD",
            Self::LWord(_) => "LWORD",
            Self::SInt(_) => "SINT",
            Self::USInt(_) => "USINT",
            Self::Int(_) => "INT",
            Self::UInt(_) => "UINT",
            Self::DInt(_) => "DINT",
            Self::UDInt(_) => "UDINT",
            Self::LInt(_) => "LINT",
            Self::ULInt(_) => "ULINT",
            Self::Real(_) => "REAL",
            Self::LReal(_) => "LREAL",
            Self::Char(_) => "CHAR",
            Self::WChar(_) => "WCHAR",
            Self::String(_) => "STRING",
            Self::WString(_) => "WSTRING",
            Self::Time(_) => "TIME",
            Self::LTime(_) => "LTIME",
            Self::Date(_) => "DATE",
            Self::TimeOfDay(_) => "TIME_OF_DAY",
            Self::DateAndTime(_) => "DATE_AND_TIME",
            Self::List(_) => "LIST",
        }
    }

    /// Returns `true` for [`PlcValue::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Boolean view: `Bool` directly, integers when they are 0 or 1.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            other => match other.as_i64()? {
                0 => Some(false),
                1 => Some(true),
                _ => None,
            },
        }
    }

    /// Signed integer view of every integral variant.
    ///
    /// Returns `None` for non-integers and for a `LWord`/`ULInt` above `i64::MAX`.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Self::Bool(b) => Some(i64::from(b)),
            Self::Byte(v) | Self::USInt(v) => Some(i64::from(v)),
            Self::Word(v) | Self::UInt(v) | Self::Date(v) => Some(i64::from(v)),
            Self::DWord(v) | Self::UDInt(v) | Self::TimeOfDay(v) => Some(i64::from(v)),
            Self::LWord(v) | Self::ULInt(v) => i64::try_from(v).ok(),
            Self::SInt(v) => Some(i64::from(v)),
            Self::Int(v) => Some(i64::from(v)),
            Self::DInt(v) => Some(i64::from(v)),
            Self::LInt(v) | Self::Time(v) | Self::LTime(v) => Some(v),
            _ => None,
        }
    }

    /// Unsigned integer view; `None` for negative values.
    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            Self::LWord(v) | Self::ULInt(v) => Some(v),
            _ => self.as_i64().and_then(|v| u64::try_from(v).ok()),
        }
    }

    /// Floating point view of every numeric variant.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Self::Real(v) => Some(f64::from(v)),
            Self::LReal(v) => Some(v),
            Self::LWord(v) | Self::ULInt(v) => Some(v as f64),
            _ => self.as_i64().map(|v| v as f64),
        }
    }

    /// Text view of the string and character variants.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) | Self::WString(s) => Some(s),
            _ => None,
        }
    }

    /// Character view.
    pub fn as_char(&self) -> Option<char> {
        match self {
            Self::Char(c) | Self::WChar(c) => Some(*c),
            Self::String(s) | Self::WString(s) => {
                let mut chars = s.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Some(c),
                    _ => None,
                }
            }
            _ => None,
        }
    }

    /// List view.
    pub fn as_list(&self) -> Option<&[PlcValue]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// Number of elements: the list length, 0 for `Null`, 1 otherwise.
    pub fn len(&self) -> usize {
        match self {
            Self::List(items) => items.len(),
            Self::Null => 0,
            _ => 1,
        }
    }

    /// Returns `true` when [`len`](Self::len) is 0.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Elements as a slice: the list items, or the value itself.
    pub fn elements(&self) -> &[PlcValue] {
        match self {
            Self::List(items) => items,
            Self::Null => &[],
            other => std::slice::from_ref(other),
        }
    }
}

impl fmt::Display for PlcValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(v) => write!(f, "{}", v),
            Self::Byte(v) => write!(f, "16#{:02X}", v),
            Self::Word(v) => write!(f, "16#{:04X}", v),
            Self::DWord(v) => write!(f, "16#{:08X}", v),
            Self::LWord(v) => write!(f, "16#{:016X}", v),
            Self::Real(v) => write!(f, "{}", v),
            Self::LReal(v) => write!(f, "{}", v),
            Self::Char(c) | Self::WChar(c) => write!(f, "'{}'", c),
            Self::String(s) | Self::WString(s) => write!(f, "'{}'", s),
            Self::Time(ms) => write!(f, "T#{}ms", ms),
            Self::LTime(ns) => write!(f, "LT#{}ns", ns),
            Self::Date(days) => write!(f, "D#+{}d", days),
            Self::TimeOfDay(ms) => {
                let (h, rest) = (ms / 3_600_000, ms % 3_600_000);
                write!(f, "TOD#{:02}:{:02}:{:02}.{:03}", h, rest / 60_000, (rest / 1000) % 60, rest % 1000)
            }
            Self::DateAndTime(dt) => write!(f, "DT#{}", dt),
            Self::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            other => match other.as_i64() {
                Some(v) => write!(f, "{}", v),
                None => write!(f, "{:?}", other),
            },
        }
    }
}

impl From<bool> for PlcValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i16> for PlcValue {
    fn from(v: i16) -> Self {
        Self::Int(v)
    }
}

impl From<u16> for PlcValue {
    fn from(v: u16) -> Self {
        Self::Word(v)
    }
}

impl From<i32> for PlcValue {
    fn from(v: i32) -> Self {
        Self::DInt(v)
    }
}

impl From<f32> for PlcValue {
    fn from(v: f32) -> Self {
        Self::Real(v)
    }
}

impl From<f64> for PlcValue {
    fn from(v: f64) -> Self {
        Self::LReal(v)
    }
}

impl From<&str> for PlcValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<Vec<PlcValue>> for PlcValue {
    fn from(v: Vec<PlcValue>) -> Self {
        Self::List(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_views() {
        assert_eq!(PlcValue::SInt(-3).as_i64(), Some(-3));
        assert_eq!(PlcValue::SInt(-3).as_u64(), None);
        assert_eq!(PlcValue::ULInt(u64::MAX).as_u64(), Some(u64::MAX));
        assert_eq!(PlcValue::ULInt(u64::MAX).as_i64(), None);
        assert_eq!(PlcValue::Real(1.5).as_i64(), None);
        assert_eq!(PlcValue::Word(0x1234).as_f64(), Some(4660.0));
    }

    #[test]
    fn test_bool_view() {
        assert_eq!(PlcValue::Bool(true).as_bool(), Some(true));
        assert_eq!(PlcValue::Byte(1).as_bool(), Some(true));
        assert_eq!(PlcValue::Byte(2).as_bool(), None);
    }

    #[test]
    fn test_char_view() {
        assert_eq!(PlcValue::String("a".into()).as_char(), Some('a'));
        assert_eq!(PlcValue::String("ab".into()).as_char(), None);
        assert_eq!(PlcValue::WChar('€').as_char(), Some('€'));
    }

    #[test]
    fn test_elements() {
        assert!(PlcValue::Null.is_empty());
        assert_eq!(PlcValue::Int(1).elements(), &[PlcValue::Int(1)]);
        let list = PlcValue::List(vec![PlcValue::Int(1), PlcValue::Int(2)]);
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn test_display() {
        assert_eq!(PlcValue::Word(0xAB).to_string(), "16#00AB");
        assert_eq!(PlcValue::Int(-7).to_string(), "-7");
        assert_eq!(PlcValue::TimeOfDay(3_723_004).to_string(), "TOD#01:02:03.004");
        let dt = DateAndTime::new(1999, 12, 31, 23, 59, 58).with_millisecond(7);
        assert_eq!(PlcValue::DateAndTime(dt).to_string(), "DT#1999-12-31T23:59:58.007");
    }
}
