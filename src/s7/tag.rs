//! S7 tag addresses.
//!
//! # Address Syntax
//!
//! | Form | Example |
//! |------|---------|
//! | Data block string | `%DB1.DBX10:STRING(20)` |
//! | Data block string, short | `%DB1:10:WSTRING(20)[2]` |
//! | Data block | `%DB100.DBW4:INT`, `%DB1.DBX0.3:BOOL` |
//! | Data block, short | `%DB100:4:INT[10]` |
//! | Raw any-pointer | `10-05-00-01-00-01-84-00-00-10` |
//! | Other areas | `%MW20:WORD`, `%IX0.0:BOOL`, `%Q1:BYTE` |
//!
//! Forms are tried top to bottom; the first match wins. Addresses are
//! case-sensitive and may not contain whitespace.
//!
//! # Example
//!
//! ```
//! use plc_wire::s7::{MemoryArea, S7Tag, TransportSize};
//!
//! let tag: S7Tag = "%DB100.DBW4:INT[10]".parse().unwrap();
//! assert_eq!(tag.memory_area, MemoryArea::DataBlocks);
//! assert_eq!(tag.block_number, 100);
//! assert_eq!(tag.byte_offset, 4);
//! assert_eq!(tag.data_type, TransportSize::Int);
//! assert_eq!(tag.num_elements, 10);
//! assert_eq!(tag.address_string().as_deref(), Some("%DB100.DBW4:INT[10]"));
//! ```

use std::fmt;
use std::str::FromStr;

use once_cell::sync::OnceCell;
use regex::{Captures, Regex};

use crate::error::{CodecError, Result};
use crate::field::Message;

use super::message::{S7Address, S7AddressAny, MAX_BYTE_ADDRESS};
use super::types::{MemoryArea, TransportSize};

/// String length assumed when a STRING/WSTRING tag does not give one.
pub const DEFAULT_STRING_LENGTH: u16 = 254;

/// Highest data block number accepted in addresses.
pub const MAX_BLOCK_NUMBER: u16 = 64000;

struct Patterns {
    db_string: Regex,
    db_string_short: Regex,
    db: Regex,
    db_short: Regex,
    plc_proxy: Regex,
    plain: Regex,
}

static PATTERNS: OnceCell<Patterns> = OnceCell::new();

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| CodecError::invalid_parameter("pattern", e.to_string()))
}

fn patterns() -> Result<&'static Patterns> {
    PATTERNS.get_or_try_init(|| {
        Ok(Patterns {
            db_string: compile(
                r"^%DB(\d{1,5})\.DB([XBWD]?)(\d{1,7})(\.([0-7]))?:(STRING|WSTRING)\((\d{1,3})\)(\[(\d+)\])?$",
            )?,
            db_string_short: compile(r"^%DB(\d{1,5}):(\d{1,7})(\.([0-7]))?:(STRING|WSTRING)\((\d{1,3})\)(\[(\d+)\])?$")?,
            db: compile(r"^%DB(\d{1,5})\.DB([XBWD]?)(\d{1,7})(\.([0-7]))?:([a-zA-Z_]+)(\[(\d+)\])?$")?,
            db_short: compile(r"^%DB(\d{1,5}):(\d{1,7})(\.([0-7]))?:([a-zA-Z_]+)(\[(\d+)\])?$")?,
            plc_proxy: compile(r"^[0-9A-F]{2}(-[0-9A-F]{2}){9}$")?,
            plain: compile(r"^%(.)([XBWD]?)(\d{1,7})(\.([0-7]))?:([a-zA-Z_]+)(\[(\d+)\])?$")?,
        })
    })
}

/// Where an S7 value lives and how to transfer it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct S7Tag {
    /// Element type.
    pub data_type: TransportSize,
    /// Memory area.
    pub memory_area: MemoryArea,
    /// Data block number, 0 outside data blocks.
    pub block_number: u16,
    /// Byte offset within the area or block.
    pub byte_offset: u32,
    /// Bit offset, only meaningful for BOOL.
    pub bit_offset: u8,
    /// Number of consecutive elements.
    pub num_elements: u16,
    /// Declared maximum length of STRING/WSTRING elements.
    pub string_length: Option<u16>,
}

impl S7Tag {
    /// Creates a tag for a single element, without validation.
    ///
    /// # Example
    ///
    /// ```
    /// use plc_wire::s7::{MemoryArea, S7Tag, TransportSize};
    ///
    /// let tag = S7Tag::new(TransportSize::Word, MemoryArea::FlagsMarkers, 0, 20, 0);
    /// assert_eq!(tag.address_string().as_deref(), Some("%MW20:WORD"));
    /// ```
    pub fn new(data_type: TransportSize, memory_area: MemoryArea, block_number: u16, byte_offset: u32, bit_offset: u8) -> Self {
        Self {
            data_type,
            memory_area,
            block_number,
            byte_offset,
            bit_offset,
            num_elements: 1,
            string_length: None,
        }
    }

    /// Sets the element count.
    pub fn with_num_elements(mut self, num_elements: u16) -> Self {
        self.num_elements = num_elements;
        self
    }

    /// Sets the STRING/WSTRING length.
    pub fn with_string_length(mut self, string_length: u16) -> Self {
        self.string_length = Some(string_length);
        self
    }

    /// Parses an address string.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::InvalidTag` when no address form matches or the
    /// matched values are out of range.
    pub fn parse(address: &str) -> Result<Self> {
        let p = patterns()?;
        if let Some(c) = p.db_string.captures(address) {
            let data_type = data_type(address, &c[6])?;
            let tag = Self {
                data_type,
                memory_area: MemoryArea::DataBlocks,
                block_number: block_number(address, &c[1])?,
                byte_offset: byte_offset(address, &c[3])?,
                bit_offset: bit_offset(address, c.get(5).map(|m| m.as_str()), data_type)?,
                num_elements: num_elements(address, c.get(9).map(|m| m.as_str()))?,
                string_length: Some(number(address, &c[7])?),
            };
            check_size_code(address, &c[2], data_type)?;
            return Ok(tag);
        }
        if let Some(c) = p.db_string_short.captures(address) {
            let data_type = data_type(address, &c[5])?;
            return Ok(Self {
                data_type,
                memory_area: MemoryArea::DataBlocks,
                block_number: block_number(address, &c[1])?,
                byte_offset: byte_offset(address, &c[2])?,
                bit_offset: bit_offset(address, c.get(4).map(|m| m.as_str()), data_type)?,
                num_elements: num_elements(address, c.get(8).map(|m| m.as_str()))?,
                string_length: Some(number(address, &c[6])?),
            });
        }
        if let Some(c) = p.db.captures(address) {
            let data_type = data_type(address, &c[6])?;
            check_size_code(address, &c[2], data_type)?;
            return Ok(Self {
                data_type,
                memory_area: MemoryArea::DataBlocks,
                block_number: block_number(address, &c[1])?,
                byte_offset: byte_offset(address, &c[3])?,
                bit_offset: bit_offset(address, c.get(5).map(|m| m.as_str()), data_type)?,
                num_elements: num_elements(address, c.get(8).map(|m| m.as_str()))?,
                string_length: None,
            });
        }
        if let Some(c) = p.db_short.captures(address) {
            let data_type = data_type(address, &c[5])?;
            return Ok(Self {
                data_type,
                memory_area: MemoryArea::DataBlocks,
                block_number: block_number(address, &c[1])?,
                byte_offset: byte_offset(address, &c[2])?,
                bit_offset: bit_offset(address, c.get(4).map(|m| m.as_str()), data_type)?,
                num_elements: num_elements(address, c.get(7).map(|m| m.as_str()))?,
                string_length: None,
            });
        }
        if p.plc_proxy.is_match(address) {
            return Self::from_proxy_address(address);
        }
        if let Some(c) = p.plain.captures(address) {
            return Self::from_plain(address, &c);
        }
        Err(CodecError::invalid_tag(address, "does not match any S7 address form"))
    }

    fn from_plain(address: &str, c: &Captures<'_>) -> Result<Self> {
        let memory_area = MemoryArea::from_short_name(&c[1])
            .ok_or_else(|| CodecError::invalid_tag(address, format!("unknown memory area '{}'", &c[1])))?;
        let data_type = data_type(address, &c[6])?;
        check_size_code(address, &c[2], data_type)?;
        let bit_offset = bit_offset(address, c.get(5).map(|m| m.as_str()), data_type)?;
        if bit_offset > 0 && data_type != TransportSize::Bool {
            return Err(CodecError::invalid_tag(
                address,
                "a bit offset other than 0 is only supported for BOOL",
            ));
        }
        Ok(Self {
            data_type,
            memory_area,
            block_number: 0,
            byte_offset: byte_offset(address, &c[3])?,
            bit_offset,
            num_elements: num_elements(address, c.get(8).map(|m| m.as_str()))?,
            string_length: None,
        })
    }

    fn from_proxy_address(address: &str) -> Result<Self> {
        let bytes = address
            .split('-')
            .map(|b| u8::from_str_radix(b, 16))
            .collect::<std::result::Result<Vec<u8>, _>>()
            .map_err(|e| CodecError::invalid_tag(address, e.to_string()))?;
        let S7Address::Any(any) =
            S7Address::from_bytes(&bytes, ()).map_err(|e| CodecError::invalid_tag(address, e.to_string()))?;
        if any.transport_size != TransportSize::Bool && any.bit_address != 0 {
            return Err(CodecError::invalid_tag(
                address,
                "a bit offset other than 0 is only supported for BOOL",
            ));
        }
        Ok(Self {
            data_type: any.transport_size,
            memory_area: any.area,
            block_number: any.db_number,
            byte_offset: any.byte_address,
            bit_offset: any.bit_address,
            num_elements: any.number_of_elements,
            string_length: None,
        })
    }

    /// STRING/WSTRING length, defaulting to [`DEFAULT_STRING_LENGTH`].
    pub fn effective_string_length(&self) -> u16 {
        self.string_length.unwrap_or(DEFAULT_STRING_LENGTH)
    }

    /// Canonical address string, if this tag has one.
    ///
    /// Instance data blocks and local data have no textual form; neither do
    /// tags outside data blocks that carry a string length.
    pub fn address_string(&self) -> Option<String> {
        let mut s = match self.memory_area {
            MemoryArea::DataBlocks => format!(
                "%DB{}.DB{}{}",
                self.block_number,
                self.data_type.short_name(),
                self.byte_offset
            ),
            MemoryArea::InstanceDataBlocks | MemoryArea::LocalData => return None,
            area => {
                if self.string_length.is_some() {
                    return None;
                }
                format!("%{}{}{}", area.short_name(), self.data_type.short_name(), self.byte_offset)
            }
        };
        if self.data_type == TransportSize::Bool || self.bit_offset != 0 {
            s.push_str(&format!(".{}", self.bit_offset));
        }
        s.push(':');
        s.push_str(self.data_type.name());
        if let Some(len) = self.string_length {
            s.push_str(&format!("({})", len));
        }
        if self.num_elements != 1 {
            s.push_str(&format!("[{}]", self.num_elements));
        }
        Some(s)
    }

    /// Any-pointer that requests this tag's data.
    ///
    /// Time and date types are requested as raw bytes and strings as
    /// characters including their two (STRING) or four (WSTRING) byte header.
    pub fn to_address(&self) -> Result<S7AddressAny> {
        let n = u32::from(self.num_elements);
        let (transport_size, count) = match self.data_type {
            TransportSize::Time
            | TransportSize::Ltime
            | TransportSize::Date
            | TransportSize::TimeOfDay
            | TransportSize::Tod
            | TransportSize::DateAndTime
            | TransportSize::Dt => (TransportSize::Byte, n * self.data_type.size_in_bytes() as u32),
            TransportSize::String => (TransportSize::Char, n * (u32::from(self.effective_string_length()) + 2)),
            TransportSize::Wstring => (
                TransportSize::Char,
                n * (u32::from(self.effective_string_length()) + 2) * 2,
            ),
            other => (other, n),
        };
        let number_of_elements = u16::try_from(count).map_err(|_| {
            CodecError::invalid_parameter("numElements", format!("{} transfer elements exceed 65535", count))
        })?;
        Ok(S7AddressAny {
            transport_size,
            number_of_elements,
            db_number: self.block_number,
            area: self.memory_area,
            byte_address: self.byte_offset,
            bit_address: self.bit_offset,
        })
    }
}

impl FromStr for S7Tag {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for S7Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.address_string() {
            Some(s) => f.write_str(&s),
            None => write!(
                f,
                "{}:{}.{}:{}[{}]",
                self.memory_area, self.byte_offset, self.bit_offset, self.data_type, self.num_elements
            ),
        }
    }
}

fn number<T: FromStr>(address: &str, digits: &str) -> Result<T> {
    digits
        .parse()
        .map_err(|_| CodecError::invalid_tag(address, format!("'{}' is out of range", digits)))
}

fn data_type(address: &str, name: &str) -> Result<TransportSize> {
    TransportSize::from_name(name)
        .ok_or_else(|| CodecError::invalid_tag(address, format!("unknown data type '{}'", name)))
}

fn block_number(address: &str, digits: &str) -> Result<u16> {
    let n: u32 = number(address, digits)?;
    if n < 1 || n > u32::from(MAX_BLOCK_NUMBER) {
        return Err(CodecError::invalid_tag(
            address,
            format!("block number {} outside 1..={}", n, MAX_BLOCK_NUMBER),
        ));
    }
    Ok(n as u16)
}

fn byte_offset(address: &str, digits: &str) -> Result<u32> {
    let n: u32 = number(address, digits)?;
    if n > MAX_BYTE_ADDRESS {
        return Err(CodecError::invalid_tag(
            address,
            format!("byte offset {} exceeds {}", n, MAX_BYTE_ADDRESS),
        ));
    }
    Ok(n)
}

fn bit_offset(address: &str, digit: Option<&str>, data_type: TransportSize) -> Result<u8> {
    match digit {
        Some(d) => number(address, d),
        None if data_type == TransportSize::Bool => {
            Err(CodecError::invalid_tag(address, "expected a bit offset for BOOL"))
        }
        None => Ok(0),
    }
}

fn num_elements(address: &str, digits: Option<&str>) -> Result<u16> {
    digits.map_or(Ok(1), |d| number(address, d))
}

fn check_size_code(address: &str, code: &str, data_type: TransportSize) -> Result<()> {
    match code.chars().next() {
        Some(c) if c != data_type.short_name() => Err(CodecError::invalid_tag(
            address,
            format!("transfer size code '{}' does not match {}", c, data_type),
        )),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(address: &str) -> S7Tag {
        S7Tag::parse(address).unwrap()
    }

    fn assert_invalid(address: &str) {
        assert!(
            matches!(S7Tag::parse(address), Err(CodecError::InvalidTag { .. })),
            "{} should be rejected",
            address
        );
    }

    #[test]
    fn test_db_forms() {
        let tag = parse("%DB1.DBX0.3:BOOL");
        assert_eq!(tag, S7Tag::new(TransportSize::Bool, MemoryArea::DataBlocks, 1, 0, 3));

        let short = parse("%DB100:4:INT[10]");
        assert_eq!(short.data_type, TransportSize::Int);
        assert_eq!(short.byte_offset, 4);
        assert_eq!(short.num_elements, 10);
    }

    #[test]
    fn test_string_forms() {
        let tag = parse("%DB1.DBX10:STRING(20)");
        assert_eq!(tag.string_length, Some(20));
        assert_eq!(tag.effective_string_length(), 20);

        let short = parse("%DB2:8:WSTRING(5)[2]");
        assert_eq!(short.data_type, TransportSize::Wstring);
        assert_eq!(short.string_length, Some(5));
        assert_eq!(short.num_elements, 2);

        let no_length = parse("%DB1.DBX0:STRING");
        assert_eq!(no_length.string_length, None);
        assert_eq!(no_length.effective_string_length(), DEFAULT_STRING_LENGTH);
    }

    #[test]
    fn test_plain_forms() {
        let tag = parse("%IX0.0:BOOL");
        assert_eq!(tag.memory_area, MemoryArea::Inputs);
        assert_eq!(tag.block_number, 0);

        let tag = parse("%MW20:WORD");
        assert_eq!(tag.memory_area, MemoryArea::FlagsMarkers);
        assert_eq!(tag.byte_offset, 20);

        let tag = parse("%Q1:BYTE[4]");
        assert_eq!(tag.memory_area, MemoryArea::Outputs);
        assert_eq!(tag.num_elements, 4);
    }

    #[test]
    fn test_proxy_address() {
        let tag = parse("10-05-00-01-00-01-84-00-00-10");
        assert_eq!(tag.data_type, TransportSize::Int);
        assert_eq!(tag.memory_area, MemoryArea::DataBlocks);
        assert_eq!(tag.block_number, 1);
        assert_eq!(tag.byte_offset, 2);
        assert_invalid("10-05-00-01-00-01-84-00-00-11");
    }

    #[test]
    fn test_rejections() {
        assert_invalid("%DB0.DBW0:INT");
        assert_invalid("%DB64001.DBW0:INT");
        assert_invalid("%DB1.DBX0:BOOL");
        assert_invalid("%DB1.DBB0:INT");
        assert_invalid("%DB1.DBW0:FOO");
        assert_invalid("%MW0.1:WORD");
        assert_invalid("%Z0:BYTE");
        assert_invalid("%MB2097152:BYTE");
        assert_invalid("%DB1.DBW0:INT ");
        assert_invalid("DB1.DBW0:INT");
    }

    #[test]
    fn test_address_string_round_trip() {
        for address in [
            "%DB1.DBX0.3:BOOL",
            "%DB100.DBW4:INT[10]",
            "%DB1.DBX10:STRING(20)",
            "%DB5.DBD8:REAL",
            "%IX0.0:BOOL",
            "%MW20:WORD",
            "%QB1:BYTE[4]",
            "%DB1.DBX0:LREAL",
        ] {
            let tag = parse(address);
            assert_eq!(tag.address_string().as_deref(), Some(address));
            assert_eq!(parse(&tag.to_string()), tag);
        }
        assert_eq!(parse("%DB2:8:WSTRING(5)").address_string().as_deref(), Some("%DB2.DBX8:WSTRING(5)"));
    }

    #[test]
    fn test_areas_without_address_string() {
        let tag = S7Tag::new(TransportSize::Int, MemoryArea::LocalData, 0, 0, 0);
        assert_eq!(tag.address_string(), None);
        let tag = S7Tag::new(TransportSize::String, MemoryArea::FlagsMarkers, 0, 0, 0).with_string_length(10);
        assert_eq!(tag.address_string(), None);
    }

    #[test]
    fn test_to_address() {
        let any = parse("%DB1.DBX10:STRING(20)[2]").to_address().unwrap();
        assert_eq!(any.transport_size, TransportSize::Char);
        assert_eq!(any.number_of_elements, 44);

        let any = parse("%DB1.DBX0:WSTRING(10)").to_address().unwrap();
        assert_eq!(any.number_of_elements, 24);

        let any = parse("%DB1.DBX0:DATE_AND_TIME[2]").to_address().unwrap();
        assert_eq!(any.transport_size, TransportSize::Byte);
        assert_eq!(any.number_of_elements, 16);

        let any = parse("%MD4:REAL").to_address().unwrap();
        assert_eq!(any.transport_size, TransportSize::Real);
        assert_eq!(any.area, MemoryArea::FlagsMarkers);
        assert_eq!(any.db_number, 0);
    }
}
