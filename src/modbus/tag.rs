//! Modbus tag addresses.
//!
//! # Address Syntax
//!
//! | Area | Long form | Short forms |
//! |------|-----------|-------------|
//! | Coil | `coil:1` | `0x00001`, `000001` |
//! | Discrete input | `discrete-input:1` | `1x00001`, `100001` |
//! | Input register | `input-register:1` | `3x00001`, `300001` |
//! | Holding register | `holding-register:1` | `4x00001`, `400001` |
//! | Extended register | `extended-register:1` | `6x00001`, `6000001` |
//!
//! Every form takes an optional `:TYPE` and `[count]` suffix, as in
//! `holding-register:10:REAL[4]`. Addresses are 1-based; the address put on
//! the wire is one less. Coils and discrete inputs default to BOOL and
//! registers to INT.
//!
//! # Example
//!
//! ```
//! use plc_wire::modbus::{ModbusArea, ModbusDataType, ModbusTag};
//!
//! let tag: ModbusTag = "4x00010:REAL[2]".parse().unwrap();
//! assert_eq!(tag.area, ModbusArea::HoldingRegister);
//! assert_eq!(tag.protocol_address(), 9);
//! assert_eq!(tag.data_type, ModbusDataType::Real);
//! assert_eq!(tag.register_count(), 4);
//! assert_eq!(tag.address_string(), "holding-register:10:REAL[2]");
//! ```

use std::fmt;
use std::str::FromStr;

use once_cell::sync::OnceCell;
use regex::{Captures, Regex};

use crate::error::{CodecError, Result};

/// Highest 1-based address of the coil, discrete input and register areas.
pub const MAX_ADDRESS: u32 = 65536;

/// Highest 1-based extended register address.
pub const MAX_EXTENDED_ADDRESS: u32 = 999_999;

/// Registers per file record when addressing extended registers.
pub const REGISTERS_PER_FILE_RECORD: u32 = 10_000;

struct Patterns {
    long: Regex,
    prefixed: Regex,
    numeric: Regex,
}

static PATTERNS: OnceCell<Patterns> = OnceCell::new();

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| CodecError::invalid_parameter("pattern", e.to_string()))
}

fn patterns() -> Result<&'static Patterns> {
    PATTERNS.get_or_try_init(|| {
        Ok(Patterns {
            long: compile(
                r"^(coil|discrete-input|input-register|holding-register|extended-register):(\d+)(:([a-zA-Z_]+))?(\[(\d+)\])?$",
            )?,
            prefixed: compile(r"^([01346])x(\d{1,6})(:([a-zA-Z_]+))?(\[(\d+)\])?$")?,
            numeric: compile(r"^([01346])(\d{4,6})(:([a-zA-Z_]+))?(\[(\d+)\])?$")?,
        })
    })
}

/// Modbus data table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ModbusArea {
    /// Read/write bits (0x).
    Coil,
    /// Read-only bits (1x).
    DiscreteInput,
    /// Read-only registers (3x).
    InputRegister,
    /// Read/write registers (4x).
    HoldingRegister,
    /// Registers reached through file records (6x).
    ExtendedRegister,
}

impl ModbusArea {
    /// Long-form prefix.
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Coil => "coil",
            Self::DiscreteInput => "discrete-input",
            Self::InputRegister => "input-register",
            Self::HoldingRegister => "holding-register",
            Self::ExtendedRegister => "extended-register",
        }
    }

    fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "coil" => Some(Self::Coil),
            "discrete-input" => Some(Self::DiscreteInput),
            "input-register" => Some(Self::InputRegister),
            "holding-register" => Some(Self::HoldingRegister),
            "extended-register" => Some(Self::ExtendedRegister),
            _ => None,
        }
    }

    fn from_digit(digit: &str) -> Option<Self> {
        match digit {
            "0" => Some(Self::Coil),
            "1" => Some(Self::DiscreteInput),
            "3" => Some(Self::InputRegister),
            "4" => Some(Self::HoldingRegister),
            "6" => Some(Self::ExtendedRegister),
            _ => None,
        }
    }

    /// Returns `true` for the single-bit tables.
    pub fn is_bit_area(self) -> bool {
        matches!(self, Self::Coil | Self::DiscreteInput)
    }

    /// Returns `true` for tables a client may write.
    pub fn is_writable(self) -> bool {
        matches!(self, Self::Coil | Self::HoldingRegister | Self::ExtendedRegister)
    }

    fn max_address(self) -> u32 {
        match self {
            Self::ExtendedRegister => MAX_EXTENDED_ADDRESS,
            _ => MAX_ADDRESS,
        }
    }

    fn default_data_type(self) -> ModbusDataType {
        if self.is_bit_area() {
            ModbusDataType::Bool
        } else {
            ModbusDataType::Int
        }
    }
}

impl fmt::Display for ModbusArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// Element type of a Modbus tag.
///
/// Values wider than a register span consecutive registers, most significant
/// word first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[allow(missing_docs)]
pub enum ModbusDataType {
    Bool,
    Byte,
    Word,
    Dword,
    Lword,
    Sint,
    Int,
    Dint,
    Lint,
    Usint,
    Uint,
    Udint,
    Ulint,
    Real,
    Lreal,
    Char,
    Wchar,
}

impl ModbusDataType {
    /// Every data type.
    pub const ALL: [ModbusDataType; 17] = [
        Self::Bool,
        Self::Byte,
        Self::Word,
        Self::Dword,
        Self::Lword,
        Self::Sint,
        Self::Int,
        Self::Dint,
        Self::Lint,
        Self::Usint,
        Self::Uint,
        Self::Udint,
        Self::Ulint,
        Self::Real,
        Self::Lreal,
        Self::Char,
        Self::Wchar,
    ];

    /// IEC name as used in addresses.
    pub fn name(self) -> &'static str {
        match self {
            Self::Bool => "BOOL",
            Self::Byte => "BYTE",
            Self::Word => "WORD",
            Self::Dword => "DWORD",
            Self::Lword => "LWORD",
            Self::Sint => "SINT",
            Self::Int => "INT",
            Self::Dint => "DINT",
            Self::Lint => "LINT",
            Self::Usint => "USINT",
            Self::Uint => "UINT",
            Self::Udint => "UDINT",
            Self::Ulint => "ULINT",
            Self::Real => "REAL",
            Self::Lreal => "LREAL",
            Self::Char => "CHAR",
            Self::Wchar => "WCHAR",
        }
    }

    /// Looks a type up by name, ignoring case.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.name().eq_ignore_ascii_case(name))
    }

    /// Width of one element.
    pub fn size_in_bits(self) -> u32 {
        match self {
            Self::Bool => 1,
            Self::Byte | Self::Sint | Self::Usint | Self::Char => 8,
            Self::Word | Self::Int | Self::Uint | Self::Wchar => 16,
            Self::Dword | Self::Dint | Self::Udint | Self::Real => 32,
            Self::Lword | Self::Lint | Self::Ulint | Self::Lreal => 64,
        }
    }
}

impl fmt::Display for ModbusDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Where a Modbus value lives and how to interpret it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ModbusTag {
    /// Data table.
    pub area: ModbusArea,
    /// 1-based address as written by users.
    pub address: u32,
    /// Element type.
    pub data_type: ModbusDataType,
    /// Number of elements.
    pub quantity: u16,
}

impl ModbusTag {
    /// Creates a single-element tag.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::InvalidTag` for address 0, addresses beyond the
    /// area, and non-BOOL types in the bit areas.
    ///
    /// # Example
    ///
    /// ```
    /// use plc_wire::modbus::{ModbusArea, ModbusDataType, ModbusTag};
    ///
    /// let tag = ModbusTag::new(ModbusArea::Coil, 20, ModbusDataType::Bool).unwrap();
    /// assert_eq!(tag.protocol_address(), 19);
    /// assert!(ModbusTag::new(ModbusArea::Coil, 0, ModbusDataType::Bool).is_err());
    /// ```
    pub fn new(area: ModbusArea, address: u32, data_type: ModbusDataType) -> Result<Self> {
        let tag = Self {
            area,
            address,
            data_type,
            quantity: 1,
        };
        tag.validate(&tag.address_string())?;
        Ok(tag)
    }

    /// Sets the element count.
    pub fn with_quantity(mut self, quantity: u16) -> Self {
        self.quantity = quantity;
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
        let (area, c) = if let Some(c) = p.long.captures(address) {
            (ModbusArea::from_prefix(&c[1]), c)
        } else if let Some(c) = p.prefixed.captures(address) {
            (ModbusArea::from_digit(&c[1]), c)
        } else if let Some(c) = p.numeric.captures(address) {
            let area = ModbusArea::from_digit(&c[1]);
            if area != Some(ModbusArea::ExtendedRegister) && c[2].len() > 5 {
                return Err(CodecError::invalid_tag(address, "only extended registers take six address digits"));
            }
            (area, c)
        } else {
            return Err(CodecError::invalid_tag(address, "does not match any Modbus address form"));
        };
        let area = area.ok_or_else(|| CodecError::invalid_tag(address, "unknown Modbus area"))?;
        let tag = Self::from_captures(address, area, &c)?;
        tag.validate(address)?;
        Ok(tag)
    }

    fn from_captures(address: &str, area: ModbusArea, c: &Captures<'_>) -> Result<Self> {
        let data_type = match c.get(4) {
            Some(name) => ModbusDataType::from_name(name.as_str())
                .ok_or_else(|| CodecError::invalid_tag(address, format!("unknown data type '{}'", name.as_str())))?,
            None => area.default_data_type(),
        };
        Ok(Self {
            area,
            address: number(address, &c[2])?,
            data_type,
            quantity: c.get(6).map_or(Ok(1), |m| number(address, m.as_str()))?,
        })
    }

    fn validate(&self, address: &str) -> Result<()> {
        if self.address == 0 || self.address > self.area.max_address() {
            return Err(CodecError::invalid_tag(
                address,
                format!("address {} outside 1..={}", self.address, self.area.max_address()),
            ));
        }
        if self.quantity == 0 {
            return Err(CodecError::invalid_tag(address, "quantity must be at least 1"));
        }
        if self.area.is_bit_area() && self.data_type != ModbusDataType::Bool {
            return Err(CodecError::invalid_tag(
                address,
                format!("{} holds single bits, not {}", self.area, self.data_type),
            ));
        }
        Ok(())
    }

    /// 0-based address used in PDUs.
    pub fn protocol_address(&self) -> u32 {
        self.address - 1
    }

    /// Number of coils or registers the tag covers.
    ///
    /// A single sub-register value still occupies a whole register.
    pub fn register_count(&self) -> u32 {
        if self.area.is_bit_area() {
            return u32::from(self.quantity);
        }
        let bits = u32::from(self.quantity) * self.data_type.size_in_bits();
        bits.div_ceil(16).max(1)
    }

    /// Canonical long-form address; parsing it yields an equal tag.
    pub fn address_string(&self) -> String {
        let mut s = format!("{}:{}:{}", self.area.prefix(), self.address, self.data_type.name());
        if self.quantity != 1 {
            s.push_str(&format!("[{}]", self.quantity));
        }
        s
    }
}

impl FromStr for ModbusTag {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for ModbusTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address_string())
    }
}

fn number<T: FromStr>(address: &str, digits: &str) -> Result<T> {
    digits
        .parse()
        .map_err(|_| CodecError::invalid_tag(address, format!("'{}' is out of range", digits)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(address: &str) -> ModbusTag {
        ModbusTag::parse(address).unwrap()
    }

    fn assert_invalid(address: &str) {
        assert!(
            matches!(ModbusTag::parse(address), Err(CodecError::InvalidTag { .. })),
            "{} should be rejected",
            address
        );
    }

    #[test]
    fn test_forms_agree() {
        let long = parse("holding-register:1");
        assert_eq!(long, parse("4x00001"));
        assert_eq!(long, parse("40001"));
        assert_eq!(long, parse("400001"));
        assert_eq!(long.data_type, ModbusDataType::Int);
        assert_eq!(long.protocol_address(), 0);
    }

    #[test]
    fn test_areas_and_defaults() {
        let coil = parse("coil:12");
        assert_eq!(coil.area, ModbusArea::Coil);
        assert_eq!(coil.data_type, ModbusDataType::Bool);
        assert_eq!(parse("1x00005").area, ModbusArea::DiscreteInput);
        assert_eq!(parse("30003:UINT").area, ModbusArea::InputRegister);
        let extended = parse("600012:DINT[3]");
        assert_eq!(extended.area, ModbusArea::ExtendedRegister);
        assert_eq!(extended.address, 12);
        assert_eq!(extended.register_count(), 6);
    }

    #[test]
    fn test_type_and_quantity() {
        let tag = parse("holding-register:100:real[4]");
        assert_eq!(tag.data_type, ModbusDataType::Real);
        assert_eq!(tag.quantity, 4);
        assert_eq!(tag.register_count(), 8);
        assert_eq!(parse("coil:1[20]").register_count(), 20);
    }

    #[test]
    fn test_sub_register_types_round_up() {
        assert_eq!(parse("4x00001:SINT").register_count(), 1);
        assert_eq!(parse("4x00001:BYTE[3]").register_count(), 2);
        assert_eq!(parse("4x00001:BOOL").register_count(), 1);
        assert_eq!(parse("4x00001:BOOL[17]").register_count(), 2);
    }

    #[test]
    fn test_address_string_round_trips() {
        for address in [
            "coil:1",
            "discrete-input:65536[8]",
            "input-register:7:UDINT",
            "4x00010:LREAL[2]",
            "6x100000:WORD",
        ] {
            let tag = parse(address);
            let canonical = tag.address_string();
            assert_eq!(parse(&canonical), tag, "{}", canonical);
        }
    }

    #[test]
    fn test_rejects() {
        assert_invalid("coil:0");
        assert_invalid("holding-register:65537");
        assert_invalid("coil:1:INT");
        assert_invalid("holding-register:1:STRUCT");
        assert_invalid("holding-register:1[0]");
        assert_invalid("2x00001");
        assert_invalid("4000001");
        assert_invalid("register:1");
        assert_invalid("%DB1.DBW0:INT");
        assert!(ModbusTag::parse("6000001").is_ok());
    }
}
