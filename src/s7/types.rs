//! Closed enums of the S7 and ISO-on-TCP protocols.
//!
//! # Transport sizes
//!
//! | Type | Code | Short | Bytes | DataTransportSize |
//! |------|:----:|:-----:|:-----:|-------------------|
//! | BOOL | 0x01 | X | 1 | BIT |
//! | BYTE | 0x02 | B | 1 | BYTE_WORD_DWORD |
//! | WORD | 0x04 | W | 2 | BYTE_WORD_DWORD |
//! | DWORD | 0x06 | D | 4 | BYTE_WORD_DWORD |
//! | INT | 0x05 | W | 2 | INTEGER |
//! | DINT | 0x07 | D | 4 | INTEGER |
//! | REAL | 0x08 | D | 4 | REAL |
//! | CHAR | 0x03 | B | 1 | BYTE_WORD_DWORD |
//! | STRING | 0x03 | X | 1 | BYTE_WORD_DWORD |
//!
//! Several types share a wire code; decoding a code yields the first
//! declared type that uses it.
//!
//! # Example
//!
//! ```
//! use plc_wire::s7::{MemoryArea, TransportSize};
//!
//! assert_eq!(TransportSize::from_name("DINT"), Some(TransportSize::Dint));
//! assert_eq!(TransportSize::Dint.code(), 0x07);
//! assert_eq!(MemoryArea::from_short_name("DB"), Some(MemoryArea::DataBlocks));
//! assert_eq!(MemoryArea::DataBlocks.to_string(), "DB");
//! ```

use std::fmt;

/// Data type of an S7 variable as requested in an any-pointer address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[allow(missing_docs)]
pub enum TransportSize {
    Bool,
    Byte,
    Word,
    Dword,
    Lword,
    Int,
    Uint,
    Sint,
    Usint,
    Dint,
    Udint,
    Lint,
    Ulint,
    Real,
    Lreal,
    Char,
    Wchar,
    String,
    Wstring,
    Time,
    Ltime,
    Date,
    TimeOfDay,
    Tod,
    DateAndTime,
    Dt,
}

impl TransportSize {
    /// Every transport size in declaration order.
    pub const ALL: [TransportSize; 26] = [
        Self::Bool,
        Self::Byte,
        Self::Word,
        Self::Dword,
        Self::Lword,
        Self::Int,
        Self::Uint,
        Self::Sint,
        Self::Usint,
        Self::Dint,
        Self::Udint,
        Self::Lint,
        Self::Ulint,
        Self::Real,
        Self::Lreal,
        Self::Char,
        Self::Wchar,
        Self::String,
        Self::Wstring,
        Self::Time,
        Self::Ltime,
        Self::Date,
        Self::TimeOfDay,
        Self::Tod,
        Self::DateAndTime,
        Self::Dt,
    ];

    /// Code written into the any-pointer address.
    pub fn code(self) -> u8 {
        match self {
            Self::Bool => 0x01,
            Self::Byte | Self::Sint | Self::Usint => 0x02,
            Self::Char | Self::String => 0x03,
            Self::Word => 0x04,
            Self::Int | Self::Uint => 0x05,
            Self::Dword | Self::TimeOfDay | Self::Tod => 0x06,
            Self::Dint | Self::Udint => 0x07,
            Self::Real => 0x08,
            Self::Date => 0x09,
            Self::Time => 0x0B,
            Self::DateAndTime | Self::Dt => 0x0F,
            Self::Wchar => 0x13,
            Self::Lreal => 0x30,
            Self::Lword | Self::Lint | Self::Ulint | Self::Wstring | Self::Ltime => 0x00,
        }
    }

    /// Size prefix letter used in addresses (`DBX`, `DBB`, `DBW`, `DBD`).
    pub fn short_name(self) -> char {
        match self {
            Self::Byte | Self::Sint | Self::Usint | Self::Char => 'B',
            Self::Word | Self::Int | Self::Uint => 'W',
            Self::Dword | Self::Dint | Self::Udint | Self::Real => 'D',
            _ => 'X',
        }
    }

    /// Size of one element in bytes.
    pub fn size_in_bytes(self) -> usize {
        match self {
            Self::Bool | Self::Byte | Self::Sint | Self::Usint | Self::Char | Self::String => 1,
            Self::Word | Self::Int | Self::Uint | Self::Wchar | Self::Wstring | Self::Date => 2,
            Self::Dword | Self::Dint | Self::Udint | Self::Real | Self::Time | Self::TimeOfDay | Self::Tod => 4,
            Self::Lword | Self::Lint | Self::Ulint | Self::Lreal | Self::Ltime | Self::DateAndTime | Self::Dt => 8,
        }
    }

    /// The type this one is a variant of, if any.
    pub fn base_type(self) -> Option<TransportSize> {
        match self {
            Self::Dword => Some(Self::Word),
            Self::Uint | Self::Sint | Self::Usint | Self::Dint | Self::Udint | Self::Lint | Self::Ulint => {
                Some(Self::Int)
            }
            Self::Lreal => Some(Self::Real),
            Self::Ltime => Some(Self::Time),
            _ => None,
        }
    }

    /// Transport size used for data items of this type, if it has one.
    pub fn data_transport_size(self) -> Option<DataTransportSize> {
        match self {
            Self::Bool => Some(DataTransportSize::Bit),
            Self::Byte
            | Self::Word
            | Self::Dword
            | Self::Sint
            | Self::Usint
            | Self::Char
            | Self::String
            | Self::Date
            | Self::TimeOfDay
            | Self::Tod => Some(DataTransportSize::ByteWordDword),
            Self::Int | Self::Uint | Self::Dint | Self::Udint => Some(DataTransportSize::Integer),
            Self::Real => Some(DataTransportSize::Real),
            _ => None,
        }
    }

    /// Whether S7-300/400 CPUs accept this type.
    pub fn supported_s7_300(self) -> bool {
        !matches!(
            self,
            Self::Lword
                | Self::Uint
                | Self::Sint
                | Self::Usint
                | Self::Udint
                | Self::Lint
                | Self::Ulint
                | Self::Lreal
                | Self::Wchar
                | Self::Wstring
                | Self::Ltime
        )
    }

    /// Whether S7-1200 CPUs accept this type.
    pub fn supported_s7_1200(self) -> bool {
        !matches!(
            self,
            Self::Lword | Self::Lint | Self::Ulint | Self::Ltime | Self::DateAndTime | Self::Dt
        )
    }

    /// Upper-case IEC name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Bool => "BOOL",
            Self::Byte => "BYTE",
            Self::Word => "WORD",
            Self::Dword => "DWORD",
            Self::Lword => "LWORD",
            Self::Int => "INT",
            Self::Uint => "UINT",
            Self::Sint => "SINT",
            Self::Usint => "USINT",
            Self::Dint => "DINT",
            Self::Udint => "UDINT",
            Self::Lint => "LINT",
            Self::Ulint => "ULINT",
            Self::Real => "REAL",
            Self::Lreal => "LREAL",
            Self::Char => "CHAR",
            Self::Wchar => "WCHAR",
            Self::String => "STRING",
            Self::Wstring => "WSTRING",
            Self::Time => "TIME",
            Self::Ltime => "LTIME",
            Self::Date => "DATE",
            Self::TimeOfDay => "TIME_OF_DAY",
            Self::Tod => "TOD",
            Self::DateAndTime => "DATE_AND_TIME",
            Self::Dt => "DT",
        }
    }

    /// Looks up a type by its IEC name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.name() == name)
    }

    /// Looks up the first declared type with the given wire code.
    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.code() == code)
    }
}

impl fmt::Display for TransportSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Transport size of a data item in a read response or write request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataTransportSize {
    /// No data (error items).
    Null,
    /// Single bit; the length field counts bits.
    Bit,
    /// Byte, word or double word; the length field counts bits.
    ByteWordDword,
    /// Integer; the length field counts bits.
    Integer,
    /// Double integer.
    Dinteger,
    /// Real; the length field counts bytes.
    Real,
    /// Raw octets; the length field counts bytes.
    OctetString,
}

impl DataTransportSize {
    /// Every size in declaration order.
    pub const ALL: [DataTransportSize; 7] = [
        Self::Null,
        Self::Bit,
        Self::ByteWordDword,
        Self::Integer,
        Self::Dinteger,
        Self::Real,
        Self::OctetString,
    ];

    /// Wire code.
    pub fn code(self) -> u8 {
        match self {
            Self::Null => 0x00,
            Self::Bit => 0x03,
            Self::ByteWordDword => 0x04,
            Self::Integer => 0x05,
            Self::Dinteger => 0x06,
            Self::Real => 0x07,
            Self::OctetString => 0x09,
        }
    }

    /// Whether the item's length field is expressed in bits.
    pub fn size_in_bits(self) -> bool {
        matches!(self, Self::Bit | Self::ByteWordDword | Self::Integer)
    }

    /// Decodes a wire code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x00 => Some(Self::Null),
            0x03 => Some(Self::Bit),
            0x04 => Some(Self::ByteWordDword),
            0x05 => Some(Self::Integer),
            0x06 => Some(Self::Dinteger),
            0x07 => Some(Self::Real),
            0x09 => Some(Self::OctetString),
            _ => None,
        }
    }
}

/// Per-item return code in S7 payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataTransportErrorCode {
    /// Reserved, used in requests.
    Reserved,
    /// Success.
    Ok,
    /// Access to the object denied.
    AccessDenied,
    /// Address out of range.
    InvalidAddress,
    /// Data type not supported.
    DataTypeNotSupported,
    /// Object does not exist.
    NotFound,
}

impl DataTransportErrorCode {
    /// Every return code in declaration order.
    pub const ALL: [DataTransportErrorCode; 6] = [
        Self::Reserved,
        Self::Ok,
        Self::AccessDenied,
        Self::InvalidAddress,
        Self::DataTypeNotSupported,
        Self::NotFound,
    ];

    /// Wire code.
    pub fn code(self) -> u8 {
        match self {
            Self::Reserved => 0x00,
            Self::Ok => 0xFF,
            Self::AccessDenied => 0x03,
            Self::InvalidAddress => 0x05,
            Self::DataTypeNotSupported => 0x06,
            Self::NotFound => 0x0A,
        }
    }

    /// Decodes a wire code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x00 => Some(Self::Reserved),
            0xFF => Some(Self::Ok),
            0x03 => Some(Self::AccessDenied),
            0x05 => Some(Self::InvalidAddress),
            0x06 => Some(Self::DataTypeNotSupported),
            0x0A => Some(Self::NotFound),
            _ => None,
        }
    }
}

/// Memory areas addressable through an S7 any-pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MemoryArea {
    /// Counters (`C`).
    Counters,
    /// Timers (`T`).
    Timers,
    /// Direct peripheral access (`D`).
    DirectPeripheralAccess,
    /// Process image inputs (`I`).
    Inputs,
    /// Process image outputs (`Q`).
    Outputs,
    /// Flags / markers (`M`).
    FlagsMarkers,
    /// Data blocks (`DB`).
    DataBlocks,
    /// Instance data blocks (`DBI`).
    InstanceDataBlocks,
    /// Local data (`LD`).
    LocalData,
}

impl MemoryArea {
    /// Every area in declaration order.
    pub const ALL: [MemoryArea; 9] = [
        Self::Counters,
        Self::Timers,
        Self::DirectPeripheralAccess,
        Self::Inputs,
        Self::Outputs,
        Self::FlagsMarkers,
        Self::DataBlocks,
        Self::InstanceDataBlocks,
        Self::LocalData,
    ];

    /// Area code in the any-pointer.
    pub fn code(self) -> u8 {
        match self {
            Self::Counters => 0x1C,
            Self::Timers => 0x1D,
            Self::DirectPeripheralAccess => 0x80,
            Self::Inputs => 0x81,
            Self::Outputs => 0x82,
            Self::FlagsMarkers => 0x83,
            Self::DataBlocks => 0x84,
            Self::InstanceDataBlocks => 0x85,
            Self::LocalData => 0x86,
        }
    }

    /// Area letter(s) used in address strings.
    pub fn short_name(self) -> &'static str {
        match self {
            Self::Counters => "C",
            Self::Timers => "T",
            Self::DirectPeripheralAccess => "D",
            Self::Inputs => "I",
            Self::Outputs => "Q",
            Self::FlagsMarkers => "M",
            Self::DataBlocks => "DB",
            Self::InstanceDataBlocks => "DBI",
            Self::LocalData => "LD",
        }
    }

    /// Decodes an area code.
    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.code() == code)
    }

    /// Looks up an area by its address letter(s).
    pub fn from_short_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.short_name() == name)
    }
}

impl fmt::Display for MemoryArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

/// Maximum TPDU size negotiated in a COTP connection request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum CotpTpduSize {
    Size128,
    Size256,
    Size512,
    Size1024,
    Size2048,
    Size4096,
    Size8192,
}

impl CotpTpduSize {
    /// Every size, smallest first.
    pub const ALL: [CotpTpduSize; 7] = [
        Self::Size128,
        Self::Size256,
        Self::Size512,
        Self::Size1024,
        Self::Size2048,
        Self::Size4096,
        Self::Size8192,
    ];

    /// Wire code.
    pub fn code(self) -> u8 {
        match self {
            Self::Size128 => 0x07,
            Self::Size256 => 0x08,
            Self::Size512 => 0x09,
            Self::Size1024 => 0x0A,
            Self::Size2048 => 0x0B,
            Self::Size4096 => 0x0C,
            Self::Size8192 => 0x0D,
        }
    }

    /// TPDU size in bytes.
    pub fn size_in_bytes(self) -> u16 {
        1 << self.code()
    }

    /// Decodes a wire code.
    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.code() == code)
    }

    /// Largest TPDU size not exceeding `bytes`, at least 128.
    pub fn for_size(bytes: u16) -> Self {
        Self::ALL
            .into_iter()
            .rev()
            .find(|s| s.size_in_bytes() <= bytes)
            .unwrap_or(Self::Size128)
    }
}

/// COTP transport protocol class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum CotpProtocolClass {
    Class0,
    Class1,
    Class2,
    Class3,
    Class4,
}

impl CotpProtocolClass {
    /// Every class in ascending order.
    pub const ALL: [CotpProtocolClass; 5] = [Self::Class0, Self::Class1, Self::Class2, Self::Class3, Self::Class4];

    /// Wire code.
    pub fn code(self) -> u8 {
        match self {
            Self::Class0 => 0x00,
            Self::Class1 => 0x10,
            Self::Class2 => 0x20,
            Self::Class3 => 0x30,
            Self::Class4 => 0x40,
        }
    }

    /// Decodes a wire code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x00 => Some(Self::Class0),
            0x10 => Some(Self::Class1),
            0x20 => Some(Self::Class2),
            0x30 => Some(Self::Class3),
            0x40 => Some(Self::Class4),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_size_names_round_trip() {
        for t in TransportSize::ALL {
            assert_eq!(TransportSize::from_name(t.name()), Some(t));
        }
        assert_eq!(TransportSize::from_name("int"), None);
    }

    #[test]
    fn test_shared_codes_decode_to_first_declared() {
        assert_eq!(TransportSize::from_code(0x05), Some(TransportSize::Int));
        assert_eq!(TransportSize::from_code(0x02), Some(TransportSize::Byte));
        assert_eq!(TransportSize::from_code(0x03), Some(TransportSize::Char));
        assert_eq!(TransportSize::from_code(0x00), Some(TransportSize::Lword));
        assert_eq!(TransportSize::from_code(0x55), None);
    }

    #[test]
    fn test_transport_size_properties() {
        assert_eq!(TransportSize::Real.data_transport_size(), Some(DataTransportSize::Real));
        assert_eq!(TransportSize::Lreal.data_transport_size(), None);
        assert_eq!(TransportSize::Lreal.base_type(), Some(TransportSize::Real));
        assert_eq!(TransportSize::Dt.size_in_bytes(), 8);
        assert_eq!(TransportSize::Int.short_name(), 'W');
        assert!(!TransportSize::Lreal.supported_s7_300());
        assert!(TransportSize::Lreal.supported_s7_1200());
    }

    #[test]
    fn test_data_transport_size_units() {
        assert!(DataTransportSize::Bit.size_in_bits());
        assert!(DataTransportSize::Integer.size_in_bits());
        assert!(!DataTransportSize::Real.size_in_bits());
        assert!(!DataTransportSize::OctetString.size_in_bits());
        assert_eq!(DataTransportSize::from_code(0x09), Some(DataTransportSize::OctetString));
    }

    #[test]
    fn test_memory_area_codes() {
        assert_eq!(MemoryArea::from_code(0x84), Some(MemoryArea::DataBlocks));
        assert_eq!(MemoryArea::from_short_name("Q"), Some(MemoryArea::Outputs));
        assert_eq!(MemoryArea::from_short_name("X"), None);
        assert_eq!(MemoryArea::Inputs.code(), 0x81);
    }

    #[test]
    fn test_tpdu_size() {
        assert_eq!(CotpTpduSize::Size1024.size_in_bytes(), 1024);
        assert_eq!(CotpTpduSize::from_code(0x0A), Some(CotpTpduSize::Size1024));
        assert_eq!(CotpTpduSize::for_size(1000), CotpTpduSize::Size512);
        assert_eq!(CotpTpduSize::for_size(10), CotpTpduSize::Size128);
        assert_eq!(CotpProtocolClass::from_code(0x40), Some(CotpProtocolClass::Class4));
    }
}
