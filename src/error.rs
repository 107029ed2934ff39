//! Error types for the wire codecs.

use std::io;
use thiserror::Error;

/// Result type alias for codec operations.
pub type Result<T> = std::result::Result<T, CodecError>;

/// Errors that can occur while parsing, serializing or framing messages.
#[derive(Debug, Error)]
pub enum CodecError {
    /// A read ran past the end of the buffer.
    #[error("End of data in '{context}' at bit {position}: requested {requested} bits, {remaining} remaining")]
    EndOfData {
        /// Field or context being read.
        context: String,
        /// Bit position where the read started.
        position: u64,
        /// Number of bits requested.
        requested: u64,
        /// Number of bits left in the buffer.
        remaining: u64,
    },

    /// No concrete type matched the discriminator value(s) of a family.
    #[error("Unsupported discriminator for '{type_name}' at bit {position}: {value}")]
    UnsupportedDiscriminator {
        /// Name of the discriminated family.
        type_name: String,
        /// Rendered discriminator value or tuple.
        value: String,
        /// Bit position where the concrete type had to be chosen.
        position: u64,
    },

    /// A reserved field held an unexpected value (fatal only in strict mode).
    #[error("Reserved field '{field}' at bit {position}: expected 0x{expected:X}, got 0x{actual:X}")]
    ReservedValueMismatch {
        /// Field name.
        field: String,
        /// Bit position of the field.
        position: u64,
        /// Expected constant.
        expected: u64,
        /// Value found on the wire.
        actual: u64,
    },

    /// A const field held an unexpected value.
    #[error("Const field '{field}' at bit {position}: expected 0x{expected:X}, got 0x{actual:X}")]
    ConstValueMismatch {
        /// Field name.
        field: String,
        /// Bit position of the field.
        position: u64,
        /// Expected constant.
        expected: u64,
        /// Value found on the wire.
        actual: u64,
    },

    /// A checksum did not match the computed value.
    #[error("Checksum field '{field}' at bit {position}: expected 0x{expected:X}, got 0x{actual:X}")]
    ChecksumMismatch {
        /// Field name.
        field: String,
        /// Bit position of the field.
        position: u64,
        /// Computed checksum.
        expected: u64,
        /// Checksum found on the wire.
        actual: u64,
    },

    /// An expression could not be parsed or evaluated.
    #[error("Invalid expression: {reason}")]
    InvalidExpression {
        /// Description of the problem.
        reason: String,
    },

    /// An address string did not match any known tag syntax.
    #[error("Invalid tag '{address}': {reason}")]
    InvalidTag {
        /// Offending address string.
        address: String,
        /// Description of the problem.
        reason: String,
    },

    /// A value could not be encoded into its declared wire representation.
    #[error("Cannot encode '{field}': {reason}")]
    Encoding {
        /// Field name.
        field: String,
        /// Description of the problem.
        reason: String,
    },

    /// A numeric value has no matching member in an enum.
    #[error("Unknown value {value} for enum '{type_name}' in '{field}' at bit {position}")]
    UnknownEnumValue {
        /// Enum name.
        type_name: String,
        /// Field holding the value.
        field: String,
        /// Bit position of the field.
        position: u64,
        /// Raw value.
        value: u64,
    },

    /// Invalid parameter provided.
    #[error("Invalid parameter '{parameter}': {reason}")]
    InvalidParameter {
        /// Name of the invalid parameter.
        parameter: String,
        /// Description of why the parameter is invalid.
        reason: String,
    },

    /// A frame on the byte stream is malformed.
    #[error("Invalid frame in '{context}'{}: {reason}", at_bit(.position))]
    InvalidFrame {
        /// Frame, section or field that is malformed.
        context: String,
        /// Bit position within the decoded buffer, when the error comes from one.
        position: Option<u64>,
        /// Description of the framing error.
        reason: String,
    },

    /// Communication timeout.
    #[error("Communication timeout")]
    Timeout,

    /// I/O error during communication.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl CodecError {
    /// Creates a new `EndOfData` error.
    pub fn end_of_data(context: impl Into<String>, position: u64, requested: u64, remaining: u64) -> Self {
        Self::EndOfData {
            context: context.into(),
            position,
            requested,
            remaining,
        }
    }

    /// Creates a new `UnsupportedDiscriminator` error.
    ///
    /// # Example
    ///
    /// ```
    /// use plc_wire::CodecError;
    ///
    /// let err = CodecError::unsupported_discriminator("COTPPacket", "0x42", 8);
    /// assert_eq!(err.to_string(), "Unsupported discriminator for 'COTPPacket' at bit 8: 0x42");
    /// ```
    pub fn unsupported_discriminator(type_name: impl Into<String>, value: impl Into<String>, position: u64) -> Self {
        Self::UnsupportedDiscriminator {
            type_name: type_name.into(),
            value: value.into(),
            position,
        }
    }

    /// Creates a new `InvalidExpression` error.
    ///
    /// # Example
    ///
    /// ```
    /// use plc_wire::CodecError;
    ///
    /// let err = CodecError::invalid_expression("unknown variable 'foo'");
    /// ```
    pub fn invalid_expression(reason: impl Into<String>) -> Self {
        Self::InvalidExpression {
            reason: reason.into(),
        }
    }

    /// Creates a new `InvalidTag` error.
    ///
    /// # Example
    ///
    /// ```
    /// use plc_wire::CodecError;
    ///
    /// let err = CodecError::invalid_tag("%Z0:INT", "unknown memory area");
    /// ```
    pub fn invalid_tag(address: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidTag {
            address: address.into(),
            reason: reason.into(),
        }
    }

    /// Creates a new `Encoding` error.
    pub fn encoding(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Encoding {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Creates a new `UnknownEnumValue` error.
    pub fn unknown_enum_value(type_name: impl Into<String>, field: impl Into<String>, position: u64, value: u64) -> Self {
        Self::UnknownEnumValue {
            type_name: type_name.into(),
            field: field.into(),
            position,
            value,
        }
    }

    /// Creates a new `ChecksumMismatch` error.
    pub fn checksum_mismatch(field: impl Into<String>, position: u64, expected: u64, actual: u64) -> Self {
        Self::ChecksumMismatch {
            field: field.into(),
            position,
            expected,
            actual,
        }
    }

    /// Creates a new `InvalidParameter` error.
    ///
    /// # Example
    ///
    /// ```
    /// use plc_wire::CodecError;
    ///
    /// let err = CodecError::invalid_parameter("quantity", "must be greater than 0");
    /// ```
    pub fn invalid_parameter(parameter: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            parameter: parameter.into(),
            reason: reason.into(),
        }
    }

    /// Creates a new `InvalidFrame` error for a whole frame or stream.
    ///
    /// # Example
    ///
    /// ```
    /// use plc_wire::CodecError;
    ///
    /// let err = CodecError::invalid_frame("MBAP", "protocol id 0x0001");
    /// assert_eq!(err.to_string(), "Invalid frame in 'MBAP': protocol id 0x0001");
    /// ```
    pub fn invalid_frame(context: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidFrame {
            context: context.into(),
            position: None,
            reason: reason.into(),
        }
    }

    /// Creates a new `InvalidFrame` error at a position of a decoded buffer.
    pub fn invalid_frame_at(context: impl Into<String>, position: u64, reason: impl Into<String>) -> Self {
        Self::InvalidFrame {
            context: context.into(),
            position: Some(position),
            reason: reason.into(),
        }
    }

    /// Returns `true` if the error means more input is needed, rather than bad input.
    pub fn is_end_of_data(&self) -> bool {
        matches!(self, Self::EndOfData { .. })
    }

    /// Bit position of a decoding error, if it carries one.
    pub fn position(&self) -> Option<u64> {
        match self {
            Self::EndOfData { position, .. }
            | Self::UnsupportedDiscriminator { position, .. }
            | Self::ReservedValueMismatch { position, .. }
            | Self::ConstValueMismatch { position, .. }
            | Self::ChecksumMismatch { position, .. }
            | Self::UnknownEnumValue { position, .. } => Some(*position),
            Self::InvalidFrame { position, .. } => *position,
            _ => None,
        }
    }
}

fn at_bit(position: &Option<u64>) -> String {
    position.map(|p| format!(" at bit {}", p)).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_end_of_data_display() {
        let err = CodecError::end_of_data("tpduReference", 32, 16, 8);
        assert_eq!(
            err.to_string(),
            "End of data in 'tpduReference' at bit 32: requested 16 bits, 8 remaining"
        );
        assert!(err.is_end_of_data());
    }

    #[test]
    fn test_const_mismatch_display() {
        let err = CodecError::ConstValueMismatch {
            field: "protocolId".to_string(),
            position: 0,
            expected: 0x32,
            actual: 0x33,
        };
        assert_eq!(
            err.to_string(),
            "Const field 'protocolId' at bit 0: expected 0x32, got 0x33"
        );
        assert!(!err.is_end_of_data());
    }

    #[test]
    fn test_invalid_tag_display() {
        let err = CodecError::invalid_tag("%DB0.DBX0.0:BOOL", "block number out of range");
        assert_eq!(
            err.to_string(),
            "Invalid tag '%DB0.DBX0.0:BOOL': block number out of range"
        );
    }

    #[test]
    fn test_timeout_display() {
        let err = CodecError::Timeout;
        assert_eq!(err.to_string(), "Communication timeout");
    }

    #[test]
    fn test_unknown_enum_display() {
        let err = CodecError::unknown_enum_value("MemoryArea", "area", 64, 0x99);
        assert_eq!(err.to_string(), "Unknown value 153 for enum 'MemoryArea' in 'area' at bit 64");
        assert_eq!(err.position(), Some(64));
    }

    #[test]
    fn test_invalid_frame_display() {
        let err = CodecError::invalid_frame_at("parameter", 80, "declared 14 bytes, decoded 12");
        assert_eq!(
            err.to_string(),
            "Invalid frame in 'parameter' at bit 80: declared 14 bytes, decoded 12"
        );
        assert_eq!(err.position(), Some(80));

        let err = CodecError::invalid_frame("TPKT", "length 3");
        assert_eq!(err.to_string(), "Invalid frame in 'TPKT': length 3");
        assert_eq!(err.position(), None);
        assert_eq!(CodecError::Timeout.position(), None);
    }
}
