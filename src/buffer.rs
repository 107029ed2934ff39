//! Bit-level read and write cursors.
//!
//! [`ReadBuffer`] borrows a fully buffered frame and [`WriteBuffer`] grows a
//! byte vector. Both address bits MSB-first within each byte, so a 3-bit field
//! followed by a 5-bit field occupy the high and low parts of the same byte.
//!
//! # Byte order
//!
//! A [`ByteOrder`] applies only to multi-byte primitives whose width is a
//! multiple of 8. Single bits, sub-byte fields and strings are order
//! independent.
//!
//! ```
//! use plc_wire::{ByteOrder, ReadBuffer};
//!
//! let bytes = [0x01, 0x02, 0x03, 0x04];
//! let mut rb = ReadBuffer::new(&bytes);
//! assert_eq!(rb.read_unsigned_ordered("value", 32, ByteOrder::BigEndian)?, 16909060);
//!
//! let mut rb = ReadBuffer::new(&bytes);
//! assert_eq!(rb.read_unsigned_ordered("value", 32, ByteOrder::LittleEndian)?, 67305985);
//! # Ok::<(), plc_wire::CodecError>(())
//! ```

use std::fmt;

use crate::error::{CodecError, Result};

/// Byte order for multi-byte primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ByteOrder {
    /// Most significant byte first (network order).
    #[default]
    BigEndian,
    /// Least significant byte first.
    LittleEndian,
}

/// Text encoding for string fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextEncoding {
    /// UTF-8.
    #[default]
    Utf8,
    /// 7-bit ASCII; non-ASCII characters are rejected.
    Ascii,
    /// UTF-16, big-endian code units.
    Utf16Be,
    /// UTF-16, little-endian code units.
    Utf16Le,
}

impl TextEncoding {
    /// Parses an encoding name as used in type definitions (`"UTF-8"`, `"UTF-16"`, ...).
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "UTF-8" | "UTF8" => Some(Self::Utf8),
            "ASCII" | "US-ASCII" => Some(Self::Ascii),
            "UTF-16" | "UTF-16BE" | "UTF16" => Some(Self::Utf16Be),
            "UTF-16LE" => Some(Self::Utf16Le),
            _ => None,
        }
    }
}

/// Options that change how tolerant the codec is.
///
/// # Example
///
/// ```
/// use plc_wire::{ByteOrder, CodecOptions};
///
/// let options = CodecOptions::new()
///     .with_strict(true)
///     .with_checksum_validation(true)
///     .with_byte_order(ByteOrder::LittleEndian);
/// assert!(options.strict);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CodecOptions {
    /// Treat reserved-field mismatches as fatal instead of warnings.
    pub strict: bool,
    /// Fail with `ChecksumMismatch` when a received checksum is wrong.
    pub validate_checksums: bool,
    /// Byte order used when a read or write does not name one.
    pub byte_order: ByteOrder,
}

impl CodecOptions {
    /// Creates the default, tolerant options (big-endian, no strict mode).
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets strict mode.
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Enables or disables checksum validation on read.
    pub fn with_checksum_validation(mut self, validate: bool) -> Self {
        self.validate_checksums = validate;
        self
    }

    /// Sets the default byte order.
    pub fn with_byte_order(mut self, byte_order: ByteOrder) -> Self {
        self.byte_order = byte_order;
        self
    }
}

/// A non-fatal problem noticed while reading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    /// Context path and field name, e.g. `S7Message/reserved`.
    pub field: String,
    /// Bit position of the field.
    pub position: u64,
    /// Human readable description.
    pub message: String,
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at bit {}: {}", self.field, self.position, self.message)
    }
}

/// Reverses the byte order of the low `bits` bits of `value`.
#[inline]
fn swap_bytes(value: u64, bits: u8) -> u64 {
    let mut out = 0u64;
    for i in 0..(bits / 8) as u32 {
        out = (out << 8) | ((value >> (8 * i)) & 0xFF);
    }
    out
}

#[inline]
fn needs_swap(bits: u8, order: ByteOrder) -> bool {
    order == ByteOrder::LittleEndian && bits > 8 && bits % 8 == 0
}

#[inline]
fn sign_extend(value: u64, bits: u8) -> i64 {
    if bits == 0 {
        return 0;
    }
    if bits >= 64 {
        return value as i64;
    }
    let shift = 64 - u32::from(bits);
    ((value << shift) as i64) >> shift
}

fn check_float_layout(field: &str, exponent: u8, mantissa: u8) -> Result<()> {
    if exponent < 2 || mantissa == 0 || 1 + u32::from(exponent) + u32::from(mantissa) > 64 {
        return Err(CodecError::invalid_parameter(
            field,
            format!("unsupported float layout: {} exponent / {} mantissa bits", exponent, mantissa),
        ));
    }
    Ok(())
}

fn decode_float(raw: u64, exponent: u8, mantissa: u8) -> f64 {
    match (exponent, mantissa) {
        (8, 23) => return f64::from(f32::from_bits(raw as u32)),
        (11, 52) => return f64::from_bits(raw),
        _ => {}
    }
    let sign = (raw >> (exponent + mantissa)) & 1;
    let max_exp = (1u64 << exponent) - 1;
    let exp = (raw >> mantissa) & max_exp;
    let frac = raw & ((1u64 << mantissa) - 1);
    let bias = (1i32 << (exponent - 1)) - 1;
    let scale = (1u64 << mantissa) as f64;
    let magnitude = if exp == 0 {
        (frac as f64 / scale) * 2f64.powi(1 - bias)
    } else if exp == max_exp {
        if frac == 0 {
            f64::INFINITY
        } else {
            f64::NAN
        }
    } else {
        (1.0 + frac as f64 / scale) * 2f64.powi(exp as i32 - bias)
    };
    if sign == 1 {
        -magnitude
    } else {
        magnitude
    }
}

fn encode_float(field: &str, value: f64, exponent: u8, mantissa: u8) -> Result<u64> {
    match (exponent, mantissa) {
        (8, 23) => {
            let narrowed = value as f32;
            if value.is_finite() && !narrowed.is_finite() {
                return Err(CodecError::encoding(field, format!("{} does not fit a 32-bit float", value)));
            }
            return Ok(u64::from(narrowed.to_bits()));
        }
        (11, 52) => return Ok(value.to_bits()),
        _ => {}
    }
    let sign = u64::from(value.is_sign_negative());
    let max_exp = (1u64 << exponent) - 1;
    let bias = (1i32 << (exponent - 1)) - 1;
    let scale = (1u64 << mantissa) as f64;
    let abs = value.abs();
    let overflow = || {
        CodecError::encoding(
            field,
            format!("{} does not fit a float with {} exponent bits", value, exponent),
        )
    };

    let (exp, frac) = if value.is_nan() {
        (max_exp, 1u64 << (mantissa - 1))
    } else if abs.is_infinite() {
        (max_exp, 0)
    } else if abs == 0.0 {
        (0, 0)
    } else {
        let mut unbiased = abs.log2().floor() as i32;
        // log2 may round across a power of two
        if 2f64.powi(unbiased) > abs {
            unbiased -= 1;
        } else if 2f64.powi(unbiased + 1) <= abs {
            unbiased += 1;
        }
        let biased = unbiased + bias;
        if biased >= max_exp as i32 {
            return Err(overflow());
        }
        if biased <= 0 {
            let frac = (abs / 2f64.powi(1 - bias) * scale).round() as u64;
            if frac >= 1u64 << mantissa {
                (1, 0)
            } else {
                (0, frac)
            }
        } else {
            let mut biased = biased as u64;
            let mut frac = ((abs / 2f64.powi(unbiased) - 1.0) * scale).round() as u64;
            if frac >= 1u64 << mantissa {
                frac = 0;
                biased += 1;
                if biased >= max_exp {
                    return Err(overflow());
                }
            }
            (biased, frac)
        }
    };
    Ok((sign << (exponent + mantissa)) | (exp << mantissa) | frac)
}

fn decode_string(field: &str, bytes: &[u8], encoding: TextEncoding) -> Result<String> {
    match encoding {
        TextEncoding::Utf8 | TextEncoding::Ascii => {
            let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
            let text = &bytes[..end];
            if encoding == TextEncoding::Ascii && !text.is_ascii() {
                return Err(CodecError::encoding(field, "non-ASCII byte in ASCII string"));
            }
            String::from_utf8(text.to_vec())
                .map_err(|e| CodecError::encoding(field, format!("invalid UTF-8: {}", e)))
        }
        TextEncoding::Utf16Be | TextEncoding::Utf16Le => {
            let units: Vec<u16> = bytes
                .chunks_exact(2)
                .map(|pair| match encoding {
                    TextEncoding::Utf16Le => u16::from_le_bytes([pair[0], pair[1]]),
                    _ => u16::from_be_bytes([pair[0], pair[1]]),
                })
                .take_while(|unit| *unit != 0)
                .collect();
            String::from_utf16(&units)
                .map_err(|e| CodecError::encoding(field, format!("invalid UTF-16: {}", e)))
        }
    }
}

fn encode_string(field: &str, value: &str, encoding: TextEncoding) -> Result<Vec<u8>> {
    match encoding {
        TextEncoding::Utf8 => Ok(value.as_bytes().to_vec()),
        TextEncoding::Ascii => {
            if !value.is_ascii() {
                return Err(CodecError::encoding(field, "string contains non-ASCII characters"));
            }
            Ok(value.as_bytes().to_vec())
        }
        TextEncoding::Utf16Be => Ok(value.encode_utf16().flat_map(u16::to_be_bytes).collect()),
        TextEncoding::Utf16Le => Ok(value.encode_utf16().flat_map(u16::to_le_bytes).collect()),
    }
}

/// Read cursor over a fully buffered frame.
#[derive(Debug)]
pub struct ReadBuffer<'a> {
    data: &'a [u8],
    position: u64,
    options: CodecOptions,
    contexts: Vec<String>,
    warnings: Vec<Warning>,
}

impl<'a> ReadBuffer<'a> {
    /// Creates a read cursor with default options.
    pub fn new(data: &'a [u8]) -> Self {
        Self::with_options(data, CodecOptions::default())
    }

    /// Creates a read cursor with the given options.
    pub fn with_options(data: &'a [u8], options: CodecOptions) -> Self {
        Self {
            data,
            position: 0,
            options,
            contexts: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Returns the codec options.
    pub fn options(&self) -> &CodecOptions {
        &self.options
    }

    /// Returns the default byte order.
    pub fn byte_order(&self) -> ByteOrder {
        self.options.byte_order
    }

    /// Current position in bits.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Current position in whole bytes.
    pub fn position_bytes(&self) -> usize {
        (self.position / 8) as usize
    }

    /// Total size of the buffer in bytes.
    pub fn len_bytes(&self) -> usize {
        self.data.len()
    }

    /// Bits left to read.
    pub fn remaining_bits(&self) -> u64 {
        (self.data.len() as u64 * 8).saturating_sub(self.position)
    }

    /// Returns `true` if at least `bits` bits remain.
    pub fn has_more(&self, bits: u64) -> bool {
        self.remaining_bits() >= bits
    }

    /// Saves the current position for [`reset`](Self::reset).
    pub fn mark(&self) -> u64 {
        self.position
    }

    /// Restores a position returned by [`mark`](Self::mark).
    pub fn reset(&mut self, mark: u64) {
        self.position = mark.min(self.data.len() as u64 * 8);
    }

    /// Enters a named diagnostic context.
    pub fn push_context(&mut self, name: &str) {
        self.contexts.push(name.to_string());
        log::trace!("read enter {} at bit {}", self.context_path(), self.position);
    }

    /// Leaves the innermost diagnostic context.
    pub fn pop_context(&mut self) {
        log::trace!("read leave {} at bit {}", self.context_path(), self.position);
        self.contexts.pop();
    }

    /// Slash separated path of the open contexts.
    pub fn context_path(&self) -> String {
        self.contexts.join("/")
    }

    fn qualified(&self, field: &str) -> String {
        if self.contexts.is_empty() {
            field.to_string()
        } else {
            format!("{}/{}", self.context_path(), field)
        }
    }

    /// Records a non-fatal problem with the field that was just read.
    pub fn warn(&mut self, field: &str, position: u64, message: impl Into<String>) {
        let warning = Warning {
            field: self.qualified(field),
            position,
            message: message.into(),
        };
        log::warn!("{}", warning);
        self.warnings.push(warning);
    }

    /// Warnings collected so far.
    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    /// Drains the collected warnings.
    pub fn take_warnings(&mut self) -> Vec<Warning> {
        std::mem::take(&mut self.warnings)
    }

    fn ensure(&self, field: &str, bits: u64) -> Result<()> {
        let remaining = self.remaining_bits();
        if bits > remaining {
            return Err(CodecError::end_of_data(self.qualified(field), self.position, bits, remaining));
        }
        Ok(())
    }

    fn take_bits(&mut self, field: &str, bits: u8) -> Result<u64> {
        if bits > 64 {
            return Err(CodecError::invalid_parameter(field, format!("cannot read {} bits at once", bits)));
        }
        self.ensure(field, u64::from(bits))?;
        let mut value = 0u64;
        if self.position % 8 == 0 && bits % 8 == 0 {
            let start = self.position_bytes();
            for byte in &self.data[start..start + usize::from(bits / 8)] {
                value = (value << 8) | u64::from(*byte);
            }
            self.position += u64::from(bits);
            return Ok(value);
        }
        for _ in 0..bits {
            let byte = self.data[(self.position / 8) as usize];
            let bit = (byte >> (7 - (self.position % 8) as u32)) & 1;
            value = (value << 1) | u64::from(bit);
            self.position += 1;
        }
        Ok(value)
    }

    /// Skips `bits` bits.
    pub fn skip(&mut self, field: &str, bits: u64) -> Result<()> {
        self.ensure(field, bits)?;
        self.position += bits;
        Ok(())
    }

    /// Reads one bit.
    pub fn read_bit(&mut self, field: &str) -> Result<bool> {
        Ok(self.take_bits(field, 1)? == 1)
    }

    /// Reads an unsigned integer of 1..=64 bits in the default byte order.
    pub fn read_unsigned(&mut self, field: &str, bits: u8) -> Result<u64> {
        self.read_unsigned_ordered(field, bits, self.options.byte_order)
    }

    /// Reads an unsigned integer of 1..=64 bits in the given byte order.
    pub fn read_unsigned_ordered(&mut self, field: &str, bits: u8, order: ByteOrder) -> Result<u64> {
        let raw = self.take_bits(field, bits)?;
        if needs_swap(bits, order) {
            Ok(swap_bytes(raw, bits))
        } else {
            Ok(raw)
        }
    }

    /// Reads a two's complement integer of 1..=64 bits in the default byte order.
    pub fn read_signed(&mut self, field: &str, bits: u8) -> Result<i64> {
        self.read_signed_ordered(field, bits, self.options.byte_order)
    }

    /// Reads a two's complement integer of 1..=64 bits in the given byte order.
    pub fn read_signed_ordered(&mut self, field: &str, bits: u8, order: ByteOrder) -> Result<i64> {
        let raw = self.read_unsigned_ordered(field, bits, order)?;
        Ok(sign_extend(raw, bits))
    }

    /// Reads an unsigned value without advancing the cursor.
    pub fn peek_unsigned(&mut self, field: &str, bits: u8) -> Result<u64> {
        let mark = self.mark();
        let value = self.read_unsigned(field, bits);
        self.reset(mark);
        value
    }

    /// Reads a `u8`.
    pub fn read_u8(&mut self, field: &str) -> Result<u8> {
        Ok(self.read_unsigned(field, 8)? as u8)
    }

    /// Reads a `u16` in the default byte order.
    pub fn read_u16(&mut self, field: &str) -> Result<u16> {
        Ok(self.read_unsigned(field, 16)? as u16)
    }

    /// Reads a `u32` in the default byte order.
    pub fn read_u32(&mut self, field: &str) -> Result<u32> {
        Ok(self.read_unsigned(field, 32)? as u32)
    }

    /// Reads a `u64` in the default byte order.
    pub fn read_u64(&mut self, field: &str) -> Result<u64> {
        self.read_unsigned(field, 64)
    }

    /// Reads an `i8`.
    pub fn read_i8(&mut self, field: &str) -> Result<i8> {
        Ok(self.read_signed(field, 8)? as i8)
    }

    /// Reads an `i16` in the default byte order.
    pub fn read_i16(&mut self, field: &str) -> Result<i16> {
        Ok(self.read_signed(field, 16)? as i16)
    }

    /// Reads an `i32` in the default byte order.
    pub fn read_i32(&mut self, field: &str) -> Result<i32> {
        Ok(self.read_signed(field, 32)? as i32)
    }

    /// Reads an `i64` in the default byte order.
    pub fn read_i64(&mut self, field: &str) -> Result<i64> {
        self.read_signed(field, 64)
    }

    /// Reads an IEEE-754 style float with the given exponent and mantissa widths.
    ///
    /// `(8, 23)` and `(11, 52)` are the native `f32` and `f64` layouts; any
    /// other layout (e.g. `(5, 10)` half precision) is decoded generically.
    pub fn read_float(&mut self, field: &str, exponent: u8, mantissa: u8) -> Result<f64> {
        check_float_layout(field, exponent, mantissa)?;
        let raw = self.read_unsigned(field, 1 + exponent + mantissa)?;
        Ok(decode_float(raw, exponent, mantissa))
    }

    /// Reads an `f32`.
    pub fn read_f32(&mut self, field: &str) -> Result<f32> {
        Ok(f32::from_bits(self.read_u32(field)?))
    }

    /// Reads an `f64`.
    pub fn read_f64(&mut self, field: &str) -> Result<f64> {
        Ok(f64::from_bits(self.read_u64(field)?))
    }

    /// Reads `count` bytes.
    pub fn read_bytes(&mut self, field: &str, count: usize) -> Result<Vec<u8>> {
        self.ensure(field, count as u64 * 8)?;
        if self.position % 8 == 0 {
            let start = self.position_bytes();
            self.position += count as u64 * 8;
            return Ok(self.data[start..start + count].to_vec());
        }
        (0..count).map(|_| self.read_u8(field)).collect()
    }

    /// Reads a fixed-size string of `bits` bits; trailing NUL padding is dropped.
    pub fn read_string(&mut self, field: &str, bits: u64, encoding: TextEncoding) -> Result<String> {
        if bits % 8 != 0 {
            return Err(CodecError::encoding(field, format!("string length of {} bits is not byte aligned", bits)));
        }
        let bytes = self.read_bytes(field, (bits / 8) as usize)?;
        decode_string(field, &bytes, encoding)
    }
}

/// Growable write cursor.
#[derive(Debug, Default)]
pub struct WriteBuffer {
    data: Vec<u8>,
    position: u64,
    options: CodecOptions,
    contexts: Vec<String>,
}

impl WriteBuffer {
    /// Creates an empty write cursor with default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a write cursor that pre-allocates `bytes` bytes.
    pub fn with_capacity(bytes: usize) -> Self {
        Self {
            data: Vec::with_capacity(bytes),
            ..Self::default()
        }
    }

    /// Creates a write cursor with the given options.
    pub fn with_options(options: CodecOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    /// Returns the codec options.
    pub fn options(&self) -> &CodecOptions {
        &self.options
    }

    /// Current position in bits.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Current position in whole bytes.
    pub fn position_bytes(&self) -> usize {
        (self.position / 8) as usize
    }

    /// Enters a named diagnostic context.
    pub fn push_context(&mut self, name: &str) {
        self.contexts.push(name.to_string());
        log::trace!("write enter {} at bit {}", self.contexts.join("/"), self.position);
    }

    /// Leaves the innermost diagnostic context.
    pub fn pop_context(&mut self) {
        log::trace!("write leave {} at bit {}", self.contexts.join("/"), self.position);
        self.contexts.pop();
    }

    /// Bytes written so far.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Consumes the cursor and returns the written bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    fn put_bits(&mut self, bits: u8, value: u64) {
        if self.position % 8 == 0 && bits % 8 == 0 {
            for i in (0..u32::from(bits / 8)).rev() {
                self.data.push((value >> (8 * i)) as u8);
            }
            self.position += u64::from(bits);
            return;
        }
        for i in (0..u32::from(bits)).rev() {
            let index = (self.position / 8) as usize;
            if index >= self.data.len() {
                self.data.push(0);
            }
            if (value >> i) & 1 == 1 {
                self.data[index] |= 1 << (7 - (self.position % 8) as u32);
            }
            self.position += 1;
        }
    }

    /// Writes one bit.
    pub fn write_bit(&mut self, _field: &str, value: bool) -> Result<()> {
        self.put_bits(1, u64::from(value));
        Ok(())
    }

    /// Writes an unsigned integer of 1..=64 bits in the default byte order.
    pub fn write_unsigned(&mut self, field: &str, bits: u8, value: u64) -> Result<()> {
        self.write_unsigned_ordered(field, bits, value, self.options.byte_order)
    }

    /// Writes an unsigned integer of 1..=64 bits in the given byte order.
    pub fn write_unsigned_ordered(&mut self, field: &str, bits: u8, value: u64, order: ByteOrder) -> Result<()> {
        if bits == 0 || bits > 64 {
            return Err(CodecError::invalid_parameter(field, format!("cannot write {} bits at once", bits)));
        }
        if bits < 64 && value >> bits != 0 {
            return Err(CodecError::encoding(field, format!("{} does not fit in {} bits", value, bits)));
        }
        let raw = if needs_swap(bits, order) {
            swap_bytes(value, bits)
        } else {
            value
        };
        self.put_bits(bits, raw);
        Ok(())
    }

    /// Writes a two's complement integer of 1..=64 bits in the default byte order.
    pub fn write_signed(&mut self, field: &str, bits: u8, value: i64) -> Result<()> {
        self.write_signed_ordered(field, bits, value, self.options.byte_order)
    }

    /// Writes a two's complement integer of 1..=64 bits in the given byte order.
    pub fn write_signed_ordered(&mut self, field: &str, bits: u8, value: i64, order: ByteOrder) -> Result<()> {
        if bits == 0 || bits > 64 {
            return Err(CodecError::invalid_parameter(field, format!("cannot write {} bits at once", bits)));
        }
        let raw = if bits == 64 {
            value as u64
        } else {
            let min = -(1i64 << (bits - 1));
            let max = (1i64 << (bits - 1)) - 1;
            if value < min || value > max {
                return Err(CodecError::encoding(field, format!("{} does not fit in {} signed bits", value, bits)));
            }
            (value as u64) & ((1u64 << bits) - 1)
        };
        self.write_unsigned_ordered(field, bits, raw, order)
    }

    /// Writes a `u8`.
    pub fn write_u8(&mut self, field: &str, value: u8) -> Result<()> {
        self.write_unsigned(field, 8, u64::from(value))
    }

    /// Writes a `u16` in the default byte order.
    pub fn write_u16(&mut self, field: &str, value: u16) -> Result<()> {
        self.write_unsigned(field, 16, u64::from(value))
    }

    /// Writes a `u32` in the default byte order.
    pub fn write_u32(&mut self, field: &str, value: u32) -> Result<()> {
        self.write_unsigned(field, 32, u64::from(value))
    }

    /// Writes a `u64` in the default byte order.
    pub fn write_u64(&mut self, field: &str, value: u64) -> Result<()> {
        self.write_unsigned(field, 64, value)
    }

    /// Writes an `i8`.
    pub fn write_i8(&mut self, field: &str, value: i8) -> Result<()> {
        self.write_signed(field, 8, i64::from(value))
    }

    /// Writes an `i16` in the default byte order.
    pub fn write_i16(&mut self, field: &str, value: i16) -> Result<()> {
        self.write_signed(field, 16, i64::from(value))
    }

    /// Writes an `i32` in the default byte order.
    pub fn write_i32(&mut self, field: &str, value: i32) -> Result<()> {
        self.write_signed(field, 32, i64::from(value))
    }

    /// Writes an `i64` in the default byte order.
    pub fn write_i64(&mut self, field: &str, value: i64) -> Result<()> {
        self.write_signed(field, 64, value)
    }

    /// Writes a float with the given exponent and mantissa widths.
    pub fn write_float(&mut self, field: &str, exponent: u8, mantissa: u8, value: f64) -> Result<()> {
        check_float_layout(field, exponent, mantissa)?;
        let raw = encode_float(field, value, exponent, mantissa)?;
        self.write_unsigned(field, 1 + exponent + mantissa, raw)
    }

    /// Writes an `f32`.
    pub fn write_f32(&mut self, field: &str, value: f32) -> Result<()> {
        self.write_u32(field, value.to_bits())
    }

    /// Writes an `f64`.
    pub fn write_f64(&mut self, field: &str, value: f64) -> Result<()> {
        self.write_u64(field, value.to_bits())
    }

    /// Writes raw bytes.
    pub fn write_bytes(&mut self, _field: &str, bytes: &[u8]) -> Result<()> {
        if self.position % 8 == 0 {
            self.data.extend_from_slice(bytes);
            self.position += bytes.len() as u64 * 8;
        } else {
            for byte in bytes {
                self.put_bits(8, u64::from(*byte));
            }
        }
        Ok(())
    }

    /// Writes a string into exactly `bits` bits, zero padding the rest.
    ///
    /// Fails with `Encoding` if the encoded string is longer than the field.
    pub fn write_string(&mut self, field: &str, bits: u64, encoding: TextEncoding, value: &str) -> Result<()> {
        if bits % 8 != 0 {
            return Err(CodecError::encoding(field, format!("string length of {} bits is not byte aligned", bits)));
        }
        let mut bytes = encode_string(field, value, encoding)?;
        let capacity = (bits / 8) as usize;
        if bytes.len() > capacity {
            return Err(CodecError::encoding(
                field,
                format!("string needs {} bytes but the field holds {}", bytes.len(), capacity),
            ));
        }
        bytes.resize(capacity, 0);
        self.write_bytes(field, &bytes)
    }
}

/// Number of bytes `value` takes when encoded with `encoding`.
pub fn encoded_string_len(value: &str, encoding: TextEncoding) -> usize {
    match encoding {
        TextEncoding::Utf8 | TextEncoding::Ascii => value.len(),
        TextEncoding::Utf16Be | TextEncoding::Utf16Le => value.encode_utf16().count() * 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endianness() {
        let bytes = [0x01, 0x02, 0x03, 0x04];
        let mut rb = ReadBuffer::new(&bytes);
        assert_eq!(rb.read_unsigned_ordered("v", 32, ByteOrder::BigEndian).unwrap(), 16909060);
        let mut rb = ReadBuffer::new(&bytes);
        assert_eq!(rb.read_unsigned_ordered("v", 32, ByteOrder::LittleEndian).unwrap(), 67305985);
    }

    #[test]
    fn test_default_byte_order_from_options() {
        let bytes = [0x34, 0x12];
        let options = CodecOptions::new().with_byte_order(ByteOrder::LittleEndian);
        let mut rb = ReadBuffer::with_options(&bytes, options);
        assert_eq!(rb.read_u16("v").unwrap(), 0x1234);

        let mut wb = WriteBuffer::with_options(options);
        wb.write_u16("v", 0x1234).unwrap();
        assert_eq!(wb.into_bytes(), vec![0x34, 0x12]);
    }

    #[test]
    fn test_bit_fields_msb_first() {
        // 1 | 0000101 | 011 | 00001
        let bytes = [0b1000_0101, 0b0110_0001];
        let mut rb = ReadBuffer::new(&bytes);
        assert!(rb.read_bit("eot").unwrap());
        assert_eq!(rb.read_unsigned("ref", 7).unwrap(), 5);
        assert_eq!(rb.read_unsigned("a", 3).unwrap(), 3);
        assert_eq!(rb.read_unsigned("b", 5).unwrap(), 1);
        assert_eq!(rb.remaining_bits(), 0);
    }

    #[test]
    fn test_little_endian_ignored_for_sub_byte_widths() {
        let bytes = [0xAB];
        let mut rb = ReadBuffer::new(&bytes);
        assert_eq!(rb.read_unsigned_ordered("v", 4, ByteOrder::LittleEndian).unwrap(), 0xA);
    }

    #[test]
    fn test_signed_sign_extension() {
        let bytes = [0xFF, 0xFE, 0b1110_0000];
        let mut rb = ReadBuffer::new(&bytes);
        assert_eq!(rb.read_i16("v").unwrap(), -2);
        assert_eq!(rb.read_signed("w", 3).unwrap(), -1);
    }

    #[test]
    fn test_end_of_data() {
        let bytes = [0x01];
        let mut rb = ReadBuffer::new(&bytes);
        rb.push_context("Tpkt");
        let err = rb.read_u16("length").unwrap_err();
        match err {
            CodecError::EndOfData {
                context,
                position,
                requested,
                remaining,
            } => {
                assert_eq!(context, "Tpkt/length");
                assert_eq!(position, 0);
                assert_eq!(requested, 16);
                assert_eq!(remaining, 8);
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_mark_reset_and_peek() {
        let bytes = [0x12, 0x34];
        let mut rb = ReadBuffer::new(&bytes);
        assert_eq!(rb.peek_unsigned("p", 8).unwrap(), 0x12);
        assert_eq!(rb.position(), 0);
        let mark = rb.mark();
        rb.read_u16("v").unwrap();
        rb.reset(mark);
        assert_eq!(rb.read_u8("v").unwrap(), 0x12);
    }

    #[test]
    fn test_float_layouts() {
        let bytes = 1.5f32.to_be_bytes();
        let mut rb = ReadBuffer::new(&bytes);
        assert_eq!(rb.read_float("f", 8, 23).unwrap(), 1.5);

        // half precision 1.0, -2.0 and smallest subnormal
        let bytes = [0x3C, 0x00, 0xC0, 0x00, 0x00, 0x01];
        let mut rb = ReadBuffer::new(&bytes);
        assert_eq!(rb.read_float("h", 5, 10).unwrap(), 1.0);
        assert_eq!(rb.read_float("h", 5, 10).unwrap(), -2.0);
        assert_eq!(rb.read_float("h", 5, 10).unwrap(), 2f64.powi(-24));
    }

    #[test]
    fn test_half_float_write() {
        let mut wb = WriteBuffer::new();
        wb.write_float("h", 5, 10, 1.0).unwrap();
        wb.write_float("h", 5, 10, -2.0).unwrap();
        wb.write_float("h", 5, 10, 0.333251953125).unwrap();
        assert_eq!(wb.into_bytes(), vec![0x3C, 0x00, 0xC0, 0x00, 0x35, 0x55]);

        let mut wb = WriteBuffer::new();
        assert!(wb.write_float("h", 5, 10, 1.0e6).is_err());
    }

    #[test]
    fn test_single_precision_range() {
        let mut wb = WriteBuffer::new();
        let err = wb.write_float("r", 8, 23, 1.0e300).unwrap_err();
        assert!(matches!(err, CodecError::Encoding { .. }), "{:?}", err);
        assert_eq!(wb.position(), 0);

        wb.write_float("r", 8, 23, f64::INFINITY).unwrap();
        wb.write_float("r", 8, 23, 21.5).unwrap();
        assert_eq!(wb.into_bytes(), vec![0x7F, 0x80, 0x00, 0x00, 0x41, 0xAC, 0x00, 0x00]);
    }

    #[test]
    fn test_string_padding() {
        let bytes = [b'S', b'7', 0, 0];
        let mut rb = ReadBuffer::new(&bytes);
        assert_eq!(rb.read_string("s", 32, TextEncoding::Utf8).unwrap(), "S7");

        let mut wb = WriteBuffer::new();
        wb.write_string("s", 32, TextEncoding::Ascii, "S7").unwrap();
        assert_eq!(wb.into_bytes(), bytes.to_vec());
    }

    #[test]
    fn test_string_too_long_is_an_error() {
        let mut wb = WriteBuffer::new();
        let err = wb.write_string("s", 16, TextEncoding::Utf8, "abc").unwrap_err();
        assert!(matches!(err, CodecError::Encoding { .. }));
        assert!(wb.as_bytes().is_empty());
    }

    #[test]
    fn test_utf16_string() {
        let mut wb = WriteBuffer::new();
        wb.write_string("s", 64, TextEncoding::Utf16Be, "hé").unwrap();
        let bytes = wb.into_bytes();
        assert_eq!(bytes, vec![0x00, b'h', 0x00, 0xE9, 0, 0, 0, 0]);
        let mut rb = ReadBuffer::new(&bytes);
        assert_eq!(rb.read_string("s", 64, TextEncoding::Utf16Be).unwrap(), "hé");
    }

    #[test]
    fn test_write_mixed_widths() {
        let mut wb = WriteBuffer::new();
        wb.write_bit("eot", true).unwrap();
        wb.write_unsigned("ref", 7, 5).unwrap();
        wb.write_unsigned("a", 3, 3).unwrap();
        wb.write_unsigned("b", 5, 1).unwrap();
        wb.write_unsigned_ordered("le", 16, 0x1234, ByteOrder::LittleEndian).unwrap();
        assert_eq!(wb.into_bytes(), vec![0b1000_0101, 0b0110_0001, 0x34, 0x12]);
    }

    #[test]
    fn test_write_value_out_of_range() {
        let mut wb = WriteBuffer::new();
        assert!(wb.write_unsigned("v", 3, 8).is_err());
        assert!(wb.write_signed("v", 4, -9).is_err());
        wb.write_signed("v", 4, -8).unwrap();
        wb.write_unsigned("w", 4, 0).unwrap();
        assert_eq!(wb.into_bytes(), vec![0x80]);
    }

    #[test]
    fn test_unaligned_bytes() {
        let mut wb = WriteBuffer::new();
        wb.write_unsigned("pad", 4, 0xF).unwrap();
        wb.write_bytes("data", &[0xAB, 0xCD]).unwrap();
        wb.write_unsigned("pad", 4, 0x0).unwrap();
        let bytes = wb.into_bytes();
        assert_eq!(bytes, vec![0xFA, 0xBC, 0xD0]);

        let mut rb = ReadBuffer::new(&bytes);
        rb.skip("pad", 4).unwrap();
        assert_eq!(rb.read_bytes("data", 2).unwrap(), vec![0xAB, 0xCD]);
    }

    #[test]
    fn test_warnings_are_collected() {
        let bytes = [0u8];
        let mut rb = ReadBuffer::new(&bytes);
        rb.push_context("S7Message");
        rb.warn("reserved", 8, "expected 0x00, got 0x01");
        rb.pop_context();
        assert_eq!(rb.warnings().len(), 1);
        assert_eq!(rb.warnings()[0].field, "S7Message/reserved");
        assert_eq!(rb.take_warnings().len(), 1);
        assert!(rb.warnings().is_empty());
    }
}
