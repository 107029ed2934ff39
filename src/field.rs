//! Field codec primitives and the [`Message`] trait.
//!
//! Typed messages are written by hand as sequences of these primitives; the
//! schema interpreter in [`crate::schema`] drives the same functions from
//! type definitions.
//!
//! | Kind | Read | Write |
//! |------|------|-------|
//! | reserved | mismatch is a warning (error in strict mode) | always the constant |
//! | const | mismatch is fatal | always the constant |
//! | checksum | passed through unless validation is enabled | the computed value |
//! | padding | skipped | the fill value |
//! | array | COUNT, LENGTH or TERMINATED loop | every element in order |

use crate::buffer::{ByteOrder, CodecOptions, ReadBuffer, WriteBuffer};
use crate::error::{CodecError, Result};

/// A wire structure that can be parsed from and serialized to a bit stream.
pub trait Message: Sized {
    /// Out-of-band parse arguments, e.g. a length known from the enclosing frame.
    type Args;

    /// Parses one instance at the cursor.
    fn parse(rb: &mut ReadBuffer<'_>, args: Self::Args) -> Result<Self>;

    /// Serializes the instance at the cursor.
    fn serialize(&self, wb: &mut WriteBuffer) -> Result<()>;

    /// Exact number of bits [`serialize`](Self::serialize) writes.
    fn length_in_bits(&self) -> u64;

    /// Serialized size rounded up to whole bytes.
    fn length_in_bytes(&self) -> usize {
        self.length_in_bits().div_ceil(8) as usize
    }

    /// Serializes into a new byte vector.
    fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut wb = WriteBuffer::with_capacity(self.length_in_bytes());
        self.serialize(&mut wb)?;
        Ok(wb.into_bytes())
    }

    /// Parses from a byte slice with default options.
    fn from_bytes(bytes: &[u8], args: Self::Args) -> Result<Self> {
        Self::from_bytes_with(bytes, args, CodecOptions::default())
    }

    /// Parses from a byte slice with the given options.
    fn from_bytes_with(bytes: &[u8], args: Self::Args, options: CodecOptions) -> Result<Self> {
        let mut rb = ReadBuffer::with_options(bytes, options);
        Self::parse(&mut rb, args)
    }
}

/// Reads a reserved field.
///
/// A mismatch is recorded as a warning on the buffer; in strict mode it fails
/// with `ReservedValueMismatch` instead.
pub fn read_reserved(rb: &mut ReadBuffer<'_>, field: &str, bits: u8, expected: u64) -> Result<()> {
    let position = rb.position();
    let actual = rb.read_unsigned(field, bits)?;
    if actual != expected {
        if rb.options().strict {
            return Err(CodecError::ReservedValueMismatch {
                field: field.to_string(),
                position,
                expected,
                actual,
            });
        }
        rb.warn(
            field,
            position,
            format!("reserved value expected 0x{:X}, got 0x{:X}", expected, actual),
        );
    }
    Ok(())
}

/// Writes a reserved field: always the expected constant.
pub fn write_reserved(wb: &mut WriteBuffer, field: &str, bits: u8, expected: u64) -> Result<()> {
    wb.write_unsigned(field, bits, expected)
}

/// Reads a const field in the default byte order; a mismatch is fatal.
pub fn read_const(rb: &mut ReadBuffer<'_>, field: &str, bits: u8, expected: u64) -> Result<()> {
    let order = rb.byte_order();
    read_const_ordered(rb, field, bits, expected, order)
}

/// Reads a const field in the given byte order; a mismatch is fatal.
pub fn read_const_ordered(
    rb: &mut ReadBuffer<'_>,
    field: &str,
    bits: u8,
    expected: u64,
    order: ByteOrder,
) -> Result<()> {
    let position = rb.position();
    let actual = rb.read_unsigned_ordered(field, bits, order)?;
    if actual != expected {
        return Err(CodecError::ConstValueMismatch {
            field: field.to_string(),
            position,
            expected,
            actual,
        });
    }
    Ok(())
}

/// Writes a const field in the default byte order.
pub fn write_const(wb: &mut WriteBuffer, field: &str, bits: u8, expected: u64) -> Result<()> {
    wb.write_unsigned(field, bits, expected)
}

/// Writes a const field in the given byte order.
pub fn write_const_ordered(wb: &mut WriteBuffer, field: &str, bits: u8, expected: u64, order: ByteOrder) -> Result<()> {
    wb.write_unsigned_ordered(field, bits, expected, order)
}

/// Reads a checksum and compares it against `computed`.
///
/// The received value is returned as-is unless checksum validation is
/// enabled, in which case a mismatch fails with `ChecksumMismatch`.
pub fn read_checksum(
    rb: &mut ReadBuffer<'_>,
    field: &str,
    bits: u8,
    order: ByteOrder,
    computed: u64,
) -> Result<u64> {
    let position = rb.position();
    let actual = rb.read_unsigned_ordered(field, bits, order)?;
    if actual != computed {
        if rb.options().validate_checksums {
            return Err(CodecError::checksum_mismatch(field, position, computed, actual));
        }
        rb.warn(
            field,
            position,
            format!("checksum expected 0x{:X}, got 0x{:X}", computed, actual),
        );
    }
    Ok(actual)
}

/// Skips `count` padding items of `bits` bits each.
pub fn read_padding(rb: &mut ReadBuffer<'_>, field: &str, bits: u8, count: usize) -> Result<()> {
    rb.skip(field, u64::from(bits) * count as u64)
}

/// Writes `count` padding items holding `value`.
pub fn write_padding(wb: &mut WriteBuffer, field: &str, bits: u8, value: u64, count: usize) -> Result<()> {
    for _ in 0..count {
        wb.write_unsigned(field, bits, value)?;
    }
    Ok(())
}

/// Reads an optional field when `present` holds.
pub fn read_optional<T>(
    rb: &mut ReadBuffer<'_>,
    present: bool,
    read: impl FnOnce(&mut ReadBuffer<'_>) -> Result<T>,
) -> Result<Option<T>> {
    if present {
        read(rb).map(Some)
    } else {
        Ok(None)
    }
}

/// COUNT loop: reads exactly `count` elements.
///
/// The closure receives `true` for the last element, mirroring `_lastItem`.
pub fn read_count_array<T>(
    rb: &mut ReadBuffer<'_>,
    field: &str,
    count: usize,
    mut read: impl FnMut(&mut ReadBuffer<'_>, bool) -> Result<T>,
) -> Result<Vec<T>> {
    rb.push_context(field);
    // cap the pre-allocation; a corrupt count must not allocate gigabytes
    let mut items = Vec::with_capacity(count.min(1024));
    for i in 0..count {
        items.push(read(rb, i + 1 == count)?);
    }
    rb.pop_context();
    Ok(items)
}

/// LENGTH loop: reads elements while fewer than `length_bytes` bytes were consumed.
pub fn read_length_array<T>(
    rb: &mut ReadBuffer<'_>,
    field: &str,
    length_bytes: usize,
    mut read: impl FnMut(&mut ReadBuffer<'_>) -> Result<T>,
) -> Result<Vec<T>> {
    let bound = length_bytes as u64 * 8;
    if !rb.has_more(bound) {
        return Err(CodecError::end_of_data(field, rb.position(), bound, rb.remaining_bits()));
    }
    rb.push_context(field);
    let end = rb.position() + bound;
    let mut items = Vec::new();
    while rb.position() < end {
        items.push(read(rb)?);
    }
    rb.pop_context();
    if rb.position() > end {
        return Err(CodecError::invalid_frame_at(
            field,
            end,
            format!("array overran its {} byte bound by {} bits", length_bytes, rb.position() - end),
        ));
    }
    Ok(items)
}

/// Reads a section whose size in bytes was declared ahead of it.
///
/// The section must consume exactly `length_bytes`; anything else fails with
/// `InvalidFrame` at the section start.
pub fn read_bounded<T>(
    rb: &mut ReadBuffer<'_>,
    field: &str,
    length_bytes: usize,
    read: impl FnOnce(&mut ReadBuffer<'_>) -> Result<T>,
) -> Result<T> {
    let bound = length_bytes as u64 * 8;
    let start = rb.position();
    if !rb.has_more(bound) {
        return Err(CodecError::end_of_data(field, start, bound, rb.remaining_bits()));
    }
    rb.push_context(field);
    let value = read(rb)?;
    rb.pop_context();
    let consumed = rb.position() - start;
    if consumed != bound {
        return Err(CodecError::invalid_frame_at(
            field,
            start,
            format!("declared {} bytes, decoded {} bits", length_bytes, consumed),
        ));
    }
    Ok(value)
}

/// TERMINATED loop: reads until `is_terminal` holds for an element (which is
/// kept) or the buffer is exhausted.
pub fn read_terminated_array<T>(
    rb: &mut ReadBuffer<'_>,
    field: &str,
    mut read: impl FnMut(&mut ReadBuffer<'_>) -> Result<T>,
    is_terminal: impl Fn(&T) -> bool,
) -> Result<Vec<T>> {
    rb.push_context(field);
    let mut items = Vec::new();
    while rb.remaining_bits() > 0 {
        let item = read(rb)?;
        let done = is_terminal(&item);
        items.push(item);
        if done {
            break;
        }
    }
    rb.pop_context();
    Ok(items)
}

/// Reads an unsigned code and maps it through `lookup`, failing with
/// `UnknownEnumValue` when nothing matches.
pub fn read_enum<E>(
    rb: &mut ReadBuffer<'_>,
    field: &str,
    bits: u8,
    type_name: &str,
    lookup: impl Fn(u64) -> Option<E>,
) -> Result<E> {
    let position = rb.position();
    let raw = rb.read_unsigned(field, bits)?;
    lookup(raw).ok_or_else(|| CodecError::unknown_enum_value(type_name, field, position, raw))
}

/// Total bit length of a slice of messages.
pub fn array_length_in_bits<M: Message>(items: &[M]) -> u64 {
    items.iter().map(Message::length_in_bits).sum()
}

/// Serializes every element in order; the read loop policy does not matter here.
pub fn write_array<M: Message>(wb: &mut WriteBuffer, field: &str, items: &[M]) -> Result<()> {
    wb.push_context(field);
    for item in items {
        item.serialize(wb)?;
    }
    wb.pop_context();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// `[simple uint 8 value]`, used to exercise the array loops.
    #[derive(Debug, PartialEq)]
    struct Byte(u8);

    impl Message for Byte {
        type Args = ();

        fn parse(rb: &mut ReadBuffer<'_>, _args: ()) -> Result<Self> {
            Ok(Byte(rb.read_u8("value")?))
        }

        fn serialize(&self, wb: &mut WriteBuffer) -> Result<()> {
            wb.write_u8("value", self.0)
        }

        fn length_in_bits(&self) -> u64 {
            8
        }
    }

    #[test]
    fn test_reserved_mismatch_is_a_warning() {
        let bytes = [0x01];
        let mut rb = ReadBuffer::new(&bytes);
        read_reserved(&mut rb, "reserved", 8, 0x00).unwrap();
        assert_eq!(rb.warnings().len(), 1);
        assert_eq!(rb.position(), 8);
    }

    #[test]
    fn test_reserved_mismatch_in_strict_mode() {
        let bytes = [0x01];
        let mut rb = ReadBuffer::with_options(&bytes, CodecOptions::new().with_strict(true));
        let err = read_reserved(&mut rb, "reserved", 8, 0x00).unwrap_err();
        assert!(matches!(err, CodecError::ReservedValueMismatch { actual: 1, .. }));
    }

    #[test]
    fn test_reserved_writes_constant() {
        let mut wb = WriteBuffer::new();
        write_reserved(&mut wb, "reserved", 5, 0).unwrap();
        wb.write_unsigned("x", 3, 7).unwrap();
        assert_eq!(wb.into_bytes(), vec![0x07]);
    }

    #[test]
    fn test_const_mismatch_is_fatal() {
        let bytes = [0x33];
        let mut rb = ReadBuffer::new(&bytes);
        let err = read_const(&mut rb, "protocolId", 8, 0x32).unwrap_err();
        assert!(matches!(
            err,
            CodecError::ConstValueMismatch {
                expected: 0x32,
                actual: 0x33,
                ..
            }
        ));
    }

    #[test]
    fn test_const_little_endian() {
        let bytes = [0x00, 0x00, 0xA0, 0xDE];
        let mut rb = ReadBuffer::new(&bytes);
        read_const_ordered(&mut rb, "c", 32, 0xDEA0_0000, ByteOrder::LittleEndian).unwrap();
    }

    #[test]
    fn test_checksum_passthrough_and_validation() {
        let bytes = [0x12, 0x34];
        let mut rb = ReadBuffer::new(&bytes);
        let value = read_checksum(&mut rb, "crc", 16, ByteOrder::BigEndian, 0xFFFF).unwrap();
        assert_eq!(value, 0x1234);
        assert_eq!(rb.warnings().len(), 1);

        let options = CodecOptions::new().with_checksum_validation(true);
        let bytes = [0x01, 0x12, 0x34];
        let mut rb = ReadBuffer::with_options(&bytes, options);
        rb.read_u8("address").unwrap();
        let err = read_checksum(&mut rb, "crc", 16, ByteOrder::BigEndian, 0xFFFF).unwrap_err();
        assert!(matches!(err, CodecError::ChecksumMismatch { position: 8, .. }), "{:?}", err);
    }

    #[test]
    fn test_count_array_of_zero() {
        let bytes = [0xAA];
        let mut rb = ReadBuffer::new(&bytes);
        let items = read_count_array(&mut rb, "items", 0, |rb, _| Byte::parse(rb, ())).unwrap();
        assert!(items.is_empty());
        assert_eq!(rb.position(), 0);

        let mut wb = WriteBuffer::new();
        write_array::<Byte>(&mut wb, "items", &[]).unwrap();
        assert!(wb.as_bytes().is_empty());
    }

    #[test]
    fn test_count_array_marks_last_item() {
        let bytes = [1, 2, 3];
        let mut rb = ReadBuffer::new(&bytes);
        let mut last_flags = Vec::new();
        read_count_array(&mut rb, "items", 3, |rb, last| {
            last_flags.push(last);
            Byte::parse(rb, ())
        })
        .unwrap();
        assert_eq!(last_flags, vec![false, false, true]);
    }

    #[test]
    fn test_length_array_of_exactly_one_element() {
        let bytes = [0x07, 0x08];
        let mut rb = ReadBuffer::new(&bytes);
        let items = read_length_array(&mut rb, "items", 1, |rb| Byte::parse(rb, ())).unwrap();
        assert_eq!(items, vec![Byte(7)]);
        assert_eq!(rb.position(), 8);
    }

    #[test]
    fn test_length_array_bound_beyond_buffer() {
        let bytes = [0x07];
        let mut rb = ReadBuffer::new(&bytes);
        let err = read_length_array(&mut rb, "items", 2, |rb| Byte::parse(rb, ())).unwrap_err();
        assert!(err.is_end_of_data());
    }

    #[test]
    fn test_length_array_overrun() {
        let bytes = [0x01, 0x02, 0x03];
        let mut rb = ReadBuffer::new(&bytes);
        let err = read_length_array(&mut rb, "items", 1, |rb| rb.read_u16("v")).unwrap_err();
        assert!(
            matches!(err, CodecError::InvalidFrame { ref context, position: Some(8), .. } if context == "items"),
            "{:?}",
            err
        );
    }

    #[test]
    fn test_bounded_section() {
        let bytes = [0x00, 0x01, 0x02, 0x03];
        let mut rb = ReadBuffer::new(&bytes);
        let value = read_bounded(&mut rb, "payload", 2, |rb| rb.read_u16("v")).unwrap();
        assert_eq!(value, 1);

        // declared two bytes, the content only used one
        let err = read_bounded(&mut rb, "payload", 2, |rb| rb.read_u8("v")).unwrap_err();
        assert!(
            matches!(err, CodecError::InvalidFrame { position: Some(16), .. }),
            "{:?}",
            err
        );

        let mut rb = ReadBuffer::new(&bytes[..1]);
        assert!(read_bounded(&mut rb, "payload", 2, |rb| rb.read_u16("v")).unwrap_err().is_end_of_data());
    }

    #[test]
    fn test_terminated_array_includes_terminal() {
        let bytes = [b'a', b'b', 0, b'c'];
        let mut rb = ReadBuffer::new(&bytes);
        let items = read_terminated_array(&mut rb, "chars", |rb| Byte::parse(rb, ()), |b| b.0 == 0).unwrap();
        assert_eq!(items, vec![Byte(b'a'), Byte(b'b'), Byte(0)]);
        assert_eq!(rb.position_bytes(), 3);
    }

    #[test]
    fn test_terminated_array_stops_at_end_of_buffer() {
        let bytes = [1, 2];
        let mut rb = ReadBuffer::new(&bytes);
        let items = read_terminated_array(&mut rb, "chars", |rb| Byte::parse(rb, ()), |b| b.0 == 0).unwrap();
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn test_padding() {
        let mut wb = WriteBuffer::new();
        wb.write_u8("v", 1).unwrap();
        write_padding(&mut wb, "pad", 8, 0x00, 1).unwrap();
        let bytes = wb.into_bytes();
        assert_eq!(bytes, vec![1, 0]);

        let mut rb = ReadBuffer::new(&bytes);
        rb.read_u8("v").unwrap();
        read_padding(&mut rb, "pad", 8, 1).unwrap();
        assert_eq!(rb.remaining_bits(), 0);
    }

    #[test]
    fn test_optional() {
        let bytes = [9];
        let mut rb = ReadBuffer::new(&bytes);
        assert_eq!(read_optional(&mut rb, false, |rb| rb.read_u8("v")).unwrap(), None);
        assert_eq!(read_optional(&mut rb, true, |rb| rb.read_u8("v")).unwrap(), Some(9));
    }

    #[test]
    fn test_message_defaults() {
        let bytes = Byte(5).to_bytes().unwrap();
        assert_eq!(bytes, vec![5]);
        assert_eq!(Byte(5).length_in_bytes(), 1);
        assert_eq!(Byte::from_bytes(&bytes, ()).unwrap(), Byte(5));
    }

    #[test]
    fn test_read_enum_unknown_value() {
        let bytes = [0x99];
        let mut rb = ReadBuffer::new(&bytes);
        let err = read_enum(&mut rb, "area", 8, "MemoryArea", |_| None::<u8>).unwrap_err();
        assert!(matches!(
            err,
            CodecError::UnknownEnumValue { value: 0x99, position: 0, ref field, .. } if field == "area"
        ));
    }
}
