//! Conversion between S7 data item bytes and [`PlcValue`]s.
//!
//! | Type | Wire form |
//! |------|-----------|
//! | BOOL | one byte, value in bit 0 |
//! | integers, REAL, LREAL | big-endian, native width |
//! | CHAR / WCHAR | one byte / one UTF-16 code unit |
//! | STRING | max length u8, actual length u8, characters padded to max |
//! | WSTRING | max length u16, actual length u16, UTF-16BE padded to max |
//! | TIME / LTIME | signed milliseconds (i32) / nanoseconds (i64) |
//! | DATE | days since 1990-01-01 (u16) |
//! | TIME_OF_DAY | milliseconds since midnight (u32) |
//! | DATE_AND_TIME | eight BCD bytes |

use crate::buffer::{ReadBuffer, WriteBuffer};
use crate::error::{CodecError, Result};
use crate::plc_value::{DateAndTime, PlcValue};

use super::tag::S7Tag;
use super::types::TransportSize;

/// Decodes the data of a read response item for `tag`.
///
/// A tag with one element yields a single value, otherwise a list.
///
/// # Example
///
/// ```
/// use plc_wire::PlcValue;
/// use plc_wire::s7::{decode_value, S7Tag};
///
/// let tag: S7Tag = "%DB1.DBW0:INT[2]".parse().unwrap();
/// let value = decode_value(&tag, &[0x00, 0x2A, 0xFF, 0xFF]).unwrap();
/// assert_eq!(value, PlcValue::List(vec![PlcValue::Int(42), PlcValue::Int(-1)]));
/// ```
pub fn decode_value(tag: &S7Tag, data: &[u8]) -> Result<PlcValue> {
    let mut rb = ReadBuffer::new(data);
    rb.push_context(tag.data_type.name());
    let mut values = Vec::with_capacity(usize::from(tag.num_elements).min(1024));
    for _ in 0..tag.num_elements {
        values.push(read_element(&mut rb, tag)?);
    }
    rb.pop_context();
    if values.len() == 1 {
        Ok(values.remove(0))
    } else {
        Ok(PlcValue::List(values))
    }
}

/// Encodes `value` as the data of a write request item for `tag`.
///
/// The number of elements in `value` must equal the tag's element count.
pub fn encode_value(tag: &S7Tag, value: &PlcValue) -> Result<Vec<u8>> {
    let elements = value.elements();
    if elements.len() != usize::from(tag.num_elements) {
        return Err(CodecError::invalid_parameter(
            "value",
            format!("{} elements given for a tag of {}", elements.len(), tag.num_elements),
        ));
    }
    let mut wb = WriteBuffer::with_capacity(elements.len() * tag.data_type.size_in_bytes());
    wb.push_context(tag.data_type.name());
    for element in elements {
        write_element(&mut wb, tag, element)?;
    }
    wb.pop_context();
    Ok(wb.into_bytes())
}

fn read_element(rb: &mut ReadBuffer<'_>, tag: &S7Tag) -> Result<PlcValue> {
    let value = match tag.data_type {
        TransportSize::Bool => PlcValue::Bool(rb.read_u8("value")? & 0x01 != 0),
        TransportSize::Byte => PlcValue::Byte(rb.read_u8("value")?),
        TransportSize::Word => PlcValue::Word(rb.read_u16("value")?),
        TransportSize::Dword => PlcValue::DWord(rb.read_u32("value")?),
        TransportSize::Lword => PlcValue::LWord(rb.read_u64("value")?),
        TransportSize::Sint => PlcValue::SInt(rb.read_i8("value")?),
        TransportSize::Usint => PlcValue::USInt(rb.read_u8("value")?),
        TransportSize::Int => PlcValue::Int(rb.read_i16("value")?),
        TransportSize::Uint => PlcValue::UInt(rb.read_u16("value")?),
        TransportSize::Dint => PlcValue::DInt(rb.read_i32("value")?),
        TransportSize::Udint => PlcValue::UDInt(rb.read_u32("value")?),
        TransportSize::Lint => PlcValue::LInt(rb.read_i64("value")?),
        TransportSize::Ulint => PlcValue::ULInt(rb.read_u64("value")?),
        TransportSize::Real => PlcValue::Real(rb.read_f32("value")?),
        TransportSize::Lreal => PlcValue::LReal(rb.read_f64("value")?),
        TransportSize::Char => PlcValue::Char(char::from(rb.read_u8("value")?)),
        TransportSize::Wchar => {
            let unit = rb.read_u16("value")?;
            PlcValue::WChar(decode_utf16(&[unit])?.chars().next().unwrap_or('\u{FFFD}'))
        }
        TransportSize::String => PlcValue::String(read_string(rb, tag.effective_string_length())?),
        TransportSize::Wstring => PlcValue::WString(read_wstring(rb, tag.effective_string_length())?),
        TransportSize::Time => PlcValue::Time(i64::from(rb.read_i32("value")?)),
        TransportSize::Ltime => PlcValue::LTime(rb.read_i64("value")?),
        TransportSize::Date => PlcValue::Date(rb.read_u16("value")?),
        TransportSize::TimeOfDay | TransportSize::Tod => PlcValue::TimeOfDay(rb.read_u32("value")?),
        TransportSize::DateAndTime | TransportSize::Dt => PlcValue::DateAndTime(read_date_and_time(rb)?),
    };
    Ok(value)
}

fn write_element(wb: &mut WriteBuffer, tag: &S7Tag, value: &PlcValue) -> Result<()> {
    match tag.data_type {
        TransportSize::Bool => {
            let b = value.as_bool().ok_or_else(|| mismatch(tag, value))?;
            wb.write_u8("value", u8::from(b))
        }
        TransportSize::Byte | TransportSize::Usint => wb.write_u8("value", unsigned(tag, value)?),
        TransportSize::Word | TransportSize::Uint => wb.write_u16("value", unsigned(tag, value)?),
        TransportSize::Dword | TransportSize::Udint => wb.write_u32("value", unsigned(tag, value)?),
        TransportSize::Lword | TransportSize::Ulint => wb.write_u64("value", unsigned(tag, value)?),
        TransportSize::Sint => wb.write_i8("value", signed(tag, value)?),
        TransportSize::Int => wb.write_i16("value", signed(tag, value)?),
        TransportSize::Dint => wb.write_i32("value", signed(tag, value)?),
        TransportSize::Lint => wb.write_i64("value", signed(tag, value)?),
        TransportSize::Real => wb.write_f32("value", value.as_f64().ok_or_else(|| mismatch(tag, value))? as f32),
        TransportSize::Lreal => wb.write_f64("value", value.as_f64().ok_or_else(|| mismatch(tag, value))?),
        TransportSize::Char => {
            let c = value.as_char().ok_or_else(|| mismatch(tag, value))?;
            wb.write_u8("value", latin1(c)?)
        }
        TransportSize::Wchar => {
            let c = value.as_char().ok_or_else(|| mismatch(tag, value))?;
            let mut units = [0u16; 2];
            match c.encode_utf16(&mut units) {
                [unit] => wb.write_u16("value", *unit),
                _ => Err(CodecError::encoding("value", format!("'{}' needs two UTF-16 code units", c))),
            }
        }
        TransportSize::String => {
            let s = text(tag, value)?;
            write_string(wb, &s, tag.effective_string_length())
        }
        TransportSize::Wstring => {
            let s = text(tag, value)?;
            write_wstring(wb, &s, tag.effective_string_length())
        }
        TransportSize::Time => wb.write_i32("value", signed(tag, value)?),
        TransportSize::Ltime => wb.write_i64("value", signed(tag, value)?),
        TransportSize::Date => wb.write_u16("value", unsigned(tag, value)?),
        TransportSize::TimeOfDay | TransportSize::Tod => wb.write_u32("value", unsigned(tag, value)?),
        TransportSize::DateAndTime | TransportSize::Dt => match value {
            PlcValue::DateAndTime(dt) => write_date_and_time(wb, dt),
            other => Err(mismatch(tag, other)),
        },
    }
}

fn mismatch(tag: &S7Tag, value: &PlcValue) -> CodecError {
    CodecError::encoding("value", format!("{} cannot be written as {}", value.type_name(), tag.data_type))
}

fn signed<T: TryFrom<i64>>(tag: &S7Tag, value: &PlcValue) -> Result<T> {
    let v = value.as_i64().ok_or_else(|| mismatch(tag, value))?;
    T::try_from(v).map_err(|_| CodecError::encoding("value", format!("{} does not fit {}", v, tag.data_type)))
}

fn unsigned<T: TryFrom<u64>>(tag: &S7Tag, value: &PlcValue) -> Result<T> {
    let v = value.as_u64().ok_or_else(|| mismatch(tag, value))?;
    T::try_from(v).map_err(|_| CodecError::encoding("value", format!("{} does not fit {}", v, tag.data_type)))
}

fn text(tag: &S7Tag, value: &PlcValue) -> Result<String> {
    match value {
        PlcValue::String(s) | PlcValue::WString(s) => Ok(s.clone()),
        PlcValue::Char(c) | PlcValue::WChar(c) => Ok(c.to_string()),
        other => Err(mismatch(tag, other)),
    }
}

fn latin1(c: char) -> Result<u8> {
    u8::try_from(u32::from(c)).map_err(|_| CodecError::encoding("value", format!("'{}' is not a Latin-1 character", c)))
}

fn decode_utf16(units: &[u16]) -> Result<String> {
    String::from_utf16(units).map_err(|e| CodecError::encoding("value", e.to_string()))
}

fn read_string(rb: &mut ReadBuffer<'_>, string_length: u16) -> Result<String> {
    let max = rb.read_u8("maxLength")?;
    let actual = rb.read_u8("actualLength")?;
    let chars = rb.read_bytes("chars", usize::from(string_length))?;
    let len = usize::from(actual.min(max)).min(chars.len());
    Ok(chars[..len].iter().copied().map(char::from).collect())
}

fn write_string(wb: &mut WriteBuffer, s: &str, string_length: u16) -> Result<()> {
    let max = u8::try_from(string_length)
        .map_err(|_| CodecError::encoding("maxLength", format!("STRING length {} exceeds 254", string_length)))?;
    let bytes = s.chars().map(latin1).collect::<Result<Vec<u8>>>()?;
    if bytes.len() > usize::from(max) {
        return Err(CodecError::encoding(
            "chars",
            format!("{} characters do not fit STRING({})", bytes.len(), max),
        ));
    }
    wb.write_u8("maxLength", max)?;
    wb.write_u8("actualLength", bytes.len() as u8)?;
    wb.write_bytes("chars", &bytes)?;
    wb.write_bytes("chars", &vec![0u8; usize::from(max) - bytes.len()])
}

fn read_wstring(rb: &mut ReadBuffer<'_>, string_length: u16) -> Result<String> {
    let max = rb.read_u16("maxLength")?;
    let actual = rb.read_u16("actualLength")?;
    let mut units = Vec::with_capacity(usize::from(string_length));
    for _ in 0..string_length {
        units.push(rb.read_u16("chars")?);
    }
    let len = usize::from(actual.min(max)).min(units.len());
    decode_utf16(&units[..len])
}

fn write_wstring(wb: &mut WriteBuffer, s: &str, string_length: u16) -> Result<()> {
    let units: Vec<u16> = s.encode_utf16().collect();
    if units.len() > usize::from(string_length) {
        return Err(CodecError::encoding(
            "chars",
            format!("{} code units do not fit WSTRING({})", units.len(), string_length),
        ));
    }
    wb.write_u16("maxLength", string_length)?;
    wb.write_u16("actualLength", units.len() as u16)?;
    for unit in units.iter().copied().chain(std::iter::repeat(0).take(usize::from(string_length) - units.len())) {
        wb.write_u16("chars", unit)?;
    }
    Ok(())
}

fn from_bcd(field: &str, b: u8) -> Result<u8> {
    let (hi, lo) = (b >> 4, b & 0x0F);
    if hi > 9 || lo > 9 {
        return Err(CodecError::encoding(field, format!("0x{:02X} is not a BCD digit pair", b)));
    }
    Ok(hi * 10 + lo)
}

fn to_bcd(field: &str, v: u8) -> Result<u8> {
    if v > 99 {
        return Err(CodecError::encoding(field, format!("{} does not fit two BCD digits", v)));
    }
    Ok(((v / 10) << 4) | (v % 10))
}

fn read_date_and_time(rb: &mut ReadBuffer<'_>) -> Result<DateAndTime> {
    let year = from_bcd("year", rb.read_u8("year")?)?;
    let month = from_bcd("month", rb.read_u8("month")?)?;
    let day = from_bcd("day", rb.read_u8("day")?)?;
    let hour = from_bcd("hour", rb.read_u8("hour")?)?;
    let minute = from_bcd("minute", rb.read_u8("minute")?)?;
    let second = from_bcd("second", rb.read_u8("second")?)?;
    let ms_high = from_bcd("millisecond", rb.read_u8("millisecond")?)?;
    let ms_low = rb.read_unsigned("millisecond", 4)? as u8;
    let weekday = rb.read_unsigned("weekday", 4)? as u8;
    if ms_low > 9 {
        return Err(CodecError::encoding("millisecond", format!("{} is not a BCD digit", ms_low)));
    }
    Ok(DateAndTime {
        year: if year >= 90 { 1900 + u16::from(year) } else { 2000 + u16::from(year) },
        month,
        day,
        hour,
        minute,
        second,
        millisecond: u16::from(ms_high) * 10 + u16::from(ms_low),
        weekday,
    })
}

fn write_date_and_time(wb: &mut WriteBuffer, dt: &DateAndTime) -> Result<()> {
    if !(1990..=2089).contains(&dt.year) {
        return Err(CodecError::encoding("year", format!("{} outside 1990..=2089", dt.year)));
    }
    if dt.millisecond > 999 {
        return Err(CodecError::encoding("millisecond", format!("{} exceeds 999", dt.millisecond)));
    }
    wb.write_u8("year", to_bcd("year", (dt.year % 100) as u8)?)?;
    wb.write_u8("month", to_bcd("month", dt.month)?)?;
    wb.write_u8("day", to_bcd("day", dt.day)?)?;
    wb.write_u8("hour", to_bcd("hour", dt.hour)?)?;
    wb.write_u8("minute", to_bcd("minute", dt.minute)?)?;
    wb.write_u8("second", to_bcd("second", dt.second)?)?;
    wb.write_u8("millisecond", to_bcd("millisecond", (dt.millisecond / 10) as u8)?)?;
    wb.write_unsigned("millisecond", 4, u64::from(dt.millisecond % 10))?;
    wb.write_unsigned("weekday", 4, u64::from(dt.weekday))
}
