//! Field Parser: given a buffer, a byte position, an
//! options record, and a target type, scans one field and optionally
//! parses it to a typed value. The scanner (quote/escape handling,
//! delimiter/newline detection) is shared by every target type; only the
//! final conversion differs.

use bitflags::bitflags;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use crate::options::Options;

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct FieldStatus: u16 {
        const OK                    = 0b0000_0001;
        const SENTINEL              = 0b0000_0010;
        const INVALID_QUOTED_FIELD  = 0b0000_0100;
        const ESCAPE_PRESENT        = 0b0000_1000;
        const NEWLINE_TERMINATOR    = 0b0001_0000;
        const DELIMITER_TERMINATOR  = 0b0010_0000;
        const EOF_TERMINATOR        = 0b0100_0000;
    }
}

/// Typed value produced by a successful field parse.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FieldValue {
    Int(i64),
    Float(f64),
    Date(i32),       // days since epoch, matches chrono's internal representation scale
    DateTime(i64),   // microseconds since epoch
    Time(i64),       // nanoseconds since midnight
    Bool(bool),
    /// No typed value; caller should treat the poslen as authoritative
    /// (string / unpooled / missing cases).
    None,
}

/// The outcome of scanning and (optionally) parsing one field.
#[derive(Clone, Copy, Debug)]
pub struct ParsedField {
    pub value: FieldValue,
    pub status: FieldStatus,
    /// Byte position of the field's content, after any opening quote.
    pub content_pos: usize,
    /// Byte length of the field's content, before any closing quote.
    pub content_len: usize,
    /// Total bytes consumed including the closing delimiter/newline.
    pub consumed: usize,
}

#[inline]
fn is_delim_at(buf: &[u8], pos: usize, delim: &[u8]) -> bool {
    buf.len() >= pos + delim.len() && &buf[pos..pos + delim.len()] == delim
}

/// Scans the raw extent of a field starting at `pos`: handles quoting,
/// escaping, and whitespace trimming, but does not interpret the bytes
/// as any particular type. Returns content position/length, whether an
/// escape was present, total bytes consumed, and the terminator kind.
struct RawField {
    content_pos: usize,
    content_len: usize,
    consumed: usize,
    escape_present: bool,
    invalid_quote: bool,
    terminator: FieldStatus,
}

fn scan_raw_field(buf: &[u8], pos: usize, opts: &Options) -> RawField {
    let delim: &[u8] = opts.delim.as_deref().unwrap_or(b",");
    let len = buf.len();
    let space_or_tab_delim = delim == b" " || delim == b"\t";

    let mut cursor = pos;

    // Leading whitespace trimming happens before quote detection, and is
    // skipped entirely when the delimiter itself is space or tab.
    // Whitespace is trimmed *before* attempting a delimiter match, i.e.
    // trim-first precedence.
    if !space_or_tab_delim {
        while cursor < len
            && (buf[cursor] == opts.whitespace1 || buf[cursor] == opts.whitespace2)
        {
            cursor += 1;
        }
    }

    if cursor < len && buf[cursor] == opts.open_quote {
        let content_start = cursor + 1;
        let mut i = content_start;
        let mut escape_present = false;
        loop {
            if i >= len {
                return RawField {
                    content_pos: content_start,
                    content_len: i - content_start,
                    consumed: i - pos,
                    escape_present,
                    invalid_quote: true,
                    terminator: FieldStatus::EOF_TERMINATOR,
                };
            }
            let b = buf[i];
            if b == opts.escape_byte && opts.escape_byte != opts.close_quote && i + 1 < len {
                escape_present = true;
                i += 2;
                continue;
            }
            if b == opts.close_quote {
                // doubled close-quote is the escape convention when
                // escape_byte == close_quote (RFC4180-style "" escaping).
                if opts.escape_byte == opts.close_quote
                    && i + 1 < len
                    && buf[i + 1] == opts.close_quote
                {
                    escape_present = true;
                    i += 2;
                    continue;
                }
                let content_end = i;
                let mut after = i + 1;
                // trailing whitespace after the closing quote, before the delimiter
                if !space_or_tab_delim {
                    while after < len
                        && (buf[after] == opts.whitespace1 || buf[after] == opts.whitespace2)
                    {
                        after += 1;
                    }
                }
                let (consumed_extra, terminator) = match_terminator(buf, after, delim, opts);
                return RawField {
                    content_pos: content_start,
                    content_len: content_end - content_start,
                    consumed: (after + consumed_extra) - pos,
                    escape_present,
                    invalid_quote: false,
                    terminator,
                };
            }
            i += 1;
        }
    } else {
        let start = cursor;
        let mut i = cursor;
        loop {
            if i >= len {
                return RawField {
                    content_pos: start,
                    content_len: i - start,
                    consumed: i - pos,
                    escape_present: false,
                    invalid_quote: false,
                    terminator: FieldStatus::EOF_TERMINATOR,
                };
            }
            if buf[i] == b'\n' {
                return RawField {
                    content_pos: start,
                    content_len: i - start,
                    consumed: i + 1 - pos,
                    escape_present: false,
                    invalid_quote: false,
                    terminator: FieldStatus::NEWLINE_TERMINATOR,
                };
            }
            if buf[i] == b'\r' && i + 1 < len && buf[i + 1] == b'\n' {
                return RawField {
                    content_pos: start,
                    content_len: i - start,
                    consumed: i + 2 - pos,
                    escape_present: false,
                    invalid_quote: false,
                    terminator: FieldStatus::NEWLINE_TERMINATOR,
                };
            }
            if is_delim_at(buf, i, delim) {
                let mut after = i + delim.len();
                if opts.ignore_repeated {
                    while is_delim_at(buf, after, delim) {
                        after += delim.len();
                    }
                }
                return RawField {
                    content_pos: start,
                    content_len: i - start,
                    consumed: after - pos,
                    escape_present: false,
                    invalid_quote: false,
                    terminator: FieldStatus::DELIMITER_TERMINATOR,
                };
            }
            i += 1;
        }
    }
}

fn match_terminator(buf: &[u8], pos: usize, delim: &[u8], opts: &Options) -> (usize, FieldStatus) {
    let len = buf.len();
    if pos >= len {
        return (0, FieldStatus::EOF_TERMINATOR);
    }
    if buf[pos] == b'\n' {
        return (1, FieldStatus::NEWLINE_TERMINATOR);
    }
    if buf[pos] == b'\r' && pos + 1 < len && buf[pos + 1] == b'\n' {
        return (2, FieldStatus::NEWLINE_TERMINATOR);
    }
    if is_delim_at(buf, pos, delim) {
        let mut after = pos + delim.len();
        if opts.ignore_repeated {
            while is_delim_at(buf, after, delim) {
                after += delim.len();
            }
        }
        return (after - pos, FieldStatus::DELIMITER_TERMINATOR);
    }
    // Unexpected byte right after a close-quote; treat as immediate EOF
    // of this field so the caller can surface InvalidQuotedField context
    // upstream if it cares, without panicking here.
    (0, FieldStatus::EOF_TERMINATOR)
}

/// Un-escapes `raw`'s content against the same two bytes
/// [`scan_raw_field`] used to detect the escape: a doubled `close_quote`
/// collapses to one occurrence of it when `escape_byte == close_quote`
/// (RFC4180-style `""` escaping); otherwise `escape_byte` is a distinct
/// lead-in byte that is dropped, keeping the byte that follows it
/// literally (backslash-style escaping).
fn content_bytes<'a>(buf: &'a [u8], raw: &RawField, escape_byte: u8, close_quote: u8) -> std::borrow::Cow<'a, [u8]> {
    let slice = &buf[raw.content_pos..raw.content_pos + raw.content_len];
    if !raw.escape_present {
        return std::borrow::Cow::Borrowed(slice);
    }
    let doubled_style = escape_byte == close_quote;
    let mut out = Vec::with_capacity(slice.len());
    let mut i = 0;
    while i < slice.len() {
        if doubled_style && slice[i] == close_quote && i + 1 < slice.len() && slice[i + 1] == close_quote {
            out.push(close_quote);
            i += 2;
            continue;
        }
        if !doubled_style && slice[i] == escape_byte && i + 1 < slice.len() {
            out.push(slice[i + 1]);
            i += 2;
            continue;
        }
        out.push(slice[i]);
        i += 1;
    }
    std::borrow::Cow::Owned(out)
}

fn is_sentinel(bytes: &[u8], opts: &Options) -> bool {
    opts.missing_strings.contains(bytes)
}

/// Scans and parses one field as a plain (possibly escaped) string;
/// used for the String target and as the foundation for every other
/// target type.
pub fn parse_string(buf: &[u8], pos: usize, opts: &Options) -> ParsedField {
    let raw = scan_raw_field(buf, pos, opts);
    let mut status = raw.terminator;
    if raw.invalid_quote {
        status |= FieldStatus::INVALID_QUOTED_FIELD;
    } else {
        status |= FieldStatus::OK;
    }
    if raw.escape_present {
        status |= FieldStatus::ESCAPE_PRESENT;
    }
    let content = content_bytes(buf, &raw, opts.escape_byte, opts.close_quote);
    if is_sentinel(&content, opts) {
        status |= FieldStatus::SENTINEL;
    }
    ParsedField {
        value: FieldValue::None,
        status,
        content_pos: raw.content_pos,
        content_len: raw.content_len,
        consumed: raw.consumed,
    }
}

macro_rules! try_numeric {
    ($buf:expr, $pos:expr, $opts:expr, $parse_fn:expr, $variant:ident) => {{
        let raw = scan_raw_field($buf, $pos, $opts);
        if raw.invalid_quote {
            let mut status = FieldStatus::INVALID_QUOTED_FIELD | raw.terminator;
            if raw.escape_present {
                status |= FieldStatus::ESCAPE_PRESENT;
            }
            return ParsedField {
                value: FieldValue::None,
                status,
                content_pos: raw.content_pos,
                content_len: raw.content_len,
                consumed: raw.consumed,
            };
        }
        let content = content_bytes($buf, &raw, $opts.escape_byte, $opts.close_quote);
        let mut status = raw.terminator;
        if raw.escape_present {
            status |= FieldStatus::ESCAPE_PRESENT;
        }
        if content.is_empty() || is_sentinel(&content, $opts) {
            status |= FieldStatus::SENTINEL;
            return ParsedField {
                value: FieldValue::None,
                status,
                content_pos: raw.content_pos,
                content_len: raw.content_len,
                consumed: raw.consumed,
            };
        }
        match $parse_fn(&content, $opts) {
            Some(v) => {
                status |= FieldStatus::OK;
                ParsedField {
                    value: FieldValue::$variant(v),
                    status,
                    content_pos: raw.content_pos,
                    content_len: raw.content_len,
                    consumed: raw.consumed,
                }
            }
            None => ParsedField {
                value: FieldValue::None,
                status,
                content_pos: raw.content_pos,
                content_len: raw.content_len,
                consumed: raw.consumed,
            },
        }
    }};
}

fn parse_int_bytes(bytes: &[u8], _opts: &Options) -> Option<i64> {
    atoi_simd::parse::<i64>(bytes).ok()
}

fn parse_float_bytes(bytes: &[u8], opts: &Options) -> Option<f64> {
    if opts.decimal == b'.' {
        fast_float2::parse::<f64, _>(bytes).ok()
    } else {
        let mut owned = bytes.to_vec();
        for b in owned.iter_mut() {
            if *b == opts.decimal {
                *b = b'.';
            }
        }
        fast_float2::parse::<f64, _>(&owned).ok()
    }
}

fn parse_bool_bytes(bytes: &[u8], opts: &Options) -> Option<bool> {
    let s = std::str::from_utf8(bytes).ok()?;
    if opts.true_strings.iter().any(|t| t == s) {
        Some(true)
    } else if opts.false_strings.iter().any(|f| f == s) {
        Some(false)
    } else {
        None
    }
}

const DEFAULT_DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%d/%m/%Y"];
const DEFAULT_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
];
const DEFAULT_TIME_FORMATS: &[&str] = &["%H:%M:%S%.f", "%H:%M:%S", "%H:%M"];

fn parse_date_bytes(bytes: &[u8], opts: &Options) -> Option<i32> {
    let s = std::str::from_utf8(bytes).ok()?;
    if let Some(fmt) = &opts.date_format {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Some(days_since_epoch(d));
        }
    }
    DEFAULT_DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
        .map(days_since_epoch)
}

fn days_since_epoch(d: NaiveDate) -> i32 {
    (d - NaiveDate::from_ymd_opt(1970, 1, 1).unwrap()).num_days() as i32
}

fn parse_datetime_bytes(bytes: &[u8], opts: &Options) -> Option<i64> {
    let s = std::str::from_utf8(bytes).ok()?;
    if let Some(fmt) = &opts.date_format {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(micros_since_epoch(dt));
        }
    }
    DEFAULT_DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(micros_since_epoch)
}

fn micros_since_epoch(dt: NaiveDateTime) -> i64 {
    dt.and_utc().timestamp_micros()
}

fn parse_time_bytes(bytes: &[u8], _opts: &Options) -> Option<i64> {
    let s = std::str::from_utf8(bytes).ok()?;
    DEFAULT_TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveTime::parse_from_str(s, fmt).ok())
        .map(|t| {
            let midnight = NaiveTime::from_hms_opt(0, 0, 0).unwrap();
            (t - midnight).num_nanoseconds().unwrap_or(0)
        })
}

pub fn parse_int(buf: &[u8], pos: usize, opts: &Options) -> ParsedField {
    try_numeric!(buf, pos, opts, parse_int_bytes, Int)
}

pub fn parse_float(buf: &[u8], pos: usize, opts: &Options) -> ParsedField {
    try_numeric!(buf, pos, opts, parse_float_bytes, Float)
}

pub fn parse_bool(buf: &[u8], pos: usize, opts: &Options) -> ParsedField {
    try_numeric!(buf, pos, opts, parse_bool_bytes, Bool)
}

pub fn parse_date(buf: &[u8], pos: usize, opts: &Options) -> ParsedField {
    try_numeric!(buf, pos, opts, parse_date_bytes, Date)
}

pub fn parse_datetime(buf: &[u8], pos: usize, opts: &Options) -> ParsedField {
    try_numeric!(buf, pos, opts, parse_datetime_bytes, DateTime)
}

pub fn parse_time(buf: &[u8], pos: usize, opts: &Options) -> ParsedField {
    try_numeric!(buf, pos, opts, parse_time_bytes, Time)
}

/// Returns the un-escaped bytes of a field previously scanned with any
/// of the `parse_*` functions above, given its content position/length
/// and whether it had an escape present. `escape_byte`/`close_quote`
/// must be the same configured bytes the original scan used, so that a
/// non-default `escape_byte` or quote char un-escapes the same way on
/// read as it was detected on scan. Used to materialize STRING values
/// from the tape's poslen sidecar.
pub fn field_bytes<'a>(
    buf: &'a [u8],
    content_pos: usize,
    content_len: usize,
    escaped: bool,
    escape_byte: u8,
    close_quote: u8,
) -> std::borrow::Cow<'a, [u8]> {
    let raw = RawField {
        content_pos,
        content_len,
        consumed: 0,
        escape_present: escaped,
        invalid_quote: false,
        terminator: FieldStatus::OK,
    };
    content_bytes(buf, &raw, escape_byte, close_quote)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::OptionsBuilder;

    #[test]
    fn parses_plain_int() {
        let opts = OptionsBuilder::new().build();
        let pf = parse_int(b"123,rest", 0, &opts);
        assert_eq!(pf.value, FieldValue::Int(123));
        assert!(pf.status.contains(FieldStatus::OK));
        assert!(pf.status.contains(FieldStatus::DELIMITER_TERMINATOR));
    }

    #[test]
    fn quoted_field_unescapes_doubled_quotes() {
        let opts = OptionsBuilder::new().build();
        let input = b"\"he said \"\"hi\"\"\"\nok\n";
        let pf = parse_string(input, 0, &opts);
        assert!(pf.status.contains(FieldStatus::ESCAPE_PRESENT));
        let bytes = field_bytes(input, pf.content_pos, pf.content_len, true, opts.escape_byte, opts.close_quote);
        assert_eq!(&*bytes, b"he said \"hi\"".as_slice());
    }

    #[test]
    fn quoted_field_unescapes_backslash_style() {
        let opts = OptionsBuilder::new().escape_byte(b'\\').build();
        let input = b"\"he said \\\"hi\\\"\"\nok\n";
        let pf = parse_string(input, 0, &opts);
        assert!(pf.status.contains(FieldStatus::ESCAPE_PRESENT));
        let bytes = field_bytes(input, pf.content_pos, pf.content_len, true, opts.escape_byte, opts.close_quote);
        assert_eq!(&*bytes, b"he said \"hi\"".as_slice());
    }

    #[test]
    fn unterminated_quote_is_invalid() {
        let opts = OptionsBuilder::new().build();
        let pf = parse_string(b"\"oops", 0, &opts);
        assert!(pf.status.contains(FieldStatus::INVALID_QUOTED_FIELD));
    }

    #[test]
    fn sentinel_marks_missing() {
        let opts = OptionsBuilder::new().build();
        let pf = parse_int(b",next", 0, &opts);
        assert!(pf.status.contains(FieldStatus::SENTINEL));
    }

    #[test]
    fn float_with_custom_decimal() {
        let opts = OptionsBuilder::new().decimal(b',').build();
        let pf = parse_float(b"3,14\n", 0, &opts);
        assert_eq!(pf.value, FieldValue::Float(3.14));
    }
}
