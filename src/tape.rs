//! Tape Builder: the packed per-column storage. Each row
//! occupies one *poslen* slot (byte position, length, and flags) and one
//! *value* slot (raw bits of the typed value, or a pool ref).
//!
//! The poslen slot is always written, for every row of every column,
//! regardless of the column's currently inferred type. Because position
//! and length survive independently of whatever typed value ends up in
//! the value slot, promoting a column to STRING never needs a second
//! pass over the source buffer to recover field boundaries, it only
//! needs to stop trusting the value slot's bit pattern.

use crate::typecode::{BaseType, TypeCode};

const MISSING_BIT: u64 = 1 << 63;
const WAS_INT_BIT: u64 = 1 << 62;
const ESCAPE_BIT: u64 = 1 << 61;
const OFFSET_SHIFT: u32 = 16;
const OFFSET_BITS: u32 = 45;
const OFFSET_MASK: u64 = (1u64 << OFFSET_BITS) - 1;
const LEN_MASK: u64 = 0xFFFF;

pub const MAX_OFFSET: u64 = OFFSET_MASK;
pub const MAX_FIELD_LEN: u64 = LEN_MASK;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PosLen {
    pub missing: bool,
    pub was_int: bool,
    pub escape_present: bool,
    pub offset: u64,
    pub length: u64,
}

impl PosLen {
    pub fn pack(self) -> u64 {
        let mut bits = (self.offset & OFFSET_MASK) << OFFSET_SHIFT | (self.length & LEN_MASK);
        if self.missing {
            bits |= MISSING_BIT;
        }
        if self.was_int {
            bits |= WAS_INT_BIT;
        }
        if self.escape_present {
            bits |= ESCAPE_BIT;
        }
        bits
    }

    pub fn unpack(bits: u64) -> Self {
        PosLen {
            missing: bits & MISSING_BIT != 0,
            was_int: bits & WAS_INT_BIT != 0,
            escape_present: bits & ESCAPE_BIT != 0,
            offset: (bits >> OFFSET_SHIFT) & OFFSET_MASK,
            length: bits & LEN_MASK,
        }
    }

    pub fn missing_with_pos(offset: u64, length: u64) -> Self {
        PosLen {
            missing: true,
            was_int: false,
            escape_present: false,
            offset,
            length,
        }
    }
}

/// Packed column storage: one poslen slot and one value slot per row.
/// Kept as two parallel `Vec<u64>` rather than a single interleaved
/// buffer of pairs — bitwise-equivalent to a layout of two 64-bit slots
/// per row, just addressed by two indices instead of one.
#[derive(Clone, Debug, Default)]
pub struct Tape {
    poslen: Vec<u64>,
    value: Vec<u64>,
    len: usize,
}

impl Tape {
    pub fn with_capacity(cap: usize) -> Self {
        Tape {
            poslen: vec![0u64; cap],
            value: vec![0u64; cap],
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.poslen.len()
    }

    /// Grows to `current + estimate((bytes_remaining) / average_bytes_per_row) + 10`
    /// rows. Existing content is preserved; new slots are zeroed.
    pub fn grow_for_overrun(&mut self, bytes_remaining: usize, average_bytes_per_row: f64) {
        let extra_rows = if average_bytes_per_row > 0.0 {
            (bytes_remaining as f64 / average_bytes_per_row).ceil() as usize
        } else {
            self.capacity().max(16)
        };
        let new_cap = self.capacity() + extra_rows + 10;
        self.poslen.resize(new_cap, 0);
        self.value.resize(new_cap, 0);
    }

    fn ensure_row(&mut self, row: usize) {
        if row >= self.capacity() {
            self.grow_for_overrun(0, self.capacity().max(1) as f64);
        }
        if row >= self.len {
            self.len = row + 1;
        }
    }

    pub fn set_poslen(&mut self, row: usize, pl: PosLen) {
        self.ensure_row(row);
        self.poslen[row] = pl.pack();
    }

    pub fn get_poslen(&self, row: usize) -> PosLen {
        PosLen::unpack(self.poslen[row])
    }

    pub fn set_value_bits(&mut self, row: usize, bits: u64) {
        self.ensure_row(row);
        self.value[row] = bits;
    }

    pub fn get_value_bits(&self, row: usize) -> u64 {
        self.value[row]
    }

    pub fn set_int(&mut self, row: usize, v: i64) {
        self.set_value_bits(row, v as u64);
    }

    pub fn get_int(&self, row: usize) -> i64 {
        self.get_value_bits(row) as i64
    }

    pub fn set_float(&mut self, row: usize, v: f64) {
        self.set_value_bits(row, v.to_bits());
    }

    /// Reads slot `row` as a float, honoring the was-integer flag: a row
    /// whose original bytes parsed as an integer before the column was
    /// promoted to FLOAT is widened on read rather than reinterpreting
    /// its bits as an f64.
    pub fn get_float(&self, row: usize) -> f64 {
        let pl = self.get_poslen(row);
        if pl.was_int {
            self.get_int(row) as f64
        } else {
            f64::from_bits(self.get_value_bits(row))
        }
    }

    pub fn set_bool(&mut self, row: usize, v: bool) {
        self.set_value_bits(row, v as u64);
    }

    pub fn get_bool(&self, row: usize) -> bool {
        self.get_value_bits(row) != 0
    }

    pub fn set_ref(&mut self, row: usize, r: u32) {
        self.set_value_bits(row, r as u64);
    }

    pub fn get_ref(&self, row: usize) -> u32 {
        self.get_value_bits(row) as u32
    }

    /// Re-encodes every committed row's value slot from Int64 bits to
    /// Float64 bits in place, for the INT -> FLOAT promotion edge case.
    /// Rows are not touched if already missing.
    pub fn promote_int_column_to_float(&mut self) {
        for row in 0..self.len {
            let pl = self.get_poslen(row);
            if pl.missing {
                continue;
            }
            let as_int = self.get_int(row);
            self.set_float(row, as_int as f64);
            let mut pl = pl;
            pl.was_int = false;
            self.poslen[row] = pl.pack();
        }
    }

    pub fn truncate(&mut self, new_len: usize) {
        self.len = new_len.min(self.len);
    }
}

/// A cell's fully interpreted contents, produced by [`crate::file::File`]
/// reads. Branches on the column's final [`TypeCode`] once per access
/// rather than storing a tagged union per row.
///
/// `Str` holds a `Cow` rather than a plain `&str` because a field with
/// doubled-quote escapes has no unescaped representation borrowed from
/// the source buffer; such cells carry an owned, already-unescaped copy.
#[derive(Clone, Debug, PartialEq)]
pub enum AnyValue<'a> {
    Missing,
    Int(i64),
    Float(f64),
    Date(i32),
    DateTime(i64),
    Time(i64),
    Bool(bool),
    Str(std::borrow::Cow<'a, str>),
    PooledStr(&'a str),
}

impl Tape {
    pub fn read_cell<'a>(
        &self,
        row: usize,
        base: BaseType,
        buffer: &'a [u8],
        refs: Option<&'a [Box<str>]>,
        escape_byte: u8,
        close_quote: u8,
    ) -> AnyValue<'a> {
        let pl = self.get_poslen(row);
        if pl.missing {
            return AnyValue::Missing;
        }
        match base {
            BaseType::Empty | BaseType::MissingType => AnyValue::Missing,
            BaseType::Int => AnyValue::Int(self.get_int(row)),
            BaseType::Float => AnyValue::Float(self.get_float(row)),
            BaseType::Date => AnyValue::Date(self.get_value_bits(row) as i32),
            BaseType::DateTime => AnyValue::DateTime(self.get_int(row)),
            BaseType::Time => AnyValue::Time(self.get_int(row)),
            BaseType::Bool => AnyValue::Bool(self.get_bool(row)),
            BaseType::Pool => {
                let r = self.get_ref(row);
                match refs.and_then(|rs| rs.get(r.wrapping_sub(1) as usize)) {
                    Some(s) => AnyValue::PooledStr(s),
                    None => AnyValue::Missing,
                }
            }
            BaseType::String => {
                let start = pl.offset as usize;
                let bytes = crate::parser::field_bytes(buffer, start, pl.length as usize, pl.escape_present, escape_byte, close_quote);
                // Invalid utf8 degrades to lossy rather than panicking.
                let s = match bytes {
                    std::borrow::Cow::Borrowed(b) => match simdutf8::basic::from_utf8(b) {
                        Ok(s) => std::borrow::Cow::Borrowed(s),
                        Err(_) => String::from_utf8_lossy(b).into_owned().into(),
                    },
                    std::borrow::Cow::Owned(o) => match String::from_utf8(o) {
                        Ok(s) => std::borrow::Cow::Owned(s),
                        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned().into(),
                    },
                };
                AnyValue::Str(s)
            }
        }
    }
}

/// Per-column poslen-only capture used while walking a column that has
/// not yet been committed to a concrete type (EMPTY/MISSINGTYPE): there
/// is no value slot to populate yet, but position/length must still be
/// recorded so a later promotion to STRING has something to read.
pub fn record_uncommitted(tape: &mut Tape, row: usize, pl: PosLen) {
    tape.set_poslen(row, pl);
    tape.set_value_bits(row, 0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poslen_round_trips() {
        let pl = PosLen {
            missing: true,
            was_int: true,
            escape_present: true,
            offset: 12345,
            length: 42,
        };
        let bits = pl.pack();
        assert_eq!(PosLen::unpack(bits), pl);
    }

    #[test]
    fn max_offset_and_length_fit() {
        let pl = PosLen {
            missing: false,
            was_int: false,
            escape_present: false,
            offset: MAX_OFFSET,
            length: MAX_FIELD_LEN,
        };
        assert_eq!(PosLen::unpack(pl.pack()), pl);
    }

    #[test]
    fn float_promotion_widens_prior_ints() {
        let mut tape = Tape::with_capacity(4);
        tape.set_poslen(0, PosLen { missing: false, was_int: true, escape_present: false, offset: 0, length: 1 });
        tape.set_int(0, 7);
        assert_eq!(tape.get_float(0), 7.0);
        tape.promote_int_column_to_float();
        assert_eq!(tape.get_float(0), 7.0);
        assert!(!tape.get_poslen(0).was_int);
    }

    #[test]
    fn missing_flag_overrides_value_slot() {
        let mut tape = Tape::with_capacity(1);
        tape.set_poslen(0, PosLen::missing_with_pos(3, 2));
        tape.set_int(0, 999);
        assert!(tape.get_poslen(0).missing);
    }
}
