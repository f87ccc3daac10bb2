//! Type Inference & Promotion: the per-column state
//! machine that wires the Field Parser, Tape Builder, and String Pool
//! together. [`Column::ingest_cell`] is the single entry point used by
//! both the sequential scan and each worker slice of the Parallel
//! Coordinator.

use crate::error::{CsvTapeError, ParseWarning, Result};
use crate::options::Options;
use crate::parser::{self, FieldStatus, FieldValue, ParsedField};
use crate::pool::{self, PoolRefMap};
use crate::tape::{PosLen, Tape};
use crate::typecode::{BaseType, TypeCode};

/// One output column: its inferred/declared type, its tape, and (if it
/// ends up POOL-typed) its string pool.
pub struct Column {
    pub name: String,
    pub index: usize,
    pub type_code: TypeCode,
    pub tape: Tape,
    pub pool: Option<PoolRefMap>,
}

impl Column {
    pub fn new(name: String, index: usize, capacity: usize, user_type: Option<TypeCode>) -> Self {
        Column {
            name,
            index,
            type_code: user_type.unwrap_or_default(),
            tape: Tape::with_capacity(capacity),
            pool: None,
        }
    }

    /// Parses one cell at `pos` in `buf`, updates this column's type,
    /// tape, and pool as needed, and returns the number of bytes the
    /// field consumed (including its trailing delimiter/newline).
    pub fn ingest_cell(
        &mut self,
        row: usize,
        buf: &[u8],
        pos: usize,
        opts: &Options,
        row_estimate: usize,
        warnings: &mut Vec<ParseWarning>,
    ) -> Result<usize> {
        if self.type_code.is_user() {
            return self.ingest_user_pinned(row, buf, pos, opts, warnings);
        }

        match self.type_code.base() {
            BaseType::Empty | BaseType::MissingType => self.ingest_cascade(row, buf, pos, opts, row_estimate),
            BaseType::Int => self.ingest_concrete(row, buf, pos, opts, parser::parse_int, BaseType::Int),
            BaseType::Float => self.ingest_concrete(row, buf, pos, opts, parser::parse_float, BaseType::Float),
            BaseType::Date => self.ingest_concrete(row, buf, pos, opts, parser::parse_date, BaseType::Date),
            BaseType::DateTime => self.ingest_concrete(row, buf, pos, opts, parser::parse_datetime, BaseType::DateTime),
            BaseType::Time => self.ingest_concrete(row, buf, pos, opts, parser::parse_time, BaseType::Time),
            BaseType::Bool => self.ingest_concrete(row, buf, pos, opts, parser::parse_bool, BaseType::Bool),
            BaseType::Pool => self.ingest_pool(row, buf, pos, opts, row_estimate),
            BaseType::String => self.ingest_string(row, buf, pos, opts),
        }
    }

    fn ingest_user_pinned(
        &mut self,
        row: usize,
        buf: &[u8],
        pos: usize,
        opts: &Options,
        warnings: &mut Vec<ParseWarning>,
    ) -> Result<usize> {
        let base = self.type_code.base();
        let pf = parse_as(base, buf, pos, opts);
        self.check_invalid_quote(row, pos, &pf)?;

        if pf.status.contains(FieldStatus::SENTINEL) {
            self.commit_missing(row, &pf);
            return Ok(pf.consumed);
        }
        if pf.status.contains(FieldStatus::OK) {
            self.write_typed(row, &pf, base);
            return Ok(pf.consumed);
        }

        if opts.strict {
            return Err(CsvTapeError::StrictParseError {
                row,
                col: self.index,
                byte_pos: pos,
            });
        }
        crate::error::emit_warning(
            warnings,
            opts.silence_warnings,
            ParseWarning::CoercedToMissing { row, col: self.index },
        );
        self.commit_missing(row, &pf);
        Ok(pf.consumed)
    }

    /// Column type is still EMPTY or MISSINGTYPE: every row so far has
    /// either been missing or unseen. Tries each candidate type in
    /// order and commits to the first that parses; STRING always succeeds and is the cascade's backstop.
    fn ingest_cascade(&mut self, row: usize, buf: &[u8], pos: usize, opts: &Options, row_estimate: usize) -> Result<usize> {
        let probe = parser::parse_string(buf, pos, opts);
        self.check_invalid_quote(row, pos, &probe)?;
        if probe.status.contains(FieldStatus::SENTINEL) {
            self.type_code = self.type_code.with_base(BaseType::MissingType).with_missing();
            self.commit_missing(row, &probe);
            return Ok(probe.consumed);
        }

        const CASCADE: &[(BaseType, fn(&[u8], usize, &Options) -> ParsedField)] = &[
            (BaseType::Int, parser::parse_int),
            (BaseType::Float, parser::parse_float),
            (BaseType::Date, parser::parse_date),
            (BaseType::DateTime, parser::parse_datetime),
            (BaseType::Time, parser::parse_time),
            (BaseType::Bool, parser::parse_bool),
        ];
        for (base, parse_fn) in CASCADE.iter().copied() {
            let pf = parse_fn(buf, pos, opts);
            if pf.status.contains(FieldStatus::OK) {
                self.commit_base(apply_type_map(base, opts));
                self.write_typed(row, &pf, base);
                return Ok(pf.consumed);
            }
        }

        // Nothing else matched: STRING, or POOL if pooling is on.
        if opts.pool.as_fraction().is_some() {
            self.commit_base(BaseType::Pool);
            return self.ingest_pool(row, buf, pos, opts, row_estimate);
        }
        self.commit_base(apply_type_map(BaseType::String, opts));
        self.write_typed(row, &probe, BaseType::String);
        Ok(probe.consumed)
    }

    /// Column type is already concrete: parses as that type, falling
    /// back to FLOAT (for INT) or STRING (everything else) on failure.
    fn ingest_concrete(
        &mut self,
        row: usize,
        buf: &[u8],
        pos: usize,
        opts: &Options,
        parse_fn: fn(&[u8], usize, &Options) -> ParsedField,
        base: BaseType,
    ) -> Result<usize> {
        let pf = parse_fn(buf, pos, opts);
        self.check_invalid_quote(row, pos, &pf)?;
        if pf.status.contains(FieldStatus::SENTINEL) {
            self.commit_missing(row, &pf);
            return Ok(pf.consumed);
        }
        if pf.status.contains(FieldStatus::OK) {
            self.write_typed(row, &pf, base);
            return Ok(pf.consumed);
        }

        // Parse failure: every prior row's poslen already holds its real
        // byte position/length, so falling back never needs a backfill
        // pass over rows already committed -- only INT -> FLOAT needs its
        // value slots reinterpreted, because the bit patterns differ.
        if base == BaseType::Int {
            let as_float = parser::parse_float(buf, pos, opts);
            if as_float.status.contains(FieldStatus::OK) {
                self.tape.promote_int_column_to_float();
                self.commit_base(BaseType::Float);
                self.write_typed(row, &as_float, BaseType::Float);
                return Ok(as_float.consumed);
            }
        }

        self.commit_base(BaseType::String);
        let as_string = parser::parse_string(buf, pos, opts);
        self.write_typed(row, &as_string, BaseType::String);
        Ok(as_string.consumed)
    }

    fn ingest_pool(&mut self, row: usize, buf: &[u8], pos: usize, opts: &Options, row_estimate: usize) -> Result<usize> {
        let pf = parser::parse_string(buf, pos, opts);
        self.check_invalid_quote(row, pos, &pf)?;
        if pf.status.contains(FieldStatus::SENTINEL) {
            self.commit_missing(row, &pf);
            return Ok(pf.consumed);
        }

        let escaped = pf.status.contains(FieldStatus::ESCAPE_PRESENT);
        let bytes = parser::field_bytes(buf, pf.content_pos, pf.content_len, escaped, opts.escape_byte, opts.close_quote);
        let pool = self.pool.get_or_insert_with(PoolRefMap::new);
        let r = pool.intern(&bytes);

        let threshold = opts.pool.as_fraction().unwrap_or(1.0);
        if pool::should_promote_to_string(pool, threshold, row_estimate) {
            self.pool = None;
            self.commit_base(BaseType::String);
            self.write_typed(row, &pf, BaseType::String);
            return Ok(pf.consumed);
        }

        self.set_poslen_from(row, &pf);
        self.tape.set_ref(row, r);
        Ok(pf.consumed)
    }

    fn ingest_string(&mut self, row: usize, buf: &[u8], pos: usize, opts: &Options) -> Result<usize> {
        let pf = parser::parse_string(buf, pos, opts);
        self.check_invalid_quote(row, pos, &pf)?;
        if pf.status.contains(FieldStatus::SENTINEL) {
            self.commit_missing(row, &pf);
            return Ok(pf.consumed);
        }
        self.write_typed(row, &pf, BaseType::String);
        Ok(pf.consumed)
    }

    /// Fills row `row` with a missing cell, used when a row has fewer
    /// fields than this column expects.
    pub fn fill_missing(&mut self, row: usize) {
        self.type_code = self.type_code.with_missing();
        self.tape.set_poslen(row, PosLen::missing_with_pos(0, 0));
        self.tape.set_value_bits(row, 0);
    }

    fn commit_base(&mut self, base: BaseType) {
        let preserve_missing = self.type_code.is_missing();
        self.type_code = self.type_code.with_base(base);
        if preserve_missing {
            self.type_code = self.type_code.with_missing();
        }
    }

    fn commit_missing(&mut self, row: usize, pf: &ParsedField) {
        self.type_code = self.type_code.with_missing();
        self.tape
            .set_poslen(row, PosLen::missing_with_pos(pf.content_pos as u64, pf.content_len as u64));
    }

    fn set_poslen_from(&mut self, row: usize, pf: &ParsedField) {
        self.tape.set_poslen(
            row,
            PosLen {
                missing: false,
                was_int: false,
                escape_present: pf.status.contains(FieldStatus::ESCAPE_PRESENT),
                offset: pf.content_pos as u64,
                length: pf.content_len as u64,
            },
        );
    }

    fn write_typed(&mut self, row: usize, pf: &ParsedField, base: BaseType) {
        self.tape.set_poslen(
            row,
            PosLen {
                missing: false,
                was_int: base == BaseType::Int,
                escape_present: pf.status.contains(FieldStatus::ESCAPE_PRESENT),
                offset: pf.content_pos as u64,
                length: pf.content_len as u64,
            },
        );
        match pf.value {
            FieldValue::Int(v) => self.tape.set_int(row, v),
            FieldValue::Float(v) => self.tape.set_float(row, v),
            FieldValue::Date(v) => self.tape.set_value_bits(row, v as u32 as u64),
            FieldValue::DateTime(v) => self.tape.set_int(row, v),
            FieldValue::Time(v) => self.tape.set_int(row, v),
            FieldValue::Bool(v) => self.tape.set_bool(row, v),
            FieldValue::None => self.tape.set_value_bits(row, 0),
        }
    }

    fn check_invalid_quote(&self, row: usize, byte_pos: usize, pf: &ParsedField) -> Result<()> {
        if pf.status.contains(FieldStatus::INVALID_QUOTED_FIELD) {
            return Err(CsvTapeError::InvalidQuotedField {
                row,
                col: self.index,
                byte_pos,
            });
        }
        Ok(())
    }
}

/// Resolves a user-declared type for column `idx`/`name`, checked in
/// the order by-index, by-name, then the blanket `type_override`. Used
/// by both the row-major and transposed coordinators.
pub fn resolve_user_type(opts: &Options, idx: usize, name: &str) -> Option<TypeCode> {
    opts.types_by_index
        .get(&idx)
        .copied()
        .or_else(|| opts.types_by_name.get(name).copied())
        .or(opts.type_override)
        .map(|tc| tc.with_user())
}

fn apply_type_map(base: BaseType, opts: &Options) -> BaseType {
    opts.type_map
        .get(&(base as u8))
        .map(|tc| tc.base())
        .unwrap_or(base)
}

fn parse_as(base: BaseType, buf: &[u8], pos: usize, opts: &Options) -> ParsedField {
    match base {
        BaseType::Int => parser::parse_int(buf, pos, opts),
        BaseType::Float => parser::parse_float(buf, pos, opts),
        BaseType::Date => parser::parse_date(buf, pos, opts),
        BaseType::DateTime => parser::parse_datetime(buf, pos, opts),
        BaseType::Time => parser::parse_time(buf, pos, opts),
        BaseType::Bool => parser::parse_bool(buf, pos, opts),
        BaseType::String | BaseType::Pool | BaseType::Empty | BaseType::MissingType => {
            parser::parse_string(buf, pos, opts)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::OptionsBuilder;

    fn col() -> Column {
        Column::new("c".into(), 0, 8, None)
    }

    #[test]
    fn int_then_float_promotes_column() {
        let opts = OptionsBuilder::new().build();
        let mut c = col();
        let mut warnings = Vec::new();
        c.ingest_cell(0, b"1\n", 0, &opts, 2, &mut warnings).unwrap();
        assert_eq!(c.type_code.base(), BaseType::Int);
        c.ingest_cell(1, b"4.5\n", 0, &opts, 2, &mut warnings).unwrap();
        assert_eq!(c.type_code.base(), BaseType::Float);
        assert_eq!(c.tape.get_float(0), 1.0);
        assert_eq!(c.tape.get_float(1), 4.5);
    }

    #[test]
    fn sentinel_sets_missing_without_committing_type() {
        let opts = OptionsBuilder::new().build();
        let mut c = col();
        let mut warnings = Vec::new();
        c.ingest_cell(0, b",1\n", 0, &opts, 1, &mut warnings).unwrap();
        assert_eq!(c.type_code.base(), BaseType::MissingType);
        assert!(c.type_code.is_missing());
    }

    #[test]
    fn string_fallback_preserves_prior_cells_via_poslen() {
        let opts = OptionsBuilder::new().build();
        let mut c = col();
        let mut warnings = Vec::new();
        let buf = b"1\nhello\n";
        c.ingest_cell(0, buf, 0, &opts, 2, &mut warnings).unwrap();
        assert_eq!(c.type_code.base(), BaseType::Int);
        c.ingest_cell(1, buf, 2, &opts, 2, &mut warnings).unwrap();
        assert_eq!(c.type_code.base(), BaseType::String);
        let pl0 = c.tape.get_poslen(0);
        assert_eq!(&buf[pl0.offset as usize..(pl0.offset + pl0.length) as usize], b"1");
    }

    #[test]
    fn user_pinned_strict_failure_errors() {
        let opts = OptionsBuilder::new().strict(true).build();
        let mut c = Column::new("c".into(), 0, 4, Some(TypeCode::new(BaseType::Int).with_user()));
        let mut warnings = Vec::new();
        let err = c.ingest_cell(0, b"nope\n", 0, &opts, 1, &mut warnings);
        assert!(err.is_err());
    }

    #[test]
    fn user_pinned_nonstrict_failure_coerces_to_missing() {
        let opts = OptionsBuilder::new().build();
        let mut c = Column::new("c".into(), 0, 4, Some(TypeCode::new(BaseType::Int).with_user()));
        let mut warnings = Vec::new();
        c.ingest_cell(0, b"nope\n", 0, &opts, 1, &mut warnings).unwrap();
        assert!(c.tape.get_poslen(0).missing);
        assert_eq!(warnings.len(), 1);
    }
}
