//! Immutable configuration assembled once per parse.

use hashbrown::{HashMap, HashSet};
use std::sync::Arc;

use crate::typecode::TypeCode;

/// Which row (if any) holds the column names, and where data starts.
#[derive(Debug, Clone)]
pub enum Header {
    /// No header row; synthetic names `Column1`, `Column2`, ... are
    /// generated and data starts at the first non-skipped row.
    None,
    /// 1-based row number holding the header.
    Row(usize),
    /// An inclusive range of 1-based row numbers whose fields are
    /// concatenated column-wise with `_` to form each column's name.
    Range(usize, usize),
    /// Caller-supplied column names; header position is undefined and
    /// data starts at `datarow`/`skipto` or, failing that, at the start
    /// of the buffer.
    Names(Vec<String>),
}

impl Default for Header {
    fn default() -> Self {
        Header::Row(1)
    }
}

/// Should the coordinator use multiple threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadingMode {
    Auto,
    Always,
    Never,
}

impl Default for ThreadingMode {
    fn default() -> Self {
        ThreadingMode::Auto
    }
}

/// Fraction- or boolean-valued pool threshold.
#[derive(Debug, Clone, Copy)]
pub enum PoolThreshold {
    Disabled,
    Enabled,
    Fraction(f64),
}

impl PoolThreshold {
    pub fn as_fraction(self) -> Option<f64> {
        match self {
            PoolThreshold::Disabled => None,
            PoolThreshold::Enabled => Some(1.0),
            PoolThreshold::Fraction(f) => Some(f.clamp(0.0, 1.0)),
        }
    }
}

impl Default for PoolThreshold {
    fn default() -> Self {
        PoolThreshold::Disabled
    }
}

#[derive(Debug, Clone)]
pub struct Options {
    pub header: Header,
    pub normalize_names: bool,
    pub datarow: Option<usize>,
    pub skipto: Option<usize>,
    pub footerskip: usize,
    pub limit: Option<usize>,
    pub transpose: bool,
    pub comment: Option<Vec<u8>>,
    pub use_mmap: bool,
    pub ignore_empty_lines: bool,
    pub threaded: ThreadingMode,

    pub missing_strings: HashSet<Vec<u8>>,
    pub delim: Option<Vec<u8>>,
    pub ignore_repeated: bool,
    pub open_quote: u8,
    pub close_quote: u8,
    pub escape_byte: u8,
    pub whitespace1: u8,
    pub whitespace2: u8,
    pub decimal: u8,
    pub true_strings: Vec<String>,
    pub false_strings: Vec<String>,
    pub date_format: Option<String>,

    pub type_override: Option<TypeCode>,
    pub types_by_index: HashMap<usize, TypeCode>,
    pub types_by_name: HashMap<String, TypeCode>,
    pub type_map: HashMap<u8, TypeCode>,
    pub pool: PoolThreshold,
    pub strict: bool,
    pub silence_warnings: bool,

    pub n_threads: Option<usize>,
}

impl Default for Options {
    fn default() -> Self {
        let mut missing_strings = HashSet::new();
        missing_strings.insert(Vec::new());
        missing_strings.insert(b"NA".to_vec());

        Options {
            header: Header::default(),
            normalize_names: false,
            datarow: None,
            skipto: None,
            footerskip: 0,
            limit: None,
            transpose: false,
            comment: None,
            use_mmap: true,
            ignore_empty_lines: true,
            threaded: ThreadingMode::default(),

            missing_strings,
            delim: None,
            ignore_repeated: false,
            open_quote: b'"',
            close_quote: b'"',
            escape_byte: b'"',
            whitespace1: b' ',
            whitespace2: b'\t',
            decimal: b'.',
            true_strings: vec!["true".into(), "True".into(), "TRUE".into()],
            false_strings: vec!["false".into(), "False".into(), "FALSE".into()],
            date_format: None,

            type_override: None,
            types_by_index: HashMap::new(),
            types_by_name: HashMap::new(),
            type_map: HashMap::new(),
            pool: PoolThreshold::default(),
            strict: false,
            silence_warnings: false,

            n_threads: None,
        }
    }
}

/// Builder mirroring `CsvReadOptions`'s fluent construction: a typed,
/// checked alternative to a stringly-typed option map.
#[derive(Debug, Clone, Default)]
pub struct OptionsBuilder {
    opts: Options,
}

impl OptionsBuilder {
    pub fn new() -> Self {
        OptionsBuilder {
            opts: Options::default(),
        }
    }

    pub fn header(mut self, header: Header) -> Self {
        self.opts.header = header;
        self
    }

    pub fn normalize_names(mut self, yes: bool) -> Self {
        self.opts.normalize_names = yes;
        self
    }

    pub fn datarow(mut self, row: usize) -> Self {
        self.opts.datarow = Some(row);
        self
    }

    pub fn skipto(mut self, row: usize) -> Self {
        self.opts.skipto = Some(row);
        self
    }

    pub fn footerskip(mut self, n: usize) -> Self {
        self.opts.footerskip = n;
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.opts.limit = Some(n);
        self
    }

    pub fn transpose(mut self, yes: bool) -> Self {
        self.opts.transpose = yes;
        self
    }

    pub fn comment(mut self, prefix: impl Into<Vec<u8>>) -> Self {
        self.opts.comment = Some(prefix.into());
        self
    }

    pub fn use_mmap(mut self, yes: bool) -> Self {
        self.opts.use_mmap = yes;
        self
    }

    pub fn ignore_empty_lines(mut self, yes: bool) -> Self {
        self.opts.ignore_empty_lines = yes;
        self
    }

    pub fn threaded(mut self, mode: ThreadingMode) -> Self {
        self.opts.threaded = mode;
        self
    }

    pub fn n_threads(mut self, n: usize) -> Self {
        self.opts.n_threads = Some(n);
        self
    }

    pub fn missing_strings(mut self, values: impl IntoIterator<Item = Vec<u8>>) -> Self {
        self.opts.missing_strings = values.into_iter().collect();
        self
    }

    pub fn delim(mut self, delim: impl Into<Vec<u8>>) -> Self {
        self.opts.delim = Some(delim.into());
        self
    }

    pub fn ignore_repeated(mut self, yes: bool) -> Self {
        self.opts.ignore_repeated = yes;
        self
    }

    pub fn quote_byte(mut self, b: u8) -> Self {
        self.opts.open_quote = b;
        self.opts.close_quote = b;
        self
    }

    pub fn open_close_quote(mut self, open: u8, close: u8) -> Self {
        self.opts.open_quote = open;
        self.opts.close_quote = close;
        self
    }

    pub fn escape_byte(mut self, b: u8) -> Self {
        self.opts.escape_byte = b;
        self
    }

    pub fn decimal(mut self, b: u8) -> Self {
        self.opts.decimal = b;
        self
    }

    pub fn true_false_strings(mut self, true_s: Vec<String>, false_s: Vec<String>) -> Self {
        self.opts.true_strings = true_s;
        self.opts.false_strings = false_s;
        self
    }

    pub fn date_format(mut self, fmt: impl Into<String>) -> Self {
        self.opts.date_format = Some(fmt.into());
        self
    }

    pub fn type_override(mut self, code: TypeCode) -> Self {
        self.opts.type_override = Some(code);
        self
    }

    pub fn type_for_index(mut self, idx: usize, code: TypeCode) -> Self {
        self.opts.types_by_index.insert(idx, code);
        self
    }

    pub fn type_for_name(mut self, name: impl Into<String>, code: TypeCode) -> Self {
        self.opts.types_by_name.insert(name.into(), code);
        self
    }

    pub fn type_map(mut self, from: u8, to: TypeCode) -> Self {
        self.opts.type_map.insert(from, to);
        self
    }

    pub fn pool(mut self, threshold: PoolThreshold) -> Self {
        self.opts.pool = threshold;
        self
    }

    pub fn strict(mut self, yes: bool) -> Self {
        self.opts.strict = yes;
        self
    }

    pub fn silence_warnings(mut self, yes: bool) -> Self {
        self.opts.silence_warnings = yes;
        self
    }

    pub fn build(self) -> Arc<Options> {
        Arc::new(self.opts)
    }
}
