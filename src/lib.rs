//! A delimited-text reader core built around a packed columnar tape.
//!
//! The pipeline is: a [`source`] loader normalizes any input into one
//! contiguous buffer; a [`layout`] detector locates the header and data
//! start and infers the delimiter; a [`parallel`] coordinator (or, for
//! small inputs, its single-chunk sequential case) walks the data
//! region row by row, handing each field to an [`infer::Column`] that
//! runs the type-inference/promotion state machine and writes into a
//! [`tape::Tape`]; [`transpose`] handles the column-major input layout
//! instead. The result is a [`file::File`].
//!
//! ```no_run
//! use csvtape::{parse_file, OptionsBuilder, Source};
//! use std::path::Path;
//!
//! let opts = OptionsBuilder::new().build();
//! let file = parse_file(Source::Path(Path::new("data.csv")), opts).unwrap();
//! for row in 0..file.rows() {
//!     println!("{:?}", file.get(0, row));
//! }
//! ```

mod error;
mod file;
mod infer;
mod layout;
mod options;
mod parallel;
mod parser;
mod pool;
mod source;
mod tape;
mod transpose;
mod typecode;

pub use error::{CsvTapeError, ParseWarning, Result};
pub use file::{File, FileColumn};
pub use options::{Header, Options, OptionsBuilder, PoolThreshold, ThreadingMode};
pub use source::Source;
pub use tape::AnyValue;
pub use typecode::{BaseType, TypeCode};

use std::sync::Arc;

/// Parses `source` per `opts` and returns the materialized [`File`].
///
/// Runs the Source Loader, the Layout Detector (including delimiter
/// inference when `opts.delim` is unset), and then either the
/// transposed reader or the row-major coordinator -- parallel when the
/// input is large enough to be worth splitting, sequential otherwise.
pub fn parse_file(source: Source<'_>, opts: Arc<Options>) -> Result<File> {
    let path = match &source {
        Source::Path(p) => Some(*p),
        _ => None,
    };

    let (buffer, start, end) = source::load(source, &opts)?;

    let delim = layout::infer_delimiter(&buffer, start, end, path, &opts)?;
    let mut resolved = (*opts).clone();
    resolved.delim = Some(delim);

    let parsed_layout = layout::resolve_layout(&buffer, start, end, &resolved)?;
    let (row_estimate, _avg_bytes_per_row) =
        layout::estimate_row_count(&buffer, parsed_layout.data_start, end, &resolved);
    let ncols = parsed_layout.header_names.len();

    let (columns, rows, warnings) = if resolved.transpose {
        transpose::parse_transposed(&buffer, parsed_layout.data_start, end, &resolved)?
    } else if parallel::should_parallelize(&resolved, row_estimate, ncols) {
        parallel::parse_parallel(
            &buffer,
            parsed_layout.data_start,
            end,
            &parsed_layout.header_names,
            &resolved,
            row_estimate,
        )?
    } else {
        parallel::parse_range(
            &buffer,
            parsed_layout.data_start,
            end,
            &parsed_layout.header_names,
            &resolved,
            row_estimate,
            None,
        )?
    };

    Ok(File::new(buffer, columns, rows, warnings, resolved.escape_byte, resolved.close_quote))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn end_to_end_basic_csv() {
        let opts = OptionsBuilder::new().build();
        let bytes = b"a,b,c\n1,2.5,x\n2,3.5,y\n3,,z\n".to_vec();
        let file = parse_file(Source::Bytes(bytes), opts).unwrap();
        assert_eq!(file.rows(), 3);
        assert_eq!(file.cols(), 3);
        assert_eq!(file.get(0, 0), Some(AnyValue::Int(1)));
        assert_eq!(file.get(1, 1), Some(AnyValue::Float(3.5)));
        assert_eq!(file.get(2, 2), Some(AnyValue::Str("z".into())));
    }

    #[test]
    fn missing_values_round_trip() {
        let opts = OptionsBuilder::new().build();
        let bytes = b"a,b\n1,\nNA,4\n".to_vec();
        let file = parse_file(Source::Bytes(bytes), opts).unwrap();
        assert_eq!(file.get(1, 0), Some(AnyValue::Missing));
        assert_eq!(file.get(0, 1), Some(AnyValue::Missing));
    }

    #[test]
    fn custom_delimiter_is_detected() {
        let opts = OptionsBuilder::new().build();
        let bytes = b"a;b\n1;2\n3;4\n".to_vec();
        let file = parse_file(Source::Bytes(bytes), opts).unwrap();
        assert_eq!(file.rows(), 2);
        assert_eq!(file.get(0, 1), Some(AnyValue::Int(3)));
    }

    #[test]
    fn forced_parallel_matches_sequential() {
        let mut rows = String::from("a,b\n");
        for i in 0..2000 {
            rows.push_str(&format!("{i},{}\n", i * 2));
        }
        let seq_opts = OptionsBuilder::new().threaded(ThreadingMode::Never).build();
        let par_opts = OptionsBuilder::new().threaded(ThreadingMode::Always).build();
        let seq = parse_file(Source::Bytes(rows.clone().into_bytes()), seq_opts).unwrap();
        let par = parse_file(Source::Bytes(rows.into_bytes()), par_opts).unwrap();
        assert_eq!(seq.rows(), par.rows());
        for r in 0..seq.rows() {
            assert_eq!(seq.get(0, r), par.get(0, r));
            assert_eq!(seq.get(1, r), par.get(1, r));
        }
    }
}
