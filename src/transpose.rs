//! Transposed Mode: the file's logical columns run along physical rows
//! instead of physical columns. Threading is always disabled for this
//! mode.
//!
//! In transposed input, a header (any [`crate::options::Header`]
//! variant other than `None`) is read from the *first field* of each
//! physical row rather than from a separate physical row, since in
//! this layout every physical row already belongs to exactly one
//! logical column.

use crate::error::Result;
use crate::infer::{resolve_user_type, Column};
use crate::layout::{self, skip_noise_lines};
use crate::options::{Header, Options};
use crate::parser::field_bytes;

pub fn parse_transposed(buf: &[u8], start: usize, end: usize, opts: &Options) -> Result<(Vec<Column>, usize, Vec<crate::error::ParseWarning>)> {
    let has_header = !matches!(opts.header, Header::None);
    let mut pos = skip_noise_lines(buf, start, end, opts);
    let mut columns: Vec<Column> = Vec::new();
    let mut warnings = Vec::new();
    let mut col_idx = 0usize;

    while pos < end {
        let scanned = layout::scan_row(buf, pos, opts);
        if scanned.fields.is_empty() {
            pos = skip_noise_lines(buf, scanned.next_pos, end, opts);
            if scanned.hit_eof {
                break;
            }
            continue;
        }

        let data_start_field = if has_header { 1 } else { 0 };
        let name = if has_header {
            let (p, l, escaped) = scanned.fields[0];
            let bytes = field_bytes(buf, p, l, escaped, opts.escape_byte, opts.close_quote);
            String::from_utf8_lossy(&bytes).into_owned()
        } else {
            format!("Column{}", col_idx + 1)
        };

        let ndata = scanned.fields.len().saturating_sub(data_start_field);
        let user_type = resolve_user_type(opts, col_idx, &name);
        let mut column = Column::new(name, col_idx, ndata.max(1), user_type);
        for j in 0..ndata {
            let field_pos = scanned.starts[data_start_field + j];
            column.ingest_cell(j, buf, field_pos, opts, ndata.max(1), &mut warnings)?;
        }
        columns.push(column);

        col_idx += 1;
        pos = skip_noise_lines(buf, scanned.next_pos, end, opts);
        if scanned.hit_eof {
            break;
        }
    }

    let nrows = columns.iter().map(|c| c.tape.len()).max().unwrap_or(0);
    for column in columns.iter_mut() {
        let existing = column.tape.len();
        for r in existing..nrows {
            column.fill_missing(r);
        }
    }

    Ok((columns, nrows, warnings))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::OptionsBuilder;
    use crate::typecode::BaseType;

    #[test]
    fn transposes_rows_into_columns() {
        let opts = OptionsBuilder::new().transpose(true).build();
        let buf = b"name,1,2,3\nother,4,5,6\n";
        let (columns, nrows, _warnings) = parse_transposed(buf, 0, buf.len(), &opts).unwrap();
        assert_eq!(columns.len(), 2);
        assert_eq!(nrows, 3);
        assert_eq!(columns[0].name, "name");
        assert_eq!(columns[0].type_code.base(), BaseType::Int);
        assert_eq!(columns[0].tape.get_int(0), 1);
        assert_eq!(columns[1].tape.get_int(2), 6);
    }

    #[test]
    fn ragged_physical_rows_fill_missing() {
        let opts = OptionsBuilder::new().transpose(true).build();
        let buf = b"a,1,2,3\nb,4,5\n";
        let (columns, nrows, _warnings) = parse_transposed(buf, 0, buf.len(), &opts).unwrap();
        assert_eq!(nrows, 3);
        assert!(columns[1].tape.get_poslen(2).missing);
    }
}
