//! The parsed result type returned by [`crate::parse_file`]: column
//! names/types, the packed tapes, and whatever string pools survived,
//! plus a minimal read API.

use crate::error::ParseWarning;
use crate::infer::Column;
use crate::source::Buffer;
use crate::tape::{AnyValue, Tape};
use crate::typecode::TypeCode;

/// One materialized output column.
pub struct FileColumn {
    name: String,
    type_code: TypeCode,
    tape: Tape,
    refs: Option<Vec<Box<str>>>,
}

impl FileColumn {
    fn from_inferred(column: Column) -> Self {
        FileColumn {
            name: column.name,
            type_code: column.type_code,
            tape: column.tape,
            refs: column.pool.map(|p| p.into_sorted_refs()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_code(&self) -> TypeCode {
        self.type_code
    }

    pub fn len(&self) -> usize {
        self.tape.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tape.is_empty()
    }

    pub fn get<'a>(&'a self, row: usize, buffer: &'a [u8], escape_byte: u8, close_quote: u8) -> AnyValue<'a> {
        self.tape
            .read_cell(row, self.type_code.base(), buffer, self.refs.as_deref(), escape_byte, close_quote)
    }
}

/// The result of parsing one source: a retained byte buffer plus one
/// [`FileColumn`] per logical column.
pub struct File {
    buffer: Buffer,
    columns: Vec<FileColumn>,
    rows: usize,
    pub warnings: Vec<ParseWarning>,
    escape_byte: u8,
    close_quote: u8,
}

impl File {
    pub(crate) fn new(
        buffer: Buffer,
        columns: Vec<Column>,
        rows: usize,
        warnings: Vec<ParseWarning>,
        escape_byte: u8,
        close_quote: u8,
    ) -> Self {
        File {
            buffer,
            columns: columns.into_iter().map(FileColumn::from_inferred).collect(),
            rows,
            warnings,
            escape_byte,
            close_quote,
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.columns.len()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name())
    }

    pub fn types(&self) -> impl Iterator<Item = TypeCode> + '_ {
        self.columns.iter().map(|c| c.type_code())
    }

    pub fn column(&self, idx: usize) -> Option<&FileColumn> {
        self.columns.get(idx)
    }

    pub fn column_by_name(&self, name: &str) -> Option<&FileColumn> {
        self.columns.iter().find(|c| c.name() == name)
    }

    pub fn get(&self, col: usize, row: usize) -> Option<AnyValue<'_>> {
        self.columns
            .get(col)
            .map(|c| c.get(row, &self.buffer, self.escape_byte, self.close_quote))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::OptionsBuilder;
    use crate::source::{load, Source};
    use crate::typecode::BaseType;

    #[test]
    fn builds_file_from_columns() {
        let opts = OptionsBuilder::new().build();
        let bytes = b"a,b\n1,x\n2,y\n".to_vec();
        let (buffer, start, end) = load(Source::Bytes(bytes), &opts).unwrap();
        let names = vec!["a".to_string(), "b".to_string()];
        let (columns, rows, warnings) =
            crate::parallel::parse_range(&buffer, start + 4, end, &names, &opts, 2, None).unwrap();
        let file = File::new(buffer, columns, rows, warnings, opts.escape_byte, opts.close_quote);
        assert_eq!(file.rows(), 2);
        assert_eq!(file.cols(), 2);
        assert_eq!(file.column(0).unwrap().type_code().base(), BaseType::Int);
        assert_eq!(file.get(0, 1), Some(AnyValue::Int(2)));
    }
}
