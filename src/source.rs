//! Source Loader: normalizes any input into a contiguous
//! read-only byte buffer, strips a leading UTF-8 BOM, and optionally
//! trims a trailing footer by scanning backward.

use std::io::Read;
use std::ops::Deref;
use std::path::Path;

use memmap2::Mmap;

use crate::error::{CsvTapeError, Result};
use crate::options::Options;

/// A contiguous, read-only byte buffer, either owned or memory-mapped.
/// Outlives the [`crate::file::File`] it backs: offsets stored in the
/// tape refer to positions in this retained buffer.
pub enum Buffer {
    Owned(Vec<u8>),
    Mapped(Mmap),
}

impl Deref for Buffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            Buffer::Owned(v) => v.as_slice(),
            Buffer::Mapped(m) => m.as_ref(),
        }
    }
}

/// One of the input shapes accepted by [`crate::parse_file`].
pub enum Source<'a> {
    Path(&'a Path),
    Bytes(Vec<u8>),
    Reader(Box<dyn Read + 'a>),
}

const BOM: [u8; 3] = [0xEF, 0xBB, 0xBF];

/// Loads `source` into a contiguous buffer, consumes a leading BOM if
/// present, and trims `footerskip` trailing rows by scanning backward
/// while respecting quoting. Returns the buffer plus the effective
/// `[start, end)` range data scanning should operate on.
pub fn load(source: Source<'_>, opts: &Options) -> Result<(Buffer, usize, usize)> {
    let buffer = match source {
        Source::Path(path) => {
            let file = std::fs::File::open(path)
                .map_err(|e| CsvTapeError::InvalidSource(format!("{}: {e}", path.display())))?;
            if opts.use_mmap {
                match unsafe { Mmap::map(&file) } {
                    Ok(mmap) => Buffer::Mapped(mmap),
                    Err(_) => Buffer::Owned(read_fully(file)?),
                }
            } else {
                Buffer::Owned(read_fully(file)?)
            }
        }
        Source::Bytes(bytes) => Buffer::Owned(bytes),
        Source::Reader(mut reader) => {
            let mut bytes = Vec::with_capacity(1 << 16);
            reader
                .read_to_end(&mut bytes)
                .map_err(|e| CsvTapeError::InvalidSource(e.to_string()))?;
            Buffer::Owned(bytes)
        }
    };

    let mut start = 0usize;
    if buffer.len() >= BOM.len() && buffer[..BOM.len()] == BOM {
        start = BOM.len();
    }

    let mut end = buffer.len();
    if opts.footerskip > 0 {
        end = skip_footer_rows(&buffer, start, end, opts.footerskip, opts);
    }

    Ok((buffer, start, end))
}

fn read_fully(mut file: std::fs::File) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;
    Ok(bytes)
}

/// Scans backward from `end`, skipping `k` complete rows, respecting
/// quoting so an embedded newline inside a quoted field is not mistaken
/// for a row boundary. Returns the new effective end offset.
fn skip_footer_rows(buf: &[u8], start: usize, end: usize, k: usize, opts: &Options) -> usize {
    let open_quote = opts.open_quote;
    let close_quote = opts.close_quote;
    let mut pos = end;
    let mut rows_skipped = 0usize;

    // trim a single trailing newline so it isn't counted as an empty row
    while pos > start && (buf[pos - 1] == b'\n' || buf[pos - 1] == b'\r') {
        pos -= 1;
    }

    while rows_skipped < k && pos > start {
        // walk back over one logical row, tracking whether we're inside
        // a quoted field by scanning forward from the last known
        // unquoted newline; simplest correct approach is a full forward
        // rescan each time quoting is involved, but for the common case
        // of no quotes spanning this tail we walk back to the previous
        // newline directly.
        let line_start = match rfind_newline_respecting_quotes(buf, start, pos, open_quote, close_quote) {
            Some(p) => p,
            None => start,
        };
        pos = line_start;
        rows_skipped += 1;
        while pos > start && (buf[pos - 1] == b'\n' || buf[pos - 1] == b'\r') {
            pos -= 1;
        }
    }
    pos
}

/// Finds the start of the row ending at `end` by scanning forward from
/// `start` and tracking quote state, returning the byte offset just
/// after the newline preceding that row (or `start` if none).
fn rfind_newline_respecting_quotes(
    buf: &[u8],
    start: usize,
    end: usize,
    open_quote: u8,
    close_quote: u8,
) -> Option<usize> {
    let mut last_row_boundary = start;
    let mut cursor = start;
    let mut in_quotes = false;
    while cursor < end {
        let b = buf[cursor];
        if in_quotes {
            if b == close_quote {
                in_quotes = false;
            }
        } else if b == open_quote {
            in_quotes = true;
        } else if b == b'\n' && cursor + 1 < end {
            last_row_boundary = cursor + 1;
        }
        cursor += 1;
    }
    if last_row_boundary >= end {
        None
    } else {
        Some(last_row_boundary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::OptionsBuilder;

    #[test]
    fn strips_leading_bom() {
        let opts = OptionsBuilder::new().build();
        let mut bytes = BOM.to_vec();
        bytes.extend_from_slice(b"a,b\n1,2\n");
        let (buf, start, end) = load(Source::Bytes(bytes), &opts).unwrap();
        assert_eq!(&buf[start..end], b"a,b\n1,2\n");
    }

    #[test]
    fn footer_skip_drops_trailing_rows() {
        let opts = OptionsBuilder::new().footerskip(1).build();
        let bytes = b"a,b\n1,2\n3,4\n".to_vec();
        let (buf, start, end) = load(Source::Bytes(bytes), &opts).unwrap();
        assert_eq!(&buf[start..end], b"a,b\n1,2\n");
    }
}
