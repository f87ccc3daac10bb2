//! Layout Detector: locates the header row, the data
//! start position, and — unless the caller supplied one — infers the
//! field delimiter by consistency-scoring the first window of rows.

use std::path::Path;

use crate::error::{CsvTapeError, Result};
use crate::options::{Header, Options};
use crate::parser::{parse_string, FieldStatus};

const CANDIDATE_DELIMS: [u8; 5] = [b',', b'\t', b' ', b'|', b';'];
const ALWAYS_INVALID_DELIMS: [u8; 3] = [b'\r', b'\n', 0];
const DETECTION_WINDOW_ROWS: usize = 10;

/// One scanned row: the fields found and the offset just past the row's
/// terminator (or end of buffer).
pub struct ScannedRow {
    pub fields: Vec<(usize, usize, bool)>, // (content_pos, content_len, escape_present)
    /// The raw byte offset each field started at (before quote/whitespace
    /// trimming) -- what a second, typed pass must re-scan from, since
    /// re-scanning from `content_pos` would already be past a leading
    /// quote or trimmed whitespace.
    pub starts: Vec<usize>,
    pub next_pos: usize,
    pub hit_eof: bool,
}

/// Scans a single row starting at `pos`, honoring quoting, and
/// optionally skipping comment lines / blank lines per `opts`. Does not
/// interpret field contents as any type.
pub fn scan_row(buf: &[u8], pos: usize, opts: &Options) -> ScannedRow {
    let mut cursor = pos;
    let mut fields = Vec::new();
    let mut starts = Vec::new();
    loop {
        let field_start = cursor;
        let pf = parse_string(buf, cursor, opts);
        fields.push((pf.content_pos, pf.content_len, pf.status.contains(FieldStatus::ESCAPE_PRESENT)));
        starts.push(field_start);
        cursor += pf.consumed;
        if pf.status.contains(FieldStatus::NEWLINE_TERMINATOR) {
            return ScannedRow {
                fields,
                starts,
                next_pos: cursor,
                hit_eof: false,
            };
        }
        if pf.status.contains(FieldStatus::EOF_TERMINATOR) {
            return ScannedRow {
                fields,
                starts,
                next_pos: cursor,
                hit_eof: true,
            };
        }
        // DELIMITER_TERMINATOR: keep consuming fields on this row.
    }
}

pub fn is_comment_line(buf: &[u8], pos: usize, comment: Option<&[u8]>) -> bool {
    match comment {
        Some(prefix) if !prefix.is_empty() => {
            buf.len() >= pos + prefix.len() && &buf[pos..pos + prefix.len()] == prefix
        }
        _ => false,
    }
}

fn skip_to_next_line(buf: &[u8], pos: usize, end: usize) -> usize {
    match memchr::memchr(b'\n', &buf[pos..end]) {
        Some(i) => pos + i + 1,
        None => end,
    }
}

/// Advances `pos` past comment lines and (if `ignore_empty_lines`) blank
/// lines, returning the position of the next substantive row.
pub(crate) fn skip_noise_lines(buf: &[u8], mut pos: usize, end: usize, opts: &Options) -> usize {
    loop {
        if pos >= end {
            return pos;
        }
        if is_comment_line(buf, pos, opts.comment.as_deref()) {
            pos = skip_to_next_line(buf, pos, end);
            continue;
        }
        if opts.ignore_empty_lines && (buf[pos] == b'\n' || (buf[pos] == b'\r' && buf.get(pos + 1) == Some(&b'\n'))) {
            pos = skip_to_next_line(buf, pos, end);
            continue;
        }
        return pos;
    }
}

/// Result of resolving the header/data layout.
pub struct Layout {
    pub header_names: Vec<String>,
    pub data_start: usize,
}

pub fn resolve_layout(buf: &[u8], start: usize, end: usize, opts: &Options) -> Result<Layout> {
    if let Header::Row(h) = &opts.header {
        if let Some(datarow) = opts.datarow {
            if datarow <= *h {
                return Err(CsvTapeError::HeaderAfterData {
                    header: *h,
                    data: datarow,
                });
            }
        }
    }

    match &opts.header {
        Header::Names(names) => {
            let data_start = resolve_explicit_data_start(buf, start, end, opts);
            Ok(Layout {
                header_names: normalize_headers(names.clone(), opts.normalize_names),
                data_start,
            })
        }
        Header::None => {
            let data_start = resolve_explicit_data_start(buf, start, end, opts)
                .max(skip_noise_lines(buf, start, end, opts));
            let row = scan_row(buf, data_start, opts);
            let names = synthetic_names(row.fields.len().max(1));
            Ok(Layout {
                header_names: names,
                data_start,
            })
        }
        Header::Row(h) => {
            let mut pos = start;
            let mut row_no = 0usize;
            let mut header_row = None;
            while row_no < *h {
                pos = skip_noise_lines(buf, pos, end, opts);
                if pos >= end {
                    break;
                }
                let row = scan_row(buf, pos, opts);
                row_no += 1;
                if row_no == *h {
                    header_row = Some(row.fields.clone_from_row(buf, opts));
                }
                pos = row.next_pos;
            }
            let names = match header_row {
                Some(fields) => normalize_headers(fields, opts.normalize_names),
                None => synthetic_names(1),
            };
            let data_start = opts.skipto.map(|_| pos).unwrap_or(pos);
            let data_start = resolve_skipto(buf, start, end, data_start, opts);
            Ok(Layout {
                header_names: names,
                data_start,
            })
        }
        Header::Range(lo, hi) => {
            let mut pos = start;
            let mut row_no = 0usize;
            let mut collected: Vec<Vec<String>> = Vec::new();
            while row_no < *hi {
                pos = skip_noise_lines(buf, pos, end, opts);
                if pos >= end {
                    break;
                }
                let row = scan_row(buf, pos, opts);
                row_no += 1;
                if row_no >= *lo {
                    collected.push(row.fields.clone_from_row(buf, opts));
                }
                pos = row.next_pos;
            }
            let ncols = collected.iter().map(|r| r.len()).max().unwrap_or(1);
            let mut names = Vec::with_capacity(ncols);
            for i in 0..ncols {
                let joined = collected
                    .iter()
                    .filter_map(|r| r.get(i))
                    .cloned()
                    .collect::<Vec<_>>()
                    .join("_");
                names.push(if joined.is_empty() { format!("Column{}", i + 1) } else { joined });
            }
            let data_start = resolve_skipto(buf, start, end, pos, opts);
            Ok(Layout {
                header_names: normalize_headers(names, opts.normalize_names),
                data_start,
            })
        }
    }
}

fn resolve_skipto(buf: &[u8], start: usize, end: usize, computed: usize, opts: &Options) -> usize {
    if let Some(skipto) = opts.skipto {
        let mut pos = start;
        for _ in 0..skipto.saturating_sub(1) {
            pos = skip_noise_lines(buf, pos, end, opts);
            let row = scan_row(buf, pos, opts);
            pos = row.next_pos;
        }
        pos
    } else {
        skip_noise_lines(buf, computed, end, opts)
    }
}

fn resolve_explicit_data_start(buf: &[u8], start: usize, end: usize, opts: &Options) -> usize {
    if let Some(datarow) = opts.datarow {
        let mut pos = start;
        for _ in 0..datarow.saturating_sub(1) {
            pos = skip_noise_lines(buf, pos, end, opts);
            let row = scan_row(buf, pos, opts);
            pos = row.next_pos;
        }
        skip_noise_lines(buf, pos, end, opts)
    } else if let Some(skipto) = opts.skipto {
        let mut pos = start;
        for _ in 0..skipto.saturating_sub(1) {
            pos = skip_noise_lines(buf, pos, end, opts);
            let row = scan_row(buf, pos, opts);
            pos = row.next_pos;
        }
        skip_noise_lines(buf, pos, end, opts)
    } else {
        skip_noise_lines(buf, start, end, opts)
    }
}

fn synthetic_names(n: usize) -> Vec<String> {
    (1..=n).map(|i| format!("Column{i}")).collect()
}

fn normalize_headers(raw: Vec<String>, normalize: bool) -> Vec<String> {
    let mut seen = hashbrown::HashMap::<String, usize>::new();
    raw.into_iter()
        .map(|name| {
            let name = if normalize { normalize_identifier(&name) } else { name };
            let count = seen.entry(name.clone()).or_insert(0);
            let result = if *count == 0 {
                name.clone()
            } else {
                format!("{name}_{count}")
            };
            *count += 1;
            result
        })
        .collect()
}

fn normalize_identifier(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for (i, c) in name.chars().enumerate() {
        let ok = if i == 0 {
            c.is_alphabetic() || c == '_'
        } else {
            c.is_alphanumeric() || c == '_'
        };
        out.push(if ok { c } else { '_' });
    }
    if out.is_empty() || out.chars().next().map(|c| c.is_numeric()).unwrap_or(false) {
        out.insert(0, '_');
    }
    out
}

/// Trait used only to decode a [`ScannedRow`]'s raw (pos, len, escape)
/// field tuples into owned `String`s against a buffer, for header rows.
trait RowDecode {
    fn clone_from_row(&self, buf: &[u8], opts: &Options) -> Vec<String>;
}

impl RowDecode for Vec<(usize, usize, bool)> {
    fn clone_from_row(&self, buf: &[u8], opts: &Options) -> Vec<String> {
        self.iter()
            .map(|&(pos, len, escaped)| {
                let bytes = crate::parser::field_bytes(buf, pos, len, escaped, opts.escape_byte, opts.close_quote);
                String::from_utf8_lossy(&bytes).into_owned()
            })
            .collect()
    }
}

/// Infers the delimiter for `path`/`buf` when the caller did not supply
/// one. `.tsv` implies tab, `.wsv` implies space; otherwise the
/// candidate whose per-row field count is most consistent over the
/// first `DETECTION_WINDOW_ROWS` rows wins.
///
/// Tie-break: highest mode
/// frequency first, then higher field count, then earlier position in
/// `CANDIDATE_DELIMS` — i.e. comma is preferred over tab over space over
/// pipe over semicolon when multiple candidates tie exactly.
pub fn infer_delimiter(buf: &[u8], start: usize, end: usize, path: Option<&Path>, opts: &Options) -> Result<Vec<u8>> {
    if let Some(d) = &opts.delim {
        validate_delimiter(d)?;
        return Ok(d.clone());
    }
    if let Some(p) = path {
        if let Some(ext) = p.extension().and_then(|e| e.to_str()) {
            if ext.eq_ignore_ascii_case("tsv") {
                return Ok(vec![b'\t']);
            }
            if ext.eq_ignore_ascii_case("wsv") {
                return Ok(vec![b' ']);
            }
        }
    }

    // (mode_count, mode_field_count, candidate_index); higher is better,
    // with `idx` compared in reverse so that an earlier candidate index
    // wins ties under a plain `>` comparison.
    let mut best: Option<(usize, usize, usize)> = None;
    let mut winner_idx = 0usize;
    for (idx, &cand) in CANDIDATE_DELIMS.iter().enumerate() {
        let mut trial = opts.clone();
        trial.delim = Some(vec![cand]);
        let counts = sample_field_counts(buf, start, end, &trial);
        if counts.is_empty() {
            continue;
        }
        let (mode_value, mode_count) = mode(&counts);
        let key = (mode_count, mode_value, CANDIDATE_DELIMS.len() - idx);
        let is_better = match best {
            None => true,
            Some(b) => key > b,
        };
        if is_better {
            best = Some(key);
            winner_idx = idx;
        }
    }
    Ok(vec![CANDIDATE_DELIMS[winner_idx]])
}

fn sample_field_counts(buf: &[u8], start: usize, end: usize, opts: &Options) -> Vec<usize> {
    let mut pos = skip_noise_lines(buf, start, end, opts);
    let mut counts = Vec::new();
    for _ in 0..DETECTION_WINDOW_ROWS {
        if pos >= end {
            break;
        }
        let row = scan_row(buf, pos, opts);
        counts.push(row.fields.len());
        pos = skip_noise_lines(buf, row.next_pos, end, opts);
        if row.hit_eof {
            break;
        }
    }
    counts
}

/// Returns `(value, count)` of the most frequent element, tie-broken by
/// higher value.
fn mode(counts: &[usize]) -> (usize, usize) {
    let mut freq: hashbrown::HashMap<usize, usize> = hashbrown::HashMap::new();
    for &c in counts {
        *freq.entry(c).or_insert(0) += 1;
    }
    freq.into_iter()
        .max_by_key(|&(value, count)| (count, value))
        .unwrap_or((0, 0))
}

pub fn validate_delimiter(delim: &[u8]) -> Result<()> {
    if delim.len() == 1 && ALWAYS_INVALID_DELIMS.contains(&delim[0]) {
        return Err(CsvTapeError::InvalidDelimiter(format!("{:?}", delim[0] as char)));
    }
    if delim.is_empty() {
        return Err(CsvTapeError::InvalidDelimiter("empty delimiter".into()));
    }
    Ok(())
}

/// Scans a sample prefix and linearly extrapolates a row-count estimate
/// against total bytes. Only a hint: the Tape Builder
/// handles under-estimates by growing.
pub fn estimate_row_count(buf: &[u8], start: usize, end: usize, opts: &Options) -> (usize, f64) {
    const SAMPLE_ROWS: usize = 64;
    let mut pos = skip_noise_lines(buf, start, end, opts);
    let sample_start = pos;
    let mut rows = 0usize;
    for _ in 0..SAMPLE_ROWS {
        if pos >= end {
            break;
        }
        let row = scan_row(buf, pos, opts);
        rows += 1;
        pos = row.next_pos;
        if row.hit_eof {
            break;
        }
    }
    if rows == 0 {
        return (0, 0.0);
    }
    let sampled_bytes = (pos - sample_start).max(1);
    let avg = sampled_bytes as f64 / rows as f64;
    let total_bytes = (end - start).max(1);
    let estimate = ((total_bytes as f64) / avg).ceil() as usize;
    (estimate, avg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::OptionsBuilder;

    #[test]
    fn detects_comma_delimiter() {
        let opts = OptionsBuilder::new().build();
        let buf = b"a,b,c\n1,2,3\n4,5,6\n";
        let delim = infer_delimiter(buf, 0, buf.len(), None, &opts).unwrap();
        assert_eq!(delim, b",");
    }

    #[test]
    fn detects_semicolon_delimiter() {
        let opts = OptionsBuilder::new().build();
        let buf = b"a;b;c\n1;2;3\n4;5;6\n";
        let delim = infer_delimiter(buf, 0, buf.len(), None, &opts).unwrap();
        assert_eq!(delim, b";");
    }

    #[test]
    fn tsv_extension_forces_tab() {
        let opts = OptionsBuilder::new().build();
        let buf = b"a,b\n1,2\n";
        let delim = infer_delimiter(buf, 0, buf.len(), Some(Path::new("x.tsv")), &opts).unwrap();
        assert_eq!(delim, b"\t");
    }

    #[test]
    fn header_row_one_resolves_data_start() {
        let opts = OptionsBuilder::new().build();
        let buf = b"a,b,c\n1,2,3\n";
        let layout = resolve_layout(buf, 0, buf.len(), &opts).unwrap();
        assert_eq!(layout.header_names, vec!["a", "b", "c"]);
        assert_eq!(&buf[layout.data_start..], b"1,2,3\n");
    }

    #[test]
    fn normalize_names_disambiguates_duplicates() {
        let names = normalize_headers(vec!["a".into(), "a".into(), "1x".into()], true);
        assert_eq!(names, vec!["a".to_string(), "a_1".to_string(), "_1x".to_string()]);
    }
}
