//! Parallel Coordinator: splits the data region into
//! row-aligned byte ranges, parses each range independently (via
//! [`rayon`]), and merges the results into one set of columns. The
//! sequential path is just this module's single-chunk case, so there is
//! one row-walking implementation rather than two.

use rayon::prelude::*;

use crate::error::{ParseWarning, Result};
use crate::infer::Column;
use crate::layout::{self, skip_noise_lines};
use crate::options::{Options, ThreadingMode};
use crate::typecode::{AtomicTypeCode, BaseType, TypeCode};

/// Whether the coordinator should fan this parse out across threads:
/// threading must not be forbidden, the source must not be transposed,
/// there must be no row `limit` (each chunk's own `limit` counter is
/// local, so honoring a global cap across chunks would need a shared
/// budget; simplest to just not split the work), and for `Auto` the
/// estimated work must clear a minimum size so the split/merge overhead
/// is worth paying.
pub fn should_parallelize(opts: &Options, row_estimate: usize, ncols: usize) -> bool {
    if opts.limit.is_some() {
        return false;
    }
    match opts.threaded {
        ThreadingMode::Never => false,
        ThreadingMode::Always => !opts.transpose && ncols > 0 && row_estimate > 1,
        ThreadingMode::Auto => {
            let threads = opts.n_threads.unwrap_or_else(rayon::current_num_threads);
            threads > 1
                && !opts.transpose
                && row_estimate > threads
                && row_estimate.saturating_mul(ncols.max(1)) >= 5_000
        }
    }
}

/// Parses `[start, end)` as a single range, building one `Column` per
/// name. Used directly for the sequential path, and once per worker
/// slice by [`parse_parallel`].
pub fn parse_range(
    buf: &[u8],
    start: usize,
    end: usize,
    names: &[String],
    opts: &Options,
    row_estimate: usize,
    shared_types: Option<&[AtomicTypeCode]>,
) -> Result<(Vec<Column>, usize, Vec<ParseWarning>)> {
    let ncols = names.len();
    let mut columns: Vec<Column> = names
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let user_type = crate::infer::resolve_user_type(opts, i, name);
            Column::new(name.clone(), i, row_estimate.max(16), user_type)
        })
        .collect();

    let mut warnings = Vec::new();
    let mut pos = skip_noise_lines(buf, start, end, opts);
    let mut row = 0usize;

    while pos < end {
        if let Some(limit) = opts.limit {
            if row >= limit {
                break;
            }
        }
        let scanned = layout::scan_row(buf, pos, opts);
        let nfields = scanned.fields.len();

        if nfields < ncols {
            crate::error::emit_warning(
                &mut warnings,
                opts.silence_warnings,
                ParseWarning::TooFewFields {
                    row,
                    expected: ncols,
                    found: nfields,
                },
            );
        } else if nfields > ncols {
            crate::error::emit_warning(
                &mut warnings,
                opts.silence_warnings,
                ParseWarning::TooManyFields {
                    row,
                    expected: ncols,
                    found: nfields,
                },
            );
        }

        for (i, column) in columns.iter_mut().enumerate().take(ncols.min(nfields)) {
            column.ingest_cell(row, buf, scanned.starts[i], opts, row_estimate, &mut warnings)?;
        }
        for column in columns.iter_mut().take(ncols).skip(nfields) {
            column.fill_missing(row);
        }

        row += 1;
        let next = skip_noise_lines(buf, scanned.next_pos, end, opts);
        if scanned.hit_eof {
            break;
        }
        pos = next;
    }

    if let Some(shared) = shared_types {
        for (column, atomic) in columns.iter().zip(shared.iter()) {
            atomic.promote_to(column.type_code);
        }
    }

    Ok((columns, row, warnings))
}

/// Splits `[start, end)` into up to `n_chunks` row-aligned byte ranges
/// by scanning forward once and recording the first row boundary at or
/// past each target split point.
fn find_split_points(buf: &[u8], start: usize, end: usize, opts: &Options, n_chunks: usize) -> Vec<usize> {
    if n_chunks <= 1 || end <= start {
        return vec![start, end];
    }
    let target_chunk_bytes = ((end - start) / n_chunks).max(1);
    let mut boundaries = vec![start];
    let mut pos = start;
    let mut next_target = start + target_chunk_bytes;

    while pos < end && boundaries.len() < n_chunks {
        let row = layout::scan_row(buf, pos, opts);
        pos = row.next_pos;
        if row.hit_eof {
            break;
        }
        if pos >= next_target {
            boundaries.push(pos);
            next_target = pos + target_chunk_bytes;
        }
    }
    boundaries.push(end);
    boundaries.dedup();
    boundaries
}

/// Parses `[start, end)` across multiple worker threads and merges the
/// results deterministically: row order follows chunk order, a
/// column's final type is the dominating type across all chunks, and a
/// POOL column's per-chunk refs are re-coded into one global pool.
pub fn parse_parallel(
    buf: &[u8],
    start: usize,
    end: usize,
    names: &[String],
    opts: &Options,
    row_estimate: usize,
) -> Result<(Vec<Column>, usize, Vec<ParseWarning>)> {
    let n_chunks = opts.n_threads.unwrap_or_else(rayon::current_num_threads).max(1);
    let boundaries = find_split_points(buf, start, end, opts, n_chunks);
    let ranges: Vec<(usize, usize)> = boundaries.windows(2).map(|w| (w[0], w[1])).collect();

    let shared_types: Vec<AtomicTypeCode> = names.iter().map(|_| AtomicTypeCode::new(TypeCode::EMPTY)).collect();

    let per_chunk_estimate = (row_estimate / ranges.len().max(1)).max(16);
    let chunk_results: Vec<Result<(Vec<Column>, usize, Vec<ParseWarning>)>> = ranges
        .par_iter()
        .map(|&(lo, hi)| parse_range(buf, lo, hi, names, opts, per_chunk_estimate, Some(&shared_types)))
        .collect();

    let mut chunks = Vec::with_capacity(chunk_results.len());
    for r in chunk_results {
        chunks.push(r?);
    }

    merge_chunks(chunks, names, &shared_types)
}

fn merge_chunks(
    chunks: Vec<(Vec<Column>, usize, Vec<ParseWarning>)>,
    names: &[String],
    shared_types: &[AtomicTypeCode],
) -> Result<(Vec<Column>, usize, Vec<ParseWarning>)> {
    let total_rows: usize = chunks.iter().map(|(_, n, _)| *n).sum();
    let ncols = names.len();

    let mut merged: Vec<Column> = (0..ncols)
        .map(|i| Column::new(names[i].clone(), i, total_rows.max(1), None))
        .collect();
    for (i, column) in merged.iter_mut().enumerate() {
        column.type_code = shared_types[i].load();
    }

    let mut warnings = Vec::new();
    let mut row_offset = 0usize;

    for (mut columns, nrows, chunk_warnings) in chunks {
        warnings.extend(chunk_warnings);

        for (i, src) in columns.iter_mut().enumerate() {
            let merged_base = merged[i].type_code.base();
            if src.type_code.base() == BaseType::Int && merged_base == BaseType::Float {
                src.tape.promote_int_column_to_float();
            }

            let remap: Option<Vec<u32>> = if merged_base == BaseType::Pool {
                src.pool.take().map(|pool| {
                    let target = merged[i].pool.get_or_insert_with(Default::default);
                    let mut remap = vec![0u32; pool.len() + 1];
                    for (bytes, local_ref) in pool.iter() {
                        remap[local_ref as usize] = target.intern(bytes);
                    }
                    remap
                })
            } else {
                None
            };

            for r in 0..nrows {
                let dst_row = row_offset + r;
                let pl = src.tape.get_poslen(r);
                merged[i].tape.set_poslen(dst_row, pl);
                if pl.missing {
                    continue;
                }
                match merged_base {
                    BaseType::String => {
                        // poslen alone is sufficient; no value bits needed.
                    }
                    BaseType::Pool => {
                        let local_ref = src.tape.get_ref(r);
                        let global_ref = remap.as_ref().map(|m| m[local_ref as usize]).unwrap_or(local_ref);
                        merged[i].tape.set_ref(dst_row, global_ref);
                    }
                    _ => {
                        merged[i].tape.set_value_bits(dst_row, src.tape.get_value_bits(r));
                    }
                }
            }
        }
        row_offset += nrows;
    }

    Ok((merged, total_rows, warnings))
}
