//! The per-cycle merge of the BWT constructor.
//!
//! Cycle `k` turns the parity `(k-1) % 2` state into the parity `k % 2`
//! state. Every active read contributes one symbol: the base `k` places
//! from its right end, or the end marker once the cycle reaches its
//! length. The merge walks the previous chunk region by region and splices
//! each insertion after
//!
//! ```text
//! y = cum2[region][prev_bucket] + x
//! ```
//!
//! existing region positions, where `cum2` counts the two-base suffixes
//! from the initial bucket totals and `x` is the insertion counter stored
//! by the previous cycle: the number of same-symbol entries copied (not
//! inserted) ahead of the read's own entry. Bucket concatenation order
//! `(0,e) .. (3,e)` is exactly ascending previous-position order, so the
//! spliced output is the BWT of all suffixes one column deeper.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::alphabet::{self, BASES, END};
use crate::error::Result;
use crate::layout::IndexFiles;
use crate::transform::chunk::{ChunkHeader, RunCursor, RunReader, RunWriter, CHUNK_HEADER};
use crate::transform::init::{sap_byte, write_wide};
use crate::ReadId;

/// Per-cycle end-of-read flags, one bit per id, bit `1 << (7 - id % 8)`.
pub struct EndsBitset {
    bits: Vec<u8>,
    all: bool,
    any: bool,
}

impl EndsBitset {
    /// A bitset with the given ids flagged.
    #[must_use]
    pub fn new(seq_count: u32, ids: &[ReadId]) -> Self {
        let mut bits = vec![0u8; (seq_count as usize + 7) / 8];
        for &id in ids {
            bits[id as usize / 8] |= 1 << (7 - (id % 8));
        }
        Self {
            bits,
            all: false,
            any: !ids.is_empty(),
        }
    }

    /// The final cycle: every remaining read terminates.
    #[must_use]
    pub fn everyone() -> Self {
        Self {
            bits: Vec::new(),
            all: true,
            any: true,
        }
    }

    #[inline]
    #[must_use]
    pub fn get(&self, id: ReadId) -> bool {
        self.all || (self.any && self.bits[id as usize / 8] & (1 << (7 - (id % 8))) != 0)
    }
}

/// Summary of one completed cycle, for progress reporting.
#[derive(Debug, Clone, Copy)]
pub struct CycleStats {
    pub inserted: u64,
    pub ended: u64,
    pub bwt_count: u64,
}

/// Sequential reader over a count-prefixed u32 id file.
struct IdStream {
    reader: BufReader<File>,
    left: u32,
}

impl IdStream {
    fn open(path: &std::path::Path) -> Result<Self> {
        let mut reader = BufReader::new(File::open(path)?);
        let left = reader.read_u32::<LittleEndian>()?;
        Ok(Self { reader, left })
    }

    fn next(&mut self) -> Result<ReadId> {
        debug_assert!(self.left > 0);
        self.left -= 1;
        Ok(self.reader.read_u32::<LittleEndian>()?)
    }
}

/// Sequential reader over one cycle's variable-width insertion counters.
struct InsStream {
    reader: BufReader<File>,
    width: usize,
}

impl InsStream {
    fn open(path: &std::path::Path) -> Result<Self> {
        let mut reader = BufReader::new(File::open(path)?);
        let _byte_len = reader.read_u64::<LittleEndian>()?;
        let sap = reader.read_u8()? & 0x7f;
        let _reserved = reader.read_u8()?;
        Ok(Self {
            reader,
            width: sap as usize + 1,
        })
    }

    fn next(&mut self) -> Result<u64> {
        let mut value = 0u64;
        for _ in 0..self.width {
            value = (value << 8) | u64::from(self.reader.read_u8()?);
        }
        Ok(value)
    }
}

/// Writers for the sixteen id buckets of one parity slot.
pub(crate) struct BucketWriter {
    files: Vec<BufWriter<File>>,
    counts: [[u32; BASES]; BASES],
}

impl BucketWriter {
    pub(crate) fn open(files: &IndexFiles, parity: u8) -> Result<Self> {
        let mut out = Vec::with_capacity(16);
        for i in 0..BASES as u8 {
            for j in 0..BASES as u8 {
                let mut fp = files.updater(&files.ids(parity, i, j))?;
                fp.seek(SeekFrom::Start(4))?;
                out.push(BufWriter::new(fp));
            }
        }
        Ok(Self {
            files: out,
            counts: [[0; BASES]; BASES],
        })
    }

    pub(crate) fn push(&mut self, i: u8, j: u8, id: ReadId) -> Result<()> {
        self.counts[i as usize][j as usize] += 1;
        self.files[i as usize * BASES + j as usize].write_u32::<LittleEndian>(id)?;
        Ok(())
    }

    pub(crate) fn finish(self) -> Result<[[u32; BASES]; BASES]> {
        for (slot, writer) in self.files.into_iter().enumerate() {
            let mut fp = writer.into_inner().map_err(std::io::Error::from)?;
            fp.seek(SeekFrom::Start(0))?;
            fp.write_u32::<LittleEndian>(self.counts[slot / BASES][slot % BASES])?;
        }
        Ok(self.counts)
    }
}

/// Runs merge cycle `k`, leaving the new state in parity slot `k % 2`.
///
/// `chars` is the packed base column for this cycle; `None` on the final
/// cycle, where every remaining read emits its end marker instead.
pub(crate) fn run_cycle(
    files: &IndexFiles,
    session_id: u64,
    k: usize,
    read_len: usize,
    pair_counts: &[[u32; BASES]; BASES],
    chars: Option<&[u8]>,
    ends: &EndsBitset,
) -> Result<CycleStats> {
    debug_assert!(k >= 2 && k <= read_len);
    let p_old = ((k - 1) & 1) as u8;
    let p_new = (k & 1) as u8;

    // cum2[e][d]: number of two-base suffixes "e d'" with d' <= d; the
    // share of region e that sorts ahead of any longer suffix arriving
    // from previous-symbol bucket d.
    let mut cum2 = [[0u64; BASES]; BASES];
    for e in 0..BASES {
        let mut sum = 0u64;
        for d in 0..BASES {
            sum += u64::from(pair_counts[d][e]);
            cum2[e][d] = sum;
        }
    }

    let mut old_bwt = files.reader(&files.bwt(p_old))?;
    let old_header = ChunkHeader::from_reader(&mut old_bwt)?;
    old_header.check_session(session_id)?;
    let old_regions: [u64; 4] = if k == 2 {
        // The initial chunk carries bucket totals, not region sizes; the
        // body is empty either way.
        [0; 4]
    } else {
        [
            old_header.char_counts[0],
            old_header.char_counts[1],
            old_header.char_counts[2],
            old_header.char_counts[3],
        ]
    };
    let mut body = RunCursor::new(RunReader::new(old_bwt, old_header.bwt_count));

    let mut old_ends = IdStream::open(&files.end(p_old))?;
    let mut bucket_in: Vec<IdStream> = Vec::with_capacity(16);
    for d in 0..BASES as u8 {
        for e in 0..BASES as u8 {
            bucket_in.push(IdStream::open(&files.ids(p_old, d, e))?);
        }
    }
    let mut xs: Vec<Option<InsStream>> = Vec::with_capacity(BASES);
    for e in 0..BASES as u8 {
        if k == 2 {
            xs.push(None);
        } else {
            xs.push(Some(InsStream::open(&files.ins(p_old, e))?));
        }
    }

    let mut out_file = File::create(files.bwt(p_new))?;
    out_file.write_all(&[0u8; CHUNK_HEADER])?;
    let mut out = RunWriter::new(BufWriter::new(out_file));

    let mut new_ends = BufWriter::new(File::create(files.end(p_new))?);
    new_ends.write_u32::<LittleEndian>(0)?;
    let mut end_total: u32 = 0;

    let mut new_buckets = BucketWriter::open(files, p_new)?;
    let mut new_xs: [Vec<u64>; BASES] = Default::default();

    // Copied (not inserted) base entries so far this cycle; the x counters
    // recorded for the next cycle.
    let mut cnt_old = [0u64; BASES];
    let mut inserted = [0u64; BASES];
    let mut ended = 0u64;

    for e in 0..BASES {
        let old_size = old_regions[e];
        let mut t = 0u64;
        for d in 0..BASES {
            let pending = bucket_in[d * BASES + e].left;
            for _ in 0..pending {
                let id = bucket_in[d * BASES + e].next()?;
                let y = match xs[e] {
                    None => 0,
                    Some(ref mut xs) => cum2[e][d] + xs.next()?,
                };
                debug_assert!(y >= t && y <= old_size);
                copy_span(
                    &mut body,
                    y - t,
                    &mut out,
                    &mut cnt_old,
                    &mut old_ends,
                    &mut new_ends,
                    &mut end_total,
                )?;
                t = y;

                inserted[e] += 1;
                if ends.get(id) {
                    out.push(END, 1)?;
                    new_ends.write_u32::<LittleEndian>(id)?;
                    end_total += 1;
                    ended += 1;
                } else {
                    let sym = alphabet::get2(chars.expect("column for live read"), id);
                    out.push(sym, 1)?;
                    new_xs[sym as usize].push(cnt_old[sym as usize]);
                    new_buckets.push(e as u8, sym, id)?;
                }
            }
        }
        copy_span(
            &mut body,
            old_size - t,
            &mut out,
            &mut cnt_old,
            &mut old_ends,
            &mut new_ends,
            &mut end_total,
        )?;
    }

    // Persist the new insertion counter files at their exact width.
    for e in 0..BASES as u8 {
        let max = new_xs[e as usize].iter().copied().max().unwrap_or(0);
        let sap = sap_byte(max);
        let width = sap as usize + 1;
        let mut ins = files.writer(&files.ins(p_new, e))?;
        ins.write_u64::<LittleEndian>((2 + width * new_xs[e as usize].len()) as u64)?;
        ins.write_u8(0x80 | sap)?;
        ins.write_u8(0)?;
        for &x in &new_xs[e as usize] {
            write_wide(&mut ins, x, width)?;
        }
        ins.flush()?;
    }

    new_buckets.finish()?;

    let mut new_ends = new_ends.into_inner().map_err(std::io::Error::from)?;
    new_ends.seek(SeekFrom::Start(0))?;
    new_ends.write_u32::<LittleEndian>(end_total)?;

    let total_inserted: u64 = inserted.iter().sum();
    let mut char_counts = [0u64; 5];
    for e in 0..BASES {
        char_counts[e] = old_regions[e] + inserted[e];
    }
    char_counts[4] = old_header.char_counts[4] + ended;
    let new_header = ChunkHeader {
        session_id,
        has_ends: char_counts[4] > 0,
        bwt_count: old_header.bwt_count + total_inserted,
        char_counts,
        base_pos: old_header.base_pos,
    };
    let mut out_file = out.finish()?.into_inner().map_err(std::io::Error::from)?;
    out_file.seek(SeekFrom::Start(0))?;
    new_header.write_to(&mut out_file)?;
    out_file.flush()?;

    Ok(CycleStats {
        inserted: total_inserted,
        ended,
        bwt_count: new_header.bwt_count,
    })
}

/// Copies `n` entries of the previous body into the new one, threading end
/// markers through to the new end-id list.
fn copy_span<R: Read, W: Write>(
    body: &mut RunCursor<R>,
    n: u64,
    out: &mut RunWriter<W>,
    cnt_old: &mut [u64; BASES],
    old_ends: &mut IdStream,
    new_ends: &mut BufWriter<File>,
    end_total: &mut u32,
) -> Result<()> {
    if n == 0 {
        return Ok(());
    }
    body.copy_n(n, |sym, len| {
        out.push(sym, len)?;
        if sym == END {
            for _ in 0..len {
                new_ends.write_u32::<LittleEndian>(old_ends.next()?)?;
                *end_total += 1;
            }
        } else {
            cnt_old[sym as usize] += len;
        }
        Ok(())
    })
}
