//! Initialization pass of the BWT constructor (cycles 0 and 1).
//!
//! One stream over the packed read store materializes everything the merge
//! cycles need: the per-cycle base columns, the cycle-2 column kept in
//! memory, the initial (last base, second-last base) id buckets, the
//! cycle-0 chunk with its empty body, the empty end-id list and the initial
//! insertion counter files. The state lands in parity slot 1, where the
//! first merge cycle reads it.

use std::io::{Seek, SeekFrom, Write};

use byteorder::{LittleEndian, WriteBytesExt};

use crate::alphabet::{self, BASES};
use crate::error::Result;
use crate::layout::IndexFiles;
use crate::store::{self, BinHeader, StoreReader};
use crate::transform::chunk::ChunkHeader;
use crate::transform::cycler::BucketWriter;
use crate::ReadId;

/// Ids buffered per column block before a seek-and-flush; multiple of four
/// so packed bytes never straddle a flush.
const COLUMN_BLOCK: usize = 32_768;

/// In-memory outcome of the initialization pass.
pub struct InitState {
    /// The cycle-2 column (base at `L - 3` per strand), packed 4 per byte.
    pub chars: Vec<u8>,
    /// Initial bucket occupancies; column seed table for later cycles.
    pub pair_counts: [[u32; BASES]; BASES],
}

/// Runs the initialization pass and advances the header to cycle 1.
pub fn run(files: &IndexFiles, header: &BinHeader) -> Result<InitState> {
    let seq_count = header.seq_count;
    let read_len = header.read_len as usize;
    let char_size = (seq_count as usize + 3) / 4;

    let mut columns = ColumnWriter::open(files, read_len, char_size)?;
    let mut buckets = BucketWriter::open(files, 1)?;
    let mut chars = vec![0u8; char_size];

    let mut reader = StoreReader::open(files)?;
    let mut codes = Vec::new();
    let mut id: ReadId = 0;
    while reader.next_record(&mut codes)? {
        push_strand(&mut columns, &mut buckets, &mut chars, &codes, false, id)?;
        id += 1;
        if header.revcomp {
            push_strand(&mut columns, &mut buckets, &mut chars, &codes, true, id)?;
            id += 1;
        }
    }
    assert_eq!(id, seq_count);
    columns.finish()?;
    let pair_counts = buckets.finish()?;

    write_inserts(files, &pair_counts)?;
    write_base_chunk(files, header.session_id, &pair_counts)?;
    write_empty_ends(files)?;
    store::patch_cycle(&files.bin(), 1)?;

    Ok(InitState { chars, pair_counts })
}

/// Re-derives the cycle-2 column from the store, for `--resume` at cycle 1.
pub fn reload_chars(files: &IndexFiles, header: &BinHeader) -> Result<Vec<u8>> {
    let char_size = (header.seq_count as usize + 3) / 4;
    let mut chars = vec![0u8; char_size];
    let mut reader = StoreReader::open(files)?;
    let mut codes = Vec::new();
    let mut id: ReadId = 0;
    while reader.next_record(&mut codes)? {
        alphabet::set2(&mut chars, id, strand_sym(&codes, 2, false));
        id += 1;
        if header.revcomp {
            alphabet::set2(&mut chars, id, strand_sym(&codes, 2, true));
            id += 1;
        }
    }
    Ok(chars)
}

/// The symbol a strand inserts at cycle `k`: its base `k` places from the
/// right end, or zero filler once the strand is too short to reach.
#[inline]
fn strand_sym(codes: &[u8], k: usize, rc: bool) -> u8 {
    let len = codes.len();
    if k >= len {
        return 0;
    }
    if rc {
        alphabet::comp(codes[k])
    } else {
        codes[len - 1 - k]
    }
}

fn push_strand(
    columns: &mut ColumnWriter,
    buckets: &mut BucketWriter,
    chars: &mut [u8],
    codes: &[u8],
    rc: bool,
    id: ReadId,
) -> Result<()> {
    columns.push(|k| strand_sym(codes, k, rc))?;
    alphabet::set2(chars, id, strand_sym(codes, 2, rc));
    let last = strand_sym(codes, 0, rc);
    let prev = strand_sym(codes, 1, rc);
    buckets.push(last, prev, id)?;
    Ok(())
}

/// Block-buffered writer for the per-cycle column cache.
struct ColumnWriter {
    file: std::fs::File,
    /// One packed block buffer per column `k` in `[3, read_len)`.
    blocks: Vec<Vec<u8>>,
    /// Next flush offset per column.
    seeks: Vec<u64>,
    pending: usize,
}

impl ColumnWriter {
    fn open(files: &IndexFiles, read_len: usize, char_size: usize) -> Result<Self> {
        let cols = read_len.saturating_sub(3);
        let mut file = std::fs::File::create(files.chr())?;
        if cols > 0 && char_size > 0 {
            file.seek(SeekFrom::Start((cols * char_size) as u64 - 1))?;
            file.write_all(&[0])?;
        }
        let seeks = (0..cols).map(|c| (c * char_size) as u64).collect();
        Ok(Self {
            file,
            blocks: vec![Vec::with_capacity(COLUMN_BLOCK / 4); cols],
            seeks,
            pending: 0,
        })
    }

    /// Appends one strand's symbol to every column buffer.
    fn push<F: Fn(usize) -> u8>(&mut self, sym_at: F) -> Result<()> {
        let sub = self.pending & 0x3;
        for (c, block) in self.blocks.iter_mut().enumerate() {
            let sym = sym_at(c + 3);
            if sub == 0 {
                block.push(alphabet::pack(sym, 0));
            } else {
                *block.last_mut().unwrap() |= alphabet::pack(sym, sub);
            }
        }
        self.pending += 1;
        if self.pending == COLUMN_BLOCK {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        for (c, block) in self.blocks.iter_mut().enumerate() {
            self.file.seek(SeekFrom::Start(self.seeks[c]))?;
            self.file.write_all(block)?;
            self.seeks[c] += block.len() as u64;
            block.clear();
        }
        self.pending = 0;
        Ok(())
    }

    fn finish(mut self) -> Result<()> {
        self.flush()
    }
}

/// Writes the initial insertion files: the four bucket totals per region,
/// each in the minimum whole-byte width that fits the largest of them.
fn write_inserts(files: &IndexFiles, counts: &[[u32; BASES]; BASES]) -> Result<()> {
    for i in 0..BASES {
        let max = *counts[i].iter().max().unwrap();
        let sap = sap_byte(u64::from(max));
        let width = sap as usize + 1;
        let mut ins = files.writer(&files.ins(1, i as u8))?;
        ins.write_u64::<LittleEndian>((2 + width * 4) as u64)?;
        ins.write_u8(0x80 | sap)?;
        ins.write_u8(0)?;
        for j in 0..BASES {
            write_wide(&mut ins, u64::from(counts[i][j]), width)?;
        }
        ins.flush()?;
    }
    Ok(())
}

/// Minimum extra bytes (beyond one) needed to hold `count`.
pub fn sap_byte(count: u64) -> u8 {
    let mut max = 0xffu64;
    let mut sap = 0u8;
    while count > max {
        max = (max << 8) | 0xff;
        sap += 1;
    }
    sap
}

/// Writes a counter as `width` big-endian bytes.
pub fn write_wide<W: Write>(writer: &mut W, count: u64, width: usize) -> Result<()> {
    for k in (0..width).rev() {
        writer.write_u8(((count >> (8 * k)) & 0xff) as u8)?;
    }
    Ok(())
}

/// Writes the cycle-0 chunk: character counts from the bucket sizes, base
/// positions as the per-base totals, and an empty body.
fn write_base_chunk(files: &IndexFiles, session_id: u64, counts: &[[u32; BASES]; BASES]) -> Result<()> {
    let mut base_pos = [0u32; 4];
    for i in 0..BASES {
        base_pos[i] = counts[i].iter().sum();
    }
    let mut char_counts = [0u64; 5];
    for i in 0..BASES {
        char_counts[i] = u64::from(base_pos[i]);
    }
    let header = ChunkHeader {
        session_id,
        has_ends: false,
        bwt_count: 0,
        char_counts,
        base_pos,
    };
    let mut bwt = files.writer(&files.bwt(1))?;
    header.write_to(&mut bwt)?;
    bwt.flush()?;
    Ok(())
}

fn write_empty_ends(files: &IndexFiles) -> Result<()> {
    let mut ends = files.writer(&files.end(1))?;
    ends.write_u32::<LittleEndian>(0)?;
    ends.flush()?;
    Ok(())
}
