//! Rank and range queries over the finished BWT.
//!
//! The reader decodes the final chunk's run-length body into memory once,
//! builds sparse rank checkpoints over the runs, and serves the two
//! operations every query engine is written against: a two-character seed
//! interval and the one-character leftward extension step.

use crate::alphabet::BASES;
use crate::error::{ReadError, Result};
use crate::layout::IndexFiles;
use crate::store::{last_pair_counts, BinHeader};
use crate::transform::{ChunkHeader, RunReader, Transform};

/// Checkpoint every this many runs; rank queries scan at most one gap.
const MARK_RUNS: usize = 64;

/// Per-symbol occurrence counts of a BWT range, end markers separate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CharCount {
    pub counts: [u64; 4],
    pub ends: u64,
}

impl CharCount {
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Number of distinct bases present in the range.
    #[must_use]
    pub fn branch_count(&self) -> usize {
        self.counts.iter().filter(|&&c| c > 0).count()
    }

    /// The single most frequent base, or 4 when tied or absent.
    #[must_use]
    pub fn max_branch(&self) -> usize {
        let mut best = 4;
        let mut tied = false;
        for (i, &count) in self.counts.iter().enumerate() {
            if count == 0 {
                continue;
            }
            if best == 4 || count > self.counts[best] {
                best = i;
                tied = false;
            } else if count == self.counts[best] {
                tied = true;
            }
        }
        if tied {
            4
        } else {
            best
        }
    }

    /// Total symbols counted, end markers included.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.counts.iter().sum::<u64>() + self.ends
    }
}

impl std::ops::Index<usize> for CharCount {
    type Output = u64;

    fn index(&self, i: usize) -> &u64 {
        &self.counts[i]
    }
}

#[derive(Clone, Copy)]
struct Run {
    sym: u8,
    len: u64,
}

#[derive(Clone, Copy)]
struct Mark {
    pos: u64,
    occ: [u64; 5],
}

/// The FM-index reader over one finished index.
pub struct IndexReader {
    runs: Vec<Run>,
    marks: Vec<Mark>,
    /// Start of each base's suffix region.
    c_base: [u64; 4],
    /// Region sizes, end markers in slot 4.
    char_counts: [u64; 5],
    /// `pair2[d][e]`: strands whose last two bases are `(d, e)`; the
    /// two-character suffix counts seeding every interval.
    pair2: [[u64; BASES]; BASES],
    read_len: u8,
    seq_count: u32,
}

impl IndexReader {
    /// Loads the finished index under `files`.
    ///
    /// Fails if construction has not run to completion or if the chunk was
    /// written by a different session than the packed reads.
    pub fn new(files: &IndexFiles) -> Result<Self> {
        let header = BinHeader::from_path(&files.bin())?;
        let total = header.read_len + 1;
        if header.cycle != total {
            return Err(ReadError::IncompleteIndex {
                done: header.cycle,
                total,
            }
            .into());
        }
        let parity = Transform::final_parity(header.read_len);
        let mut bwt = files.reader(&files.bwt(parity))?;
        let chunk = ChunkHeader::from_reader(&mut bwt)?;
        chunk.check_session(header.session_id)?;

        let mut runs = Vec::new();
        let mut marks = Vec::new();
        let mut pos = 0u64;
        let mut occ = [0u64; 5];
        let mut body = RunReader::new(bwt, chunk.bwt_count);
        while let Some((sym, len)) = body.next_run()? {
            if runs.len() % MARK_RUNS == 0 {
                marks.push(Mark { pos, occ });
            }
            runs.push(Run { sym, len });
            occ[sym as usize] += len;
            pos += len;
        }
        debug_assert_eq!(pos, chunk.bwt_count);

        let mut c_base = [0u64; 4];
        for s in 1..BASES {
            c_base[s] = c_base[s - 1] + chunk.char_counts[s - 1];
        }
        let raw_pairs = last_pair_counts(files)?;
        let mut pair2 = [[0u64; BASES]; BASES];
        for d in 0..BASES {
            for e in 0..BASES {
                pair2[d][e] = u64::from(raw_pairs[d][e]);
            }
        }

        Ok(Self {
            runs,
            marks,
            c_base,
            char_counts: chunk.char_counts,
            pair2,
            read_len: header.read_len,
            seq_count: header.seq_count,
        })
    }

    #[must_use]
    pub fn read_len(&self) -> u8 {
        self.read_len
    }

    #[must_use]
    pub fn seq_count(&self) -> u32 {
        self.seq_count
    }

    /// Cumulative symbol occurrences ahead of `pos`.
    fn occ_at(&self, pos: u64) -> [u64; 5] {
        let idx = self.marks.partition_point(|m| m.pos <= pos);
        let mark = self.marks[idx - 1];
        let mut occ = mark.occ;
        let mut at = mark.pos;
        let mut run = (idx - 1) * MARK_RUNS;
        while at < pos {
            let r = self.runs[run];
            let take = r.len.min(pos - at);
            occ[r.sym as usize] += take;
            at += take;
            run += 1;
        }
        occ
    }

    /// The interval of suffixes beginning `c1 c0`, where `c0` is the first
    /// query character processed and `c1` the second.
    ///
    /// Seeds cover the two-base suffixes themselves, so the bucket totals
    /// below `c0` join the rank and the `(c0, c1)` total joins the count.
    #[must_use]
    pub fn set_base_all(&self, c0: u8, c1: u8) -> (u64, u64) {
        let (c0, c1) = (c0 as usize, c1 as usize);
        let region = self.c_base[c0];
        let lo = self.occ_at(region)[c1];
        let hi = self.occ_at(region + self.char_counts[c0])[c1];
        let short: u64 = (0..c0).map(|d| self.pair2[d][c1]).sum();
        let rank = self.c_base[c1] + short + lo;
        let count = self.pair2[c0][c1] + (hi - lo);
        (rank, count)
    }

    /// One LF extension step from the interval `[rank, rank + count)` whose
    /// suffixes currently begin with `c`.
    ///
    /// For every symbol `s`, `counts[s]` is its occurrence count inside the
    /// range and `ranks[s]` the start of the interval extended by `s` on
    /// the left. The end channel reports reads terminating here; its rank
    /// indexes the end-id list.
    pub fn count_range(
        &self,
        c: u8,
        rank: u64,
        count: u64,
        ranks: &mut CharCount,
        counts: &mut CharCount,
    ) {
        let lo = self.occ_at(rank);
        let hi = self.occ_at(rank + count);
        for s in 0..BASES {
            let short: u64 = (0..=c as usize).map(|d| self.pair2[d][s]).sum();
            ranks.counts[s] = self.c_base[s] + short + lo[s];
            counts.counts[s] = hi[s] - lo[s];
        }
        ranks.ends = lo[4];
        counts.ends = hi[4] - lo[4];
        debug_assert_eq!(counts.total(), count);
    }
}

#[cfg(test)]
mod testing {
    use super::*;
    use crate::alphabet;
    use crate::transform::build_test_index;

    #[test]
    fn test_two_read_interval_walk() {
        let dir = tempfile::tempdir().unwrap();
        let files = build_test_index(dir.path(), &["ACGT", "ACGG"], false);
        let ir = IndexReader::new(&files).unwrap();

        // Suffixes beginning GT: exactly one, from ACGT.
        let (rank, count) = ir.set_base_all(3, 2);
        assert_eq!((rank, count), (5, 1));

        let mut ranks = CharCount::default();
        let mut counts = CharCount::default();
        ir.count_range(2, rank, count, &mut ranks, &mut counts);
        assert_eq!(counts.counts, [0, 1, 0, 0]);
        assert_eq!(counts.ends, 0);

        ir.count_range(1, ranks[1], counts[1], &mut ranks, &mut counts);
        assert_eq!(counts.counts, [1, 0, 0, 0]);

        ir.count_range(0, ranks[0], counts[0], &mut ranks, &mut counts);
        assert_eq!(counts.ends, 1);
        assert_eq!(ranks.ends, 1);
    }

    #[test]
    fn test_kgram_counts_match_brute_force() {
        let reads = ["ACGTACGTAA", "CCGTTAGGCA", "GACCGTTAGA", "TTACGTACGT"];
        let dir = tempfile::tempdir().unwrap();
        let files = build_test_index(dir.path(), &reads, false);
        let ir = IndexReader::new(&files).unwrap();

        let brute = |pat: &[u8]| -> u64 {
            let mut n = 0;
            for read in &reads {
                let codes = alphabet::encode(read.as_bytes()).unwrap();
                for start in 0..codes.len().saturating_sub(1) {
                    let suffix = &codes[start..];
                    if suffix.len() >= pat.len() && &suffix[..pat.len()] == pat {
                        n += 1;
                    }
                }
            }
            n
        };

        for pat_str in ["CG", "GT", "ACG", "CGTT", "TACGT", "GACC"] {
            let pat = alphabet::encode(pat_str.as_bytes()).unwrap();
            // Queries process the pattern back to front.
            let (mut rank, mut count) = ir.set_base_all(pat[pat.len() - 1], pat[pat.len() - 2]);
            let mut at = pat.len() - 2;
            while at > 0 && count > 0 {
                at -= 1;
                let mut ranks = CharCount::default();
                let mut counts = CharCount::default();
                ir.count_range(pat[at + 1], rank, count, &mut ranks, &mut counts);
                rank = ranks[pat[at] as usize];
                count = counts[pat[at] as usize];
            }
            assert_eq!(count, brute(&pat), "pattern {pat_str}");
        }
    }

    #[test]
    fn test_count_range_partitions_interval() {
        let reads = ["ACGTACGTAA", "CCGTTAGGCA", "GACCGTTAGA"];
        let dir = tempfile::tempdir().unwrap();
        let files = build_test_index(dir.path(), &reads, true);
        let ir = IndexReader::new(&files).unwrap();
        for c0 in 0..4u8 {
            for c1 in 0..4u8 {
                let (rank, count) = ir.set_base_all(c0, c1);
                if count == 0 {
                    continue;
                }
                let mut ranks = CharCount::default();
                let mut counts = CharCount::default();
                ir.count_range(c1, rank, count, &mut ranks, &mut counts);
                assert_eq!(counts.total(), count);
            }
        }
    }

    #[test]
    fn test_incomplete_index_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let files = crate::layout::IndexFiles::new(dir.path().join("idx"));
        let mut writer = crate::store::StoreWriter::open(files.clone(), 0, 6, false).unwrap();
        writer.write("ACGTAC").unwrap();
        writer.close().unwrap();
        assert!(matches!(
            IndexReader::new(&files).unwrap_err(),
            crate::Error::Read(ReadError::IncompleteIndex { .. })
        ));
    }

    #[test]
    fn test_max_branch() {
        let mut count = CharCount::default();
        assert_eq!(count.max_branch(), 4);
        count.counts = [3, 0, 1, 0];
        assert_eq!(count.max_branch(), 0);
        assert_eq!(count.branch_count(), 2);
        count.counts = [3, 3, 0, 0];
        assert_eq!(count.max_branch(), 4);
    }
}
