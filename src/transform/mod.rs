//! The incremental BWT constructor.
//!
//! Construction is a straight-line, single-threaded program: one
//! initialization pass over the packed reads, then one merge cycle per
//! remaining read column. Cycle `k` must fully complete before cycle
//! `k + 1` begins; the `cycle` byte in the packed read header is patched
//! only after a cycle's outputs are all on disk, and doubles as the resume
//! point and crash-safety commit marker. The finished index is the chunk of
//! the last cycle's parity slot.

mod chunk;
mod cycler;
mod init;

pub use chunk::{ChunkHeader, RunReader, RunWriter, CHUNK_HEADER};
pub use cycler::{CycleStats, EndsBitset};

use std::io::{Read, Seek, SeekFrom};

use byteorder::{LittleEndian, ReadBytesExt};
use tracing::info;

use crate::error::{ReadError, Result};
use crate::layout::IndexFiles;
use crate::store::{self, last_pair_counts, BinHeader};
use crate::ReadId;

/// Driver for the construction pipeline.
pub struct Transform;

impl Transform {
    /// Packs every manifest library into a fresh store under `files`.
    ///
    /// Two passes: the first finds the longest read and validates the
    /// library files, the second writes the records. The store is then
    /// ready for [`Transform::run`].
    pub fn load(
        files: &IndexFiles,
        libs: &[crate::input::LibSpec],
        min_score: u32,
        revcomp: bool,
    ) -> Result<()> {
        let (max_len, total) = crate::input::scan_libraries(libs, min_score)?;
        if total == 0 {
            return Err(crate::error::WriteError::Empty.into());
        }
        // The cycle commit byte must reach read_len + 1.
        if max_len > 254 {
            return Err(crate::error::WriteError::TooLong {
                read: 0,
                len: max_len,
                max: 254,
            }
            .into());
        }
        info!(reads = total, read_len = max_len, "scanned input libraries");

        let mut writer =
            crate::store::StoreWriter::open(files.clone(), libs.len() as u8, max_len as u8, revcomp)?;
        for lib in libs {
            writer.begin_library(lib.paired);
            crate::input::stream_library(lib, min_score, |read| writer.write(read))?;
            writer.end_library();
        }
        writer.close()?;
        Ok(())
    }

    /// Runs every remaining cycle, from a fresh store or a `--resume`.
    pub fn run(files: &IndexFiles) -> Result<()> {
        let header = BinHeader::from_path(&files.bin())?;
        if header.cycle == 0 && header.seq_count == 0 {
            return Err(ReadError::NothingToResume.into());
        }
        let read_len = header.read_len as usize;
        if header.cycle as usize >= read_len + 1 {
            return Err(ReadError::AlreadyComplete.into());
        }

        let (mut chars2, pair_counts) = if header.cycle == 0 {
            let state = init::run(files, &header)?;
            info!(seqs = header.seq_count, "initialized transform state");
            (Some(state.chars), state.pair_counts)
        } else {
            let chars = (header.cycle == 1).then(|| init::reload_chars(files, &header)).transpose()?;
            (chars, last_pair_counts(files)?)
        };

        let trim = TrimTable::open(files)?;
        let char_size = (header.seq_count as usize + 3) / 4;
        let first = (header.cycle.max(1) as usize) + 1;
        let mut column = Vec::new();

        for k in first..=read_len {
            let chars = if k == read_len {
                None
            } else if k == 2 {
                chars2.as_deref()
            } else {
                column = load_column(files, k, char_size)?;
                Some(column.as_slice())
            };
            let ends = if k == read_len {
                EndsBitset::everyone()
            } else {
                EndsBitset::new(header.seq_count, &trim.ids_with_len(files, k)?)
            };
            let start = std::time::Instant::now();
            let stats = cycler::run_cycle(
                files,
                header.session_id,
                k,
                read_len,
                &pair_counts,
                chars,
                &ends,
            )?;
            store::patch_cycle(&files.bin(), k as u8)?;
            if k > 2 {
                chars2 = None;
            }
            info!(
                cycle = k,
                of = read_len,
                inserted = stats.inserted,
                ended = stats.ended,
                bwt = stats.bwt_count,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "cycle complete"
            );
        }

        store::patch_cycle(&files.bin(), (read_len + 1) as u8)?;
        info!("transform complete");
        Ok(())
    }

    /// The parity slot holding the finished index for a given read length.
    #[must_use]
    pub fn final_parity(read_len: u8) -> u8 {
        read_len & 1
    }
}

/// Loads the packed base column for cycle `k` from the column cache.
fn load_column(files: &IndexFiles, k: usize, char_size: usize) -> Result<Vec<u8>> {
    let mut chr = std::fs::File::open(files.chr())?;
    chr.seek(SeekFrom::Start(((k - 3) * char_size) as u64))?;
    let mut column = vec![0u8; char_size];
    chr.read_exact(&mut column)?;
    Ok(column)
}

/// Parsed header of the trim table, with per-length id list offsets.
struct TrimTable {
    trim_begin: u16,
    min_len: usize,
    counts: Vec<u32>,
}

impl TrimTable {
    fn open(files: &IndexFiles) -> Result<Self> {
        let mut trm = files.reader(&files.trm())?;
        let trim_begin = trm.read_u16::<LittleEndian>()?;
        let min_len = trm.read_u8()? as usize;
        let lengths = (trim_begin as usize - 3) / 4;
        let mut counts = Vec::with_capacity(lengths);
        for _ in 0..lengths {
            counts.push(trm.read_u32::<LittleEndian>()?);
        }
        Ok(Self {
            trim_begin,
            min_len,
            counts,
        })
    }

    /// Ids of reads whose length is exactly `len`; empty outside the
    /// trimmed range.
    fn ids_with_len(&self, files: &IndexFiles, len: usize) -> Result<Vec<ReadId>> {
        if len < self.min_len || len - self.min_len >= self.counts.len() {
            return Ok(Vec::new());
        }
        let slot = len - self.min_len;
        let skip: u64 = self.counts[..slot].iter().map(|&c| u64::from(c) * 4).sum();
        let mut trm = std::fs::File::open(files.trm())?;
        trm.seek(SeekFrom::Start(u64::from(self.trim_begin) + skip))?;
        let mut ids = Vec::with_capacity(self.counts[slot] as usize);
        for _ in 0..self.counts[slot] {
            ids.push(trm.read_u32::<LittleEndian>()?);
        }
        Ok(ids)
    }
}

#[cfg(test)]
pub(crate) fn build_test_index(dir: &std::path::Path, reads: &[&str], revcomp: bool) -> IndexFiles {
    let files = IndexFiles::new(dir.join("idx"));
    let read_len = reads.iter().map(|r| r.len()).max().unwrap() as u8;
    let mut writer = crate::store::StoreWriter::open(files.clone(), 0, read_len, revcomp).unwrap();
    for read in reads {
        writer.write(read).unwrap();
    }
    writer.close().unwrap();
    Transform::run(&files).unwrap();
    files
}

#[cfg(test)]
mod testing {
    use super::*;
    use crate::alphabet::{self, END};

    /// Decodes a finished index's BWT body into one symbol per position.
    fn decode_body(files: &IndexFiles) -> (ChunkHeader, Vec<u8>) {
        let header = BinHeader::from_path(&files.bin()).unwrap();
        let parity = Transform::final_parity(header.read_len);
        let mut bwt = files.reader(&files.bwt(parity)).unwrap();
        let chunk = ChunkHeader::from_reader(&mut bwt).unwrap();
        let mut body = Vec::new();
        let mut runs = RunReader::new(bwt, chunk.bwt_count);
        while let Some((sym, len)) = runs.next_run().unwrap() {
            body.extend(std::iter::repeat_n(sym, len as usize));
        }
        (chunk, body)
    }

    /// Reads the finished end-id list.
    fn decode_ends(files: &IndexFiles) -> Vec<ReadId> {
        let header = BinHeader::from_path(&files.bin()).unwrap();
        let parity = Transform::final_parity(header.read_len);
        let mut fp = files.reader(&files.end(parity)).unwrap();
        let count = fp.read_u32::<LittleEndian>().unwrap();
        (0..count)
            .map(|_| fp.read_u32::<LittleEndian>().unwrap())
            .collect()
    }

    /// Brute-force BWT over every strand: all suffixes of length >= 2,
    /// sorted with the implicit terminator ahead of any base and ties
    /// broken by strand id, each contributing its preceding symbol.
    fn reference_bwt(reads: &[&str], revcomp: bool) -> (Vec<u8>, Vec<ReadId>) {
        let mut strands: Vec<Vec<u8>> = Vec::new();
        for read in reads {
            let codes = alphabet::encode(read.as_bytes()).unwrap();
            strands.push(codes.clone());
            if revcomp {
                strands.push(alphabet::revcomp(&codes));
            }
        }
        let mut suffixes: Vec<(&[u8], u32, usize)> = Vec::new();
        for (id, codes) in strands.iter().enumerate() {
            for start in 0..=codes.len() - 2 {
                suffixes.push((&codes[start..], id as u32, start));
            }
        }
        suffixes.sort_by(|a, b| a.0.cmp(b.0).then(a.1.cmp(&b.1)));
        let mut body = Vec::new();
        let mut ends = Vec::new();
        for (_, id, start) in suffixes {
            if start == 0 {
                body.push(END);
                ends.push(id);
            } else {
                body.push(strands[id as usize][start - 1]);
            }
        }
        (body, ends)
    }

    fn check_against_reference(reads: &[&str], revcomp: bool) {
        let dir = tempfile::tempdir().unwrap();
        let files = build_test_index(dir.path(), reads, revcomp);
        let (chunk, body) = decode_body(&files);
        let (expected_body, expected_ends) = reference_bwt(reads, revcomp);
        assert_eq!(body, expected_body);
        assert_eq!(decode_ends(&files), expected_ends);
        assert_eq!(chunk.bwt_count as usize, expected_body.len());
        assert_eq!(
            chunk.char_counts[4] as usize,
            expected_body.iter().filter(|&&s| s == END).count()
        );
    }

    #[test]
    fn test_two_read_index() {
        // Final BWT of {ACGT, ACGG}: two end markers ahead of four bases.
        let dir = tempfile::tempdir().unwrap();
        let files = build_test_index(dir.path(), &["ACGT", "ACGG"], false);
        let (chunk, body) = decode_body(&files);
        assert_eq!(body, vec![END, END, 0, 0, 1, 1]);
        assert_eq!(decode_ends(&files), vec![1, 0]);
        assert_eq!(chunk.char_counts, [2, 2, 2, 0, 2]);
        let bases = body.iter().filter(|&&s| s != END).count();
        assert_eq!(bases, 4);
        assert_eq!(BinHeader::from_path(&files.bin()).unwrap().cycle, 5);
    }

    #[test]
    fn test_matches_reference_small() {
        check_against_reference(&["ACGT", "ACGG"], false);
        check_against_reference(&["ACGTACGT", "TTGACCAG", "ACGTACGT"], false);
        check_against_reference(&["AAAAAA", "AAAAAA"], false);
    }

    #[test]
    fn test_matches_reference_revcomp() {
        check_against_reference(&["ACGTAC", "GGTACC"], true);
        check_against_reference(&["ACGTACGTAA", "CCGTTAGGCA", "TTTTTTTTTT"], true);
    }

    #[test]
    fn test_matches_reference_mixed_lengths() {
        check_against_reference(&["ACGTACGT", "TTGAC", "CCG", "ACGTACG"], false);
        check_against_reference(&["ACGTACGT", "TTGAC", "CCG"], true);
        // A two-base read terminates on the very first merge cycle.
        check_against_reference(&["ACGTAC", "GT", "TTGACC"], false);
    }

    #[test]
    fn test_matches_reference_random() {
        use nucgen::Sequence;
        use rand::{rngs::SmallRng, Rng, SeedableRng};
        let mut rng = SmallRng::seed_from_u64(11);
        let mut sequence = Sequence::new();
        for trial in 0..4 {
            let revcomp = trial % 2 == 0;
            let mut reads = Vec::new();
            for _ in 0..40 {
                let len = rng.random_range(6..=20);
                sequence.fill_buffer(&mut rng, len);
                reads.push(String::from_utf8(sequence.bytes().to_vec()).unwrap());
            }
            let refs: Vec<&str> = reads.iter().map(String::as_str).collect();
            check_against_reference(&refs, revcomp);
        }
    }

    #[test]
    fn test_deterministic_up_to_session() {
        let reads = ["ACGTACGT", "TTGACCAG", "GGGTTTAA"];
        let dirs = [tempfile::tempdir().unwrap(), tempfile::tempdir().unwrap()];
        let built: Vec<_> = dirs
            .iter()
            .map(|dir| build_test_index(dir.path(), &reads, true))
            .collect();
        let parity = Transform::final_parity(8);
        let bodies: Vec<Vec<u8>> = built
            .iter()
            .map(|files| std::fs::read(files.bwt(parity)).unwrap())
            .collect();
        // Identical apart from the random session id in the first 8 bytes.
        assert_eq!(&bodies[0][8..], &bodies[1][8..]);
    }

    #[test]
    fn test_resume_after_complete() {
        let dir = tempfile::tempdir().unwrap();
        let files = build_test_index(dir.path(), &["ACGT", "ACGG"], false);
        let err = Transform::run(&files).unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Read(ReadError::AlreadyComplete)
        ));
    }

    #[test]
    fn test_resume_mid_transform() {
        // Initialize only, then resume the merge cycles separately.
        let dir = tempfile::tempdir().unwrap();
        let files = IndexFiles::new(dir.path().join("idx"));
        let mut writer = crate::store::StoreWriter::open(files.clone(), 0, 6, false).unwrap();
        for read in ["ACGTAC", "TTGACC", "CGCG"] {
            writer.write(read).unwrap();
        }
        let header = writer.close().unwrap();
        super::init::run(&files, &header).unwrap();
        assert_eq!(BinHeader::from_path(&files.bin()).unwrap().cycle, 1);

        Transform::run(&files).unwrap();
        let (_, body) = decode_body(&files);
        let (expected, _) = reference_bwt(&["ACGTAC", "TTGACC", "CGCG"], false);
        assert_eq!(body, expected);
    }
}
