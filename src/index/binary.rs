//! Random access from suffix-array ranks to read ids and from ids to
//! sequences.
//!
//! Both the packed read store and the finished end-id list are memory
//! mapped; translating a hit into reads costs one slice cast and one
//! record decode per id.

use bytemuck::cast_slice;
use memmap2::Mmap;

use crate::alphabet;
use crate::error::{ReadError, Result};
use crate::layout::IndexFiles;
use crate::store::BinHeader;
use crate::transform::Transform;
use crate::ReadId;

/// Mapped views over the read store and the end-id list.
pub struct QueryBinaries {
    bin: Mmap,
    ends: Mmap,
    seqs_begin: usize,
    line_len: usize,
    revcomp: bool,
    seq_count: u32,
}

impl QueryBinaries {
    /// Maps the finished index under `files`.
    pub fn new(files: &IndexFiles) -> Result<Self> {
        let header = BinHeader::from_path(&files.bin())?;
        if header.cycle != header.read_len + 1 {
            return Err(ReadError::IncompleteIndex {
                done: header.cycle,
                total: header.read_len + 1,
            }
            .into());
        }
        let parity = Transform::final_parity(header.read_len);
        let bin = unsafe { Mmap::map(&std::fs::File::open(files.bin())?)? };
        let ends = unsafe { Mmap::map(&std::fs::File::open(files.end(parity))?)? };
        Ok(Self {
            bin,
            ends,
            seqs_begin: header.seqs_begin as usize,
            line_len: header.line_len(),
            revcomp: header.revcomp,
            seq_count: header.seq_count,
        })
    }

    /// Fetches `count` consecutive read ids from the end-id list starting
    /// at `rank`.
    #[must_use]
    pub fn get_ids(&self, rank: u64, count: u64) -> Vec<ReadId> {
        let lo = 4 + rank as usize * 4;
        let hi = lo + count as usize * 4;
        cast_slice::<u8, u32>(&self.ends[lo..hi]).to_vec()
    }

    /// Recovers the uppercase sequence of one strand id.
    ///
    /// Odd ids under reverse-complement indexing decode as the reverse
    /// complement of their stored mate.
    #[must_use]
    pub fn get_sequence(&self, id: ReadId) -> String {
        assert!(id < self.seq_count, "read id out of range");
        let record = if self.revcomp { id >> 1 } else { id } as usize;
        let off = self.seqs_begin + record * self.line_len;
        let len = self.bin[off] as usize;
        let packed = &self.bin[off + 1..off + 1 + len.div_ceil(4)];
        let codes: Vec<u8> = (0..len)
            .map(|j| alphabet::unpack(packed[j / 4], j))
            .collect();
        if self.revcomp && id & 1 == 1 {
            alphabet::decode(&alphabet::revcomp(&codes))
        } else {
            alphabet::decode(&codes)
        }
    }
}

#[cfg(test)]
mod testing {
    use super::*;
    use crate::transform::build_test_index;

    #[test]
    fn test_sequence_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let reads = ["ACGTACGT", "TTGACCAG", "CGCGA"];
        let files = build_test_index(dir.path(), &reads, false);
        let qb = QueryBinaries::new(&files).unwrap();
        for (id, read) in reads.iter().enumerate() {
            assert_eq!(qb.get_sequence(id as ReadId), *read);
        }
    }

    #[test]
    fn test_odd_ids_reverse_complement() {
        let dir = tempfile::tempdir().unwrap();
        let files = build_test_index(dir.path(), &["AACG"], true);
        let qb = QueryBinaries::new(&files).unwrap();
        assert_eq!(qb.get_sequence(0), "AACG");
        assert_eq!(qb.get_sequence(1), "CGTT");
    }

    #[test]
    fn test_end_ids() {
        let dir = tempfile::tempdir().unwrap();
        let files = build_test_index(dir.path(), &["ACGT", "ACGG"], false);
        let qb = QueryBinaries::new(&files).unwrap();
        // ACGG sorts ahead of ACGT in the end-marker order.
        assert_eq!(qb.get_ids(0, 2), vec![1, 0]);
    }
}
