//! Sequential reader over the packed read store.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};

use crate::alphabet::{self, BASES};
use crate::error::{ReadError, Result};
use crate::layout::IndexFiles;
use crate::store::header::BinHeader;

/// Streams packed read records in id order.
///
/// Each record yields its actual length and packed bases; reverse-complement
/// strands are not materialized here, callers mirror them per record.
pub struct StoreReader {
    bin: BufReader<File>,
    header: BinHeader,
    line: Vec<u8>,
    next: u32,
}

impl StoreReader {
    /// Opens the store and positions the cursor at the first record.
    pub fn open(files: &IndexFiles) -> Result<Self> {
        let mut bin = files.reader(&files.bin())?;
        let header = BinHeader::from_reader(&mut bin)?;
        bin.seek(SeekFrom::Start(u64::from(header.seqs_begin)))?;
        let line = vec![0u8; header.line_len()];
        Ok(Self {
            bin,
            header,
            line,
            next: 0,
        })
    }

    /// The parsed store header.
    #[must_use]
    pub fn header(&self) -> &BinHeader {
        &self.header
    }

    /// Number of records on disk (forward strands only).
    #[must_use]
    pub fn record_count(&self) -> u32 {
        self.header.seq_count / (1 + u32::from(self.header.revcomp))
    }

    /// Decodes the next record into `codes`, returning `false` at the end.
    pub fn next_record(&mut self, codes: &mut Vec<u8>) -> Result<bool> {
        if self.next == self.record_count() {
            return Ok(false);
        }
        self.bin
            .read_exact(&mut self.line)
            .map_err(|_| ReadError::TruncatedRecord(self.next))?;
        let len = self.line[0] as usize;
        codes.clear();
        codes.extend((0..len).map(|j| alphabet::unpack(self.line[1 + j / 4], j)));
        self.next += 1;
        Ok(true)
    }
}

/// Tallies the (last base, second-last base) pairs of every indexed strand.
///
/// `counts[i][j]` is the number of strands ending `... j i`; these are the
/// initial bucket occupancies and the two-character seed table of the
/// FM-index reader.
pub fn last_pair_counts(files: &IndexFiles) -> Result<[[u32; BASES]; BASES]> {
    let mut reader = StoreReader::open(files)?;
    let revcomp = reader.header().revcomp;
    let mut counts = [[0u32; BASES]; BASES];
    let mut codes = Vec::new();
    while reader.next_record(&mut codes)? {
        let len = codes.len();
        counts[codes[len - 1] as usize][codes[len - 2] as usize] += 1;
        if revcomp {
            // The mirrored strand ends with the complements of the first
            // two forward bases.
            counts[alphabet::comp(codes[0]) as usize][alphabet::comp(codes[1]) as usize] += 1;
        }
    }
    Ok(counts)
}
