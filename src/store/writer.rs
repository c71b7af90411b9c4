//! Writer half of the packed read store.
//!
//! Reads arrive as validated uppercase strings, get packed four bases per
//! byte behind a length byte, and are tallied into per-cycle bigram tables.
//! On close the writer back-fills the header counts, emits the trim table
//! of short-read ids and pre-sizes the bucket and insertion files that the
//! BWT constructor will rewrite cycle by cycle.

use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};

use byteorder::{LittleEndian, WriteBytesExt};
use rand::Rng;

use crate::alphabet::{self, BASES};
use crate::error::{Result, WriteError};
use crate::layout::IndexFiles;
use crate::store::header::{self, BinHeader};
use crate::ReadId;

/// Streaming writer for the packed read store.
pub struct StoreWriter {
    files: IndexFiles,
    bin: BufWriter<File>,
    header: BinHeader,
    /// Records written so far; the strand-doubled total is derived on close.
    rec_count: u32,
    lib_begin: u32,
    cur_lib: Option<usize>,
    /// Ids of short reads grouped by their actual length.
    short_ids: Vec<Vec<ReadId>>,
    min_len: usize,
    /// `place_counts[i][j][k]`: reads whose bases `k` and `k+1` from the
    /// right end are `(i, j)`, both strands included. Column `k` of this
    /// table is the exact occupancy of bucket `(i, j)` during cycle `k`,
    /// which drives the pre-sizing on close.
    place_counts: [[Vec<u32>; BASES]; BASES],
    line: Vec<u8>,
}

impl StoreWriter {
    /// Opens a new store under `prefix` and writes its placeholder header.
    pub fn open(files: IndexFiles, lib_count: u8, read_len: u8, revcomp: bool) -> Result<Self> {
        files.prepare()?;
        let session_id: u64 = rand::rng().random();
        let header = BinHeader::new(session_id, read_len, revcomp, lib_count);
        let mut bin = files.writer(&files.bin())?;
        header.write_to(&mut bin)?;

        let place_counts =
            std::array::from_fn(|_| std::array::from_fn(|_| vec![0u32; read_len as usize]));
        let line_len = header.line_len();
        Ok(Self {
            files,
            bin,
            header,
            rec_count: 0,
            lib_begin: 0,
            cur_lib: None,
            short_ids: vec![Vec::new(); read_len as usize],
            min_len: read_len as usize,
            place_counts,
            line: vec![0u8; line_len],
        })
    }

    /// Marks the start of the next input library.
    pub fn begin_library(&mut self, paired: bool) {
        let lib = match self.cur_lib {
            Some(lib) => lib + 1,
            None => 0,
        };
        assert!(lib < self.header.libs.len(), "library overflow");
        self.cur_lib = Some(lib);
        self.lib_begin = self.rec_count;
        self.header.libs[lib].flags = [u8::from(paired), 0];
    }

    /// Closes the current library, recording its share of the read count.
    pub fn end_library(&mut self) {
        let lib = self.cur_lib.expect("end_library outside a library");
        self.header.libs[lib].count = (self.rec_count - self.lib_begin) * self.strands();
    }

    /// Packs one read into the store.
    pub fn write(&mut self, read: &str) -> Result<()> {
        if self.cur_lib.is_none() && !self.header.libs.is_empty() {
            return Err(WriteError::NoLibrary.into());
        }
        let len = read.len();
        if len > self.header.read_len as usize {
            return Err(WriteError::TooLong {
                read: self.rec_count,
                len,
                max: self.header.read_len,
            }
            .into());
        }
        if len < 2 {
            return Err(WriteError::TooShort {
                read: self.rec_count,
                len,
            }
            .into());
        }
        let codes = alphabet::encode(read.as_bytes()).map_err(|base| WriteError::InvalidBase {
            base: base as char,
            read: self.rec_count,
        })?;

        self.line.fill(0);
        self.line[0] = len as u8;
        for (j, &c) in codes.iter().enumerate() {
            self.line[1 + j / 4] |= alphabet::pack(c, j);
        }
        self.bin.write_all(&self.line)?;

        self.tally(&codes);
        if self.header.revcomp {
            self.tally(&alphabet::revcomp(&codes));
        }
        if len < self.header.read_len as usize {
            let strands = self.strands();
            let id = self.rec_count * strands;
            for s in 0..strands {
                self.short_ids[len].push(id + s);
            }
            self.min_len = self.min_len.min(len);
        }
        self.rec_count += 1;
        Ok(())
    }

    /// Finalizes the store: header counts, trim table, file pre-sizing.
    pub fn close(mut self) -> Result<BinHeader> {
        if self.rec_count == 0 {
            return Err(WriteError::Empty.into());
        }
        if let Some(lib) = self.cur_lib {
            if self.header.libs[lib].count == 0 {
                self.end_library();
            }
        }
        self.bin.flush()?;

        self.header.seq_count = self.rec_count * self.strands();
        let lib_counts: Vec<u32> = self.header.libs.iter().map(|l| l.count).collect();
        header::patch_counts(&self.files.bin(), self.header.seq_count, &lib_counts)?;

        self.write_trim()?;
        self.presize_buckets()?;
        self.presize_inserts()?;
        Ok(self.header.clone())
    }

    fn strands(&self) -> u32 {
        1 + u32::from(self.header.revcomp)
    }

    /// Tallies the per-cycle bigram occupancies of one strand.
    fn tally(&mut self, codes: &[u8]) {
        let len = codes.len();
        for k in 1..len {
            let i = codes[len - k] as usize;
            let j = codes[len - 1 - k] as usize;
            self.place_counts[i][j][k] += 1;
        }
    }

    /// Writes the trim table: `trim_begin: u16`, `min_read_len: u8`, one
    /// count per length in `[min_read_len, read_len)`, then the id lists.
    ///
    /// When every read has the full length the table is explicitly empty:
    /// `min_read_len == read_len` and no cycle ever consults it.
    fn write_trim(&self) -> Result<()> {
        let read_len = self.header.read_len as usize;
        let lengths = read_len - self.min_len;
        let mut trm = self.files.writer(&self.files.trm())?;
        trm.write_u16::<LittleEndian>((3 + 4 * lengths) as u16)?;
        trm.write_u8(self.min_len as u8)?;
        for len in self.min_len..read_len {
            trm.write_u32::<LittleEndian>(self.short_ids[len].len() as u32)?;
        }
        for len in self.min_len..read_len {
            for &id in &self.short_ids[len] {
                trm.write_u32::<LittleEndian>(id)?;
            }
        }
        trm.flush()?;
        Ok(())
    }

    /// Sizes each bucket file for its maximum per-cycle occupancy.
    fn presize_buckets(&self) -> Result<()> {
        for i in 0..BASES as u8 {
            for j in 0..BASES as u8 {
                let limit = *self.place_counts[i as usize][j as usize]
                    .iter()
                    .max()
                    .unwrap_or(&0);
                for p in [0, 1] {
                    let mut fp = self.files.writer(&self.files.ids(p, i, j))?;
                    fp.seek(SeekFrom::Start(u64::from(limit) * 4))?;
                    fp.write_u32::<LittleEndian>(limit)?;
                    fp.flush()?;
                }
            }
        }
        Ok(())
    }

    /// Sizes each insertion file for the largest single-cycle insertion
    /// count into its region.
    fn presize_inserts(&self) -> Result<()> {
        for c in 0..BASES as u8 {
            let mut limit = 0u32;
            for k in 1..self.header.read_len as usize {
                let counted: u32 = (0..BASES)
                    .map(|i| self.place_counts[i][c as usize][k])
                    .sum();
                limit = limit.max(counted);
            }
            for p in [0, 1] {
                let mut fp = self.files.writer(&self.files.ins(p, c))?;
                fp.seek(SeekFrom::Start(u64::from(limit) * 4 + 8))?;
                fp.write_u32::<LittleEndian>(limit)?;
                fp.flush()?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod testing {
    use super::*;
    use byteorder::ReadBytesExt;
    use std::io::Read as _;

    fn open_writer(dir: &std::path::Path, read_len: u8, revcomp: bool) -> StoreWriter {
        let files = IndexFiles::new(dir.join("idx"));
        StoreWriter::open(files, 0, read_len, revcomp).unwrap()
    }

    #[test]
    fn test_records_packed() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut writer = open_writer(dir.path(), 8, false);
        writer.write("ACGTACGT")?;
        writer.write("TTGA")?;
        let header = writer.close()?;
        assert_eq!(header.seq_count, 2);

        let files = IndexFiles::new(dir.path().join("idx"));
        let mut bin = File::open(files.bin())?;
        bin.seek(SeekFrom::Start(u64::from(header.seqs_begin)))?;
        let mut rec = vec![0u8; header.line_len()];
        bin.read_exact(&mut rec)?;
        assert_eq!(rec[0], 8);
        assert_eq!(alphabet::get2(&rec[1..], 0), 0);
        assert_eq!(alphabet::get2(&rec[1..], 3), 3);
        bin.read_exact(&mut rec)?;
        assert_eq!(rec[0], 4);
        assert_eq!(alphabet::get2(&rec[1..], 1), 3);
        assert_eq!(alphabet::get2(&rec[1..], 3), 0);
        Ok(())
    }

    #[test]
    fn test_invalid_base() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = open_writer(dir.path(), 8, false);
        let err = writer.write("ACGNACGT").unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Write(WriteError::InvalidBase { base: 'N', .. })
        ));
    }

    #[test]
    fn test_too_long() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = open_writer(dir.path(), 4, false);
        assert!(writer.write("ACGTA").is_err());
    }

    #[test]
    fn test_trim_table() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut writer = open_writer(dir.path(), 6, false);
        writer.write("ACGTAC")?;
        writer.write("ACGT")?;
        writer.write("TTACG")?;
        writer.close()?;

        let files = IndexFiles::new(dir.path().join("idx"));
        let mut trm = File::open(files.trm())?;
        let trim_begin = trm.read_u16::<LittleEndian>()?;
        let min_len = trm.read_u8()?;
        assert_eq!(min_len, 4);
        assert_eq!(trim_begin, 3 + 4 * 2);
        assert_eq!(trm.read_u32::<LittleEndian>()?, 1); // one read of length 4
        assert_eq!(trm.read_u32::<LittleEndian>()?, 1); // one read of length 5
        assert_eq!(trm.read_u32::<LittleEndian>()?, 1); // id of the length-4 read
        assert_eq!(trm.read_u32::<LittleEndian>()?, 2); // id of the length-5 read
        Ok(())
    }

    #[test]
    fn test_empty_trim_when_uniform() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut writer = open_writer(dir.path(), 4, false);
        writer.write("ACGT")?;
        writer.write("ACGG")?;
        writer.close()?;

        let files = IndexFiles::new(dir.path().join("idx"));
        let mut trm = File::open(files.trm())?;
        assert_eq!(trm.read_u16::<LittleEndian>()?, 3);
        assert_eq!(trm.read_u8()?, 4);
        Ok(())
    }

    #[test]
    fn test_revcomp_doubles_counts() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut writer = open_writer(dir.path(), 4, true);
        writer.write("ACGT")?;
        writer.write("AACC")?;
        let header = writer.close()?;
        assert_eq!(header.seq_count, 4);
        Ok(())
    }
}
