//! On-disk layout of an index under its output prefix.
//!
//! Every file of one index lives in the directory named by the prefix:
//! the packed read store `bin`, the column cache `tmpChr`, the trim table
//! `tmpTrm`, and the per-cycle double-buffered BWT chunks, end-id lists,
//! insertion counter files and id buckets. Construction reads the parity
//! `(k-1) % 2` slot and writes the `k % 2` slot of each buffered family.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use crate::error::Result;

const BASE_NAMES: [char; 4] = ['A', 'C', 'G', 'T'];

/// Path factory for the files of one index.
#[derive(Debug, Clone)]
pub struct IndexFiles {
    prefix: PathBuf,
}

impl IndexFiles {
    /// Binds the layout to an output prefix directory without touching disk.
    #[must_use]
    pub fn new<P: AsRef<Path>>(prefix: P) -> Self {
        Self {
            prefix: prefix.as_ref().to_path_buf(),
        }
    }

    /// Creates the prefix directory if it does not yet exist.
    pub fn prepare(&self) -> Result<()> {
        std::fs::create_dir_all(&self.prefix)?;
        Ok(())
    }

    /// The packed read store.
    #[must_use]
    pub fn bin(&self) -> PathBuf {
        self.prefix.join("bin")
    }

    /// The column cache holding one packed base column per cycle `k >= 3`.
    #[must_use]
    pub fn chr(&self) -> PathBuf {
        self.prefix.join("tmpChr")
    }

    /// The trim table of short-read lengths and ids.
    #[must_use]
    pub fn trm(&self) -> PathBuf {
        self.prefix.join("tmpTrm")
    }

    /// The BWT chunk for parity `p`.
    #[must_use]
    pub fn bwt(&self, p: u8) -> PathBuf {
        self.prefix.join(format!("tmpBwt{p}"))
    }

    /// The end-marker id list for parity `p`.
    #[must_use]
    pub fn end(&self, p: u8) -> PathBuf {
        self.prefix.join(format!("tmpEnd{p}"))
    }

    /// The insertion counter file for parity `p` and region base `c`.
    #[must_use]
    pub fn ins(&self, p: u8, c: u8) -> PathBuf {
        self.prefix
            .join(format!("tmpIns{p}{}", BASE_NAMES[c as usize]))
    }

    /// The id bucket for parity `p` and base pair `(i, j)`.
    #[must_use]
    pub fn ids(&self, p: u8, i: u8, j: u8) -> PathBuf {
        self.prefix.join(format!(
            "tmpIds{p}{}{}",
            BASE_NAMES[i as usize], BASE_NAMES[j as usize]
        ))
    }

    /// Opens one of the layout's files for buffered reading.
    pub fn reader(&self, path: &Path) -> Result<BufReader<File>> {
        Ok(BufReader::new(File::open(path)?))
    }

    /// Opens one of the layout's files for buffered writing, truncating it.
    pub fn writer(&self, path: &Path) -> Result<BufWriter<File>> {
        Ok(BufWriter::new(File::create(path)?))
    }

    /// Opens one of the layout's files for in-place updates.
    pub fn updater(&self, path: &Path) -> Result<File> {
        Ok(File::options().read(true).write(true).open(path)?)
    }
}

#[cfg(test)]
mod testing {
    use super::*;

    #[test]
    fn test_names() {
        let fns = IndexFiles::new("/tmp/x");
        assert!(fns.bin().ends_with("bin"));
        assert!(fns.bwt(1).ends_with("tmpBwt1"));
        assert!(fns.ins(0, 2).ends_with("tmpIns0G"));
        assert!(fns.ids(1, 3, 0).ends_with("tmpIds1TA"));
    }
}
