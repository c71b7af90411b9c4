//! Manifest parsing and read-file ingestion.
//!
//! The manifest is line oriented; blank lines and `#` comments are
//! ignored, and each record names one library:
//!
//! ```text
//! paired FILE1 FILE2
//! paired INTERLEAVED
//! single FILE
//! ```
//!
//! Read files may be FASTA, FASTQ or one sequence per line, optionally
//! compressed. Reads containing ambiguity codes are dropped here, before
//! the packed store ever sees them; FASTQ reads below the mean-quality
//! threshold are dropped likewise. Dropping is always pairwise in paired
//! libraries.

use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

use seq_io::fasta;
use seq_io::fastq;
use seq_io::fastq::Record as _;
use seq_io::fasta::Record as _;
use tracing::warn;

use crate::error::{InputError, Result};

/// One library named by the manifest.
#[derive(Debug, Clone)]
pub struct LibSpec {
    pub paired: bool,
    pub files: Vec<PathBuf>,
}

/// Parses the manifest, enforcing the five-paired-library cap.
pub fn parse_manifest(path: &Path) -> Result<Vec<LibSpec>> {
    let file = std::fs::File::open(path).map_err(|source| InputError::Unreadable {
        path: path.display().to_string(),
        source,
    })?;
    let mut libs = Vec::new();
    for (number, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        let lib = match (fields.first().copied(), fields.len()) {
            (Some("paired"), 2 | 3) => LibSpec {
                paired: true,
                files: fields[1..].iter().map(PathBuf::from).collect(),
            },
            (Some("single"), 2) => LibSpec {
                paired: false,
                files: vec![PathBuf::from(fields[1])],
            },
            _ => return Err(InputError::BadManifestLine(number + 1).into()),
        };
        libs.push(lib);
    }
    let paired = libs.iter().filter(|lib| lib.paired).count();
    if paired > 5 {
        return Err(InputError::TooManyLibraries(paired).into());
    }
    Ok(libs)
}

/// A streaming reader over one read file of any supported format.
pub struct ReadFile {
    inner: Format,
    min_score: u32,
    path: String,
    /// Reads dropped for ambiguity codes or low quality.
    pub skipped: u64,
}

enum Format {
    Fasta(fasta::Reader<Box<dyn Read>>),
    Fastq(fastq::Reader<Box<dyn Read>>),
    Plain(BufReader<Box<dyn Read>>),
}

impl ReadFile {
    /// Opens a read file, sniffing its format from the first byte.
    pub fn open(path: &Path, min_score: u32) -> Result<Self> {
        let (reader, _format) =
            niffler::from_path(path).map_err(|_| InputError::Unreadable {
                path: path.display().to_string(),
                source: std::io::Error::other("unreadable or unrecognised compression"),
            })?;
        let mut buffered = BufReader::new(reader);
        let first = buffered.fill_buf()?.first().copied();
        let boxed: Box<dyn Read> = Box::new(buffered);
        let inner = match first {
            Some(b'>') => Format::Fasta(fasta::Reader::new(boxed)),
            Some(b'@') => Format::Fastq(fastq::Reader::new(boxed)),
            Some(_) => Format::Plain(BufReader::new(boxed)),
            None => return Err(InputError::EmptyFile(path.display().to_string()).into()),
        };
        Ok(Self {
            inner,
            min_score,
            path: path.display().to_string(),
            skipped: 0,
        })
    }

    /// The next record: `None` at the end of the file, `Some(None)` for a
    /// record dropped by the ambiguity or quality filters.
    fn next_record(&mut self) -> Result<Option<Option<String>>> {
        let raw = loop {
            match &mut self.inner {
                Format::Fasta(reader) => match reader.next() {
                    None => return Ok(None),
                    Some(rec) => {
                        let rec = rec.map_err(|e| std::io::Error::other(e.to_string()))?;
                        break rec.full_seq().to_vec();
                    }
                },
                Format::Fastq(reader) => match reader.next() {
                    None => return Ok(None),
                    Some(rec) => {
                        let rec = rec.map_err(|e| std::io::Error::other(e.to_string()))?;
                        if self.min_score > 0 && !passes_quality(rec.qual(), self.min_score) {
                            self.skipped += 1;
                            return Ok(Some(None));
                        }
                        break rec.seq().to_vec();
                    }
                },
                Format::Plain(reader) => {
                    let mut line = String::new();
                    if reader.read_line(&mut line)? == 0 {
                        return Ok(None);
                    }
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    break trimmed.as_bytes().to_vec();
                }
            }
        };
        let read: String = raw
            .iter()
            .map(|&c| (c as char).to_ascii_uppercase())
            .collect();
        if read.bytes().all(|c| matches!(c, b'A' | b'C' | b'G' | b'T')) {
            Ok(Some(Some(read)))
        } else {
            self.skipped += 1;
            Ok(Some(None))
        }
    }

    /// The next acceptable read, uppercased, or `None` at the end.
    pub fn next_read(&mut self) -> Result<Option<String>> {
        loop {
            match self.next_record()? {
                None => return Ok(None),
                Some(None) => continue,
                Some(Some(read)) => return Ok(Some(read)),
            }
        }
    }

    fn warn_skipped(&self) {
        if self.skipped > 0 {
            warn!(file = %self.path, skipped = self.skipped, "reads dropped on input");
        }
    }
}

fn passes_quality(qual: &[u8], min_score: u32) -> bool {
    if qual.is_empty() {
        return false;
    }
    let total: u64 = qual.iter().map(|&q| u64::from(q.saturating_sub(33))).sum();
    total / qual.len() as u64 >= u64::from(min_score)
}

/// Streams one library's reads in indexing order.
///
/// Paired libraries from two separated files interleave mate by mate; a
/// dropped read on either side drops the whole fragment so mate
/// arithmetic stays intact. Interleaved files are consumed two records at
/// a time with the same rule.
pub fn stream_library<F: FnMut(&str) -> Result<()>>(
    lib: &LibSpec,
    min_score: u32,
    mut sink: F,
) -> Result<()> {
    let pair_mismatch = || -> crate::Error {
        InputError::PairMismatch(
            lib.files[0].display().to_string(),
            lib.files.last().unwrap().display().to_string(),
        )
        .into()
    };
    if lib.paired && lib.files.len() == 2 {
        let mut first = ReadFile::open(&lib.files[0], min_score)?;
        let mut second = ReadFile::open(&lib.files[1], min_score)?;
        loop {
            match (first.next_record()?, second.next_record()?) {
                (None, None) => break,
                (Some(Some(a)), Some(Some(b))) => {
                    sink(&a)?;
                    sink(&b)?;
                }
                (Some(_), Some(_)) => {}
                _ => return Err(pair_mismatch()),
            }
        }
        first.warn_skipped();
        second.warn_skipped();
        Ok(())
    } else if lib.paired {
        let mut file = ReadFile::open(&lib.files[0], min_score)?;
        loop {
            match (file.next_record()?, file.next_record()?) {
                (None, _) => break,
                (Some(_), None) => return Err(pair_mismatch()),
                (Some(Some(a)), Some(Some(b))) => {
                    sink(&a)?;
                    sink(&b)?;
                }
                (Some(_), Some(_)) => {}
            }
        }
        file.warn_skipped();
        Ok(())
    } else {
        let mut file = ReadFile::open(&lib.files[0], min_score)?;
        while let Some(read) = file.next_read()? {
            sink(&read)?;
        }
        file.warn_skipped();
        Ok(())
    }
}

/// First pass over every library: longest read and total read count.
pub fn scan_libraries(libs: &[LibSpec], min_score: u32) -> Result<(usize, u64)> {
    let mut max_len = 0;
    let mut total = 0u64;
    for lib in libs {
        stream_library(lib, min_score, |read| {
            max_len = max_len.max(read.len());
            total += 1;
            Ok(())
        })?;
    }
    Ok((max_len, total))
}

#[cfg(test)]
mod testing {
    use super::*;
    use std::io::Write as _;

    fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_manifest_forms() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = write_file(
            dir.path(),
            "manifest.txt",
            "# comment\n\npaired a.fq b.fq\npaired inter.fq\nsingle reads.fa\n",
        );
        let libs = parse_manifest(&path)?;
        assert_eq!(libs.len(), 3);
        assert!(libs[0].paired && libs[0].files.len() == 2);
        assert!(libs[1].paired && libs[1].files.len() == 1);
        assert!(!libs[2].paired);
        Ok(())
    }

    #[test]
    fn test_manifest_bad_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "manifest.txt", "triple a b c d\n");
        let err = parse_manifest(&path).unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Input(InputError::BadManifestLine(1))
        ));
    }

    #[test]
    fn test_manifest_library_cap() {
        let dir = tempfile::tempdir().unwrap();
        let lines = "paired a b\n".repeat(6);
        let path = write_file(dir.path(), "manifest.txt", &lines);
        assert!(parse_manifest(&path).is_err());
    }

    #[test]
    fn test_fasta_multiline() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = write_file(dir.path(), "reads.fa", ">a\nACGT\nACGT\n>b\nttga\n");
        let mut file = ReadFile::open(&path, 0)?;
        assert_eq!(file.next_read()?.as_deref(), Some("ACGTACGT"));
        assert_eq!(file.next_read()?.as_deref(), Some("TTGA"));
        assert_eq!(file.next_read()?, None);
        Ok(())
    }

    #[test]
    fn test_fastq_quality_filter() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = write_file(
            dir.path(),
            "reads.fq",
            "@a\nACGT\n+\nIIII\n@b\nTTGA\n+\n!!!!\n",
        );
        let mut file = ReadFile::open(&path, 20)?;
        assert_eq!(file.next_read()?.as_deref(), Some("ACGT"));
        assert_eq!(file.next_read()?, None);
        assert_eq!(file.skipped, 1);
        Ok(())
    }

    #[test]
    fn test_ambiguity_codes_dropped() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = write_file(dir.path(), "reads.txt", "ACGT\nACNT\nTTGA\n");
        let mut file = ReadFile::open(&path, 0)?;
        assert_eq!(file.next_read()?.as_deref(), Some("ACGT"));
        assert_eq!(file.next_read()?.as_deref(), Some("TTGA"));
        assert_eq!(file.next_read()?, None);
        assert_eq!(file.skipped, 1);
        Ok(())
    }

    #[test]
    fn test_paired_interleaving() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let a = write_file(dir.path(), "a.txt", "AAAA\nCCCC\n");
        let b = write_file(dir.path(), "b.txt", "GGGG\nTTTT\n");
        let lib = LibSpec {
            paired: true,
            files: vec![a, b],
        };
        let mut seen = Vec::new();
        stream_library(&lib, 0, |read| {
            seen.push(read.to_string());
            Ok(())
        })?;
        assert_eq!(seen, vec!["AAAA", "GGGG", "CCCC", "TTTT"]);
        Ok(())
    }

    #[test]
    fn test_scan_libraries() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = write_file(dir.path(), "reads.txt", "ACGTACGT\nTTGA\n");
        let lib = LibSpec {
            paired: false,
            files: vec![path],
        };
        let (max_len, total) = scan_libraries(&[lib], 0)?;
        assert_eq!((max_len, total), (8, 2));
        Ok(())
    }
}
