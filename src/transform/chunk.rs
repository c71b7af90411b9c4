//! BWT chunk files: fixed header plus a run-length coded body.
//!
//! A run is one byte holding the symbol in its top three bits and the run
//! length in the low five; a zero length escapes to a `u32` little-endian
//! length for runs past 31. Symbols 0..=3 are bases, 4 is the end marker.

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::alphabet::END;
use crate::error::{HeaderError, ReadError, Result};

/// Fixed chunk header size: session id, end flag, body count, five symbol
/// counts and four base positions.
pub const CHUNK_HEADER: usize = 8 + 1 + 8 + 40 + 16;

/// Header of one BWT chunk.
///
/// `char_counts[0..4]` are the sizes of the four suffix regions inserted so
/// far (at cycle 0, the bucket-derived last-base counts); `char_counts[4]`
/// counts end markers. `base_pos` holds the per-base last-base counts and
/// stays constant across cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    pub session_id: u64,
    pub has_ends: bool,
    pub bwt_count: u64,
    pub char_counts: [u64; 5],
    pub base_pos: [u32; 4],
}

impl ChunkHeader {
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u64::<LittleEndian>(self.session_id)?;
        writer.write_u8(u8::from(self.has_ends))?;
        writer.write_u64::<LittleEndian>(self.bwt_count)?;
        for count in self.char_counts {
            writer.write_u64::<LittleEndian>(count)?;
        }
        for pos in self.base_pos {
            writer.write_u32::<LittleEndian>(pos)?;
        }
        Ok(())
    }

    pub fn from_reader<R: Read>(reader: &mut R) -> Result<Self> {
        let session_id = reader.read_u64::<LittleEndian>()?;
        let has_ends = reader.read_u8()? != 0;
        let bwt_count = reader.read_u64::<LittleEndian>()?;
        let mut char_counts = [0u64; 5];
        for count in &mut char_counts {
            *count = reader.read_u64::<LittleEndian>()?;
        }
        let mut base_pos = [0u32; 4];
        for pos in &mut base_pos {
            *pos = reader.read_u32::<LittleEndian>()?;
        }
        Ok(Self {
            session_id,
            has_ends,
            bwt_count,
            char_counts,
            base_pos,
        })
    }

    /// Rejects chunks written by a different transform session.
    pub fn check_session(&self, expected: u64) -> Result<()> {
        if self.session_id != expected {
            return Err(HeaderError::SessionMismatch {
                expected,
                found: self.session_id,
            }
            .into());
        }
        Ok(())
    }
}

/// Run-length encoder merging adjacent same-symbol pushes.
pub struct RunWriter<W: Write> {
    inner: W,
    sym: u8,
    len: u64,
}

impl<W: Write> RunWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            sym: u8::MAX,
            len: 0,
        }
    }

    /// Appends `len` copies of `sym` to the body.
    pub fn push(&mut self, sym: u8, len: u64) -> Result<()> {
        debug_assert!(sym <= END);
        if sym == self.sym {
            self.len += len;
            return Ok(());
        }
        self.emit()?;
        self.sym = sym;
        self.len = len;
        Ok(())
    }

    fn emit(&mut self) -> Result<()> {
        if self.len == 0 {
            return Ok(());
        }
        if self.len <= 31 {
            self.inner.write_u8((self.sym << 5) | self.len as u8)?;
        } else {
            let mut left = self.len;
            while left > u64::from(u32::MAX) {
                self.inner.write_u8(self.sym << 5)?;
                self.inner.write_u32::<LittleEndian>(u32::MAX)?;
                left -= u64::from(u32::MAX);
            }
            self.inner.write_u8(self.sym << 5)?;
            self.inner.write_u32::<LittleEndian>(left as u32)?;
        }
        self.len = 0;
        Ok(())
    }

    /// Flushes the trailing run and returns the underlying writer.
    pub fn finish(mut self) -> Result<W> {
        self.emit()?;
        Ok(self.inner)
    }
}

/// Run-length decoder bounded by the body count from the chunk header.
pub struct RunReader<R: Read> {
    inner: R,
    remaining: u64,
    consumed: u64,
}

impl<R: Read> RunReader<R> {
    pub fn new(inner: R, bwt_count: u64) -> Self {
        Self {
            inner,
            remaining: bwt_count,
            consumed: 0,
        }
    }

    /// Decodes the next run, or `None` once the body is exhausted.
    pub fn next_run(&mut self) -> Result<Option<(u8, u64)>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        let byte = self.inner.read_u8()?;
        let sym = byte >> 5;
        let len = match byte & 0x1f {
            0 => u64::from(self.inner.read_u32::<LittleEndian>()?),
            short => u64::from(short),
        };
        if sym > END || len == 0 || len > self.remaining {
            return Err(ReadError::CorruptRun(self.consumed).into());
        }
        self.remaining -= len;
        self.consumed += len;
        Ok(Some((sym, len)))
    }
}

/// Cursor over a run stream that hands out bounded spans of symbols.
///
/// The cycle merge interleaves copied stretches of the previous body with
/// fresh insertions; this cursor lets it take "the next `n` entries" and
/// "entries up to the next stop" without materializing the body.
pub struct RunCursor<R: Read> {
    runs: RunReader<R>,
    sym: u8,
    left: u64,
}

impl<R: Read> RunCursor<R> {
    pub fn new(runs: RunReader<R>) -> Self {
        Self {
            runs,
            sym: 0,
            left: 0,
        }
    }

    /// Copies exactly `n` entries into `out`, reporting each run span.
    pub fn copy_n<F: FnMut(u8, u64) -> Result<()>>(
        &mut self,
        mut n: u64,
        mut out: F,
    ) -> Result<()> {
        while n > 0 {
            if self.left == 0 {
                let (sym, len) = self
                    .runs
                    .next_run()?
                    .ok_or(ReadError::CorruptRun(u64::MAX))?;
                self.sym = sym;
                self.left = len;
            }
            let take = self.left.min(n);
            out(self.sym, take)?;
            self.left -= take;
            n -= take;
        }
        Ok(())
    }
}

#[cfg(test)]
mod testing {
    use super::*;

    #[test]
    fn test_header_roundtrip() -> Result<()> {
        let header = ChunkHeader {
            session_id: 77,
            has_ends: true,
            bwt_count: 1000,
            char_counts: [1, 2, 3, 4, 5],
            base_pos: [9, 8, 7, 6],
        };
        let mut buf = Vec::new();
        header.write_to(&mut buf)?;
        assert_eq!(buf.len(), CHUNK_HEADER);
        let parsed = ChunkHeader::from_reader(&mut buf.as_slice())?;
        assert_eq!(parsed, header);
        assert!(parsed.check_session(78).is_err());
        Ok(())
    }

    #[test]
    fn test_run_roundtrip() -> Result<()> {
        let mut writer = RunWriter::new(Vec::new());
        writer.push(0, 3)?;
        writer.push(0, 2)?; // merges with the previous run
        writer.push(4, 1)?;
        writer.push(2, 100)?; // escapes to a u32 length
        writer.push(1, 31)?;
        let bytes = writer.finish()?;

        let mut reader = RunReader::new(bytes.as_slice(), 3 + 2 + 1 + 100 + 31);
        assert_eq!(reader.next_run()?, Some((0, 5)));
        assert_eq!(reader.next_run()?, Some((4, 1)));
        assert_eq!(reader.next_run()?, Some((2, 100)));
        assert_eq!(reader.next_run()?, Some((1, 31)));
        assert_eq!(reader.next_run()?, None);
        Ok(())
    }

    #[test]
    fn test_cursor_spans() -> Result<()> {
        let mut writer = RunWriter::new(Vec::new());
        writer.push(1, 10)?;
        writer.push(3, 5)?;
        let bytes = writer.finish()?;

        let mut cursor = RunCursor::new(RunReader::new(bytes.as_slice(), 15));
        let mut taken = Vec::new();
        cursor.copy_n(7, |sym, len| {
            taken.push((sym, len));
            Ok(())
        })?;
        cursor.copy_n(8, |sym, len| {
            taken.push((sym, len));
            Ok(())
        })?;
        assert_eq!(taken, vec![(1, 7), (1, 3), (3, 5)]);
        Ok(())
    }
}
