//! Process-wide configuration derived from the packed read store.
//!
//! Built once after the store header is read and passed by reference to
//! every consumer; read-only after indexing finishes.

use crate::error::Result;
use crate::layout::IndexFiles;
use crate::store::BinHeader;
use crate::ReadId;

/// One input library with its id span and pairing metadata.
#[derive(Debug, Clone, Copy)]
pub struct Lib {
    /// First id belonging to this library.
    pub offset: ReadId,
    /// Number of ids in this library (both strands).
    pub count: u32,
    /// Insert size estimates (min, median, max); zero until calibrated.
    pub inserts: [u16; 3],
    /// Whether the library holds paired-end fragments.
    pub is_pe: bool,
}

/// Read-only runtime configuration and id algebra.
#[derive(Debug, Clone)]
pub struct Params {
    pub read_len: u8,
    pub seq_count: u32,
    pub revcomp: bool,
    pub libs: Vec<Lib>,
}

impl Params {
    /// Builds the configuration from a parsed store header.
    #[must_use]
    pub fn from_header(header: &BinHeader) -> Self {
        let mut offset = 0;
        let libs = header
            .libs
            .iter()
            .map(|lib| {
                let out = Lib {
                    offset,
                    count: lib.count,
                    inserts: lib.inserts,
                    is_pe: lib.is_paired(),
                };
                offset += lib.count;
                out
            })
            .collect();
        Self {
            read_len: header.read_len,
            seq_count: header.seq_count,
            revcomp: header.revcomp,
            libs,
        }
    }

    /// Loads the configuration straight from an index prefix.
    pub fn load(files: &IndexFiles) -> Result<Self> {
        let header = BinHeader::from_path(&files.bin())?;
        header.validate_counts()?;
        Ok(Self::from_header(&header))
    }

    /// Number of ids each input read occupies.
    #[must_use]
    pub fn strands(&self) -> u32 {
        1 + u32::from(self.revcomp)
    }

    /// The opposite strand of an id, or the id itself without
    /// reverse-complement indexing.
    #[must_use]
    pub fn rev_id(&self, id: ReadId) -> ReadId {
        if self.revcomp {
            id ^ 1
        } else {
            id
        }
    }

    /// The library an id belongs to.
    #[must_use]
    pub fn lib_of(&self, id: ReadId) -> Option<&Lib> {
        self.libs
            .iter()
            .find(|lib| id >= lib.offset && id < lib.offset + lib.count)
    }

    /// Whether an id comes from a paired-end library.
    #[must_use]
    pub fn is_pe(&self, id: ReadId) -> bool {
        self.lib_of(id).is_some_and(|lib| lib.is_pe)
    }

    /// The mate id of a paired fragment on the same strand, if any.
    ///
    /// Fragments within a paired library alternate mate 1 / mate 2, so the
    /// mate fragment is the neighbouring one and the strand bit carries
    /// over.
    #[must_use]
    pub fn pair_id(&self, id: ReadId) -> Option<ReadId> {
        let lib = self.lib_of(id)?;
        if !lib.is_pe {
            return None;
        }
        let strands = self.strands();
        let frag = (id - lib.offset) / strands;
        let mate_frag = frag ^ 1;
        let mate = lib.offset + mate_frag * strands + (id - lib.offset) % strands;
        (mate < lib.offset + lib.count).then_some(mate)
    }
}
