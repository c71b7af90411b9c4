//! # readix
//!
//! An on-disk FM-index construction and query engine for DNA short-read
//! sequencing data.
//!
//! The crate packs fixed- or near-fixed-length reads over `{A,C,G,T}` into a
//! compact 2-bit binary store, transforms that store into a Burrows-Wheeler
//! index with a multi-pass, column-by-column constructor, and answers exact,
//! approximate and overlap queries against the finished index.
//!
//! ## Subsystems
//!
//! - [`store`]: the packed read file, its header, writer and sequential
//!   reader.
//! - [`transform`]: the incremental BWT constructor, one pass per read
//!   column, maintaining sorted bucket files, insertion counters and
//!   run-length-coded BWT chunks on disk.
//! - [`index`]: the FM-index runtime, rank/range queries over the packed
//!   BWT and random access back into read ids and sequences.
//! - [`search`]: approximate substring matching (blocked seed-and-extend)
//!   and suffix-prefix overlap enumeration.
//! - [`assembly`]: the diploid coverage client built on top of the query
//!   contracts.

#![allow(clippy::module_inception)]

pub mod alphabet;
pub mod assembly;
pub mod error;
pub mod index;
pub mod input;
pub mod layout;
pub mod params;
pub mod search;
pub mod store;
pub mod transform;

pub use error::{Error, HeaderError, InputError, ReadError, Result, WriteError};
pub use index::{CharCount, IndexReader, QueryBinaries};
pub use layout::IndexFiles;
pub use params::{Lib, Params};
pub use search::{MatchQuery, MatchedQuery, QueryHit, QueryOverlap, Read};
pub use store::{BinHeader, StoreWriter};
pub use transform::Transform;

/// Identifier of a single indexed read (strand-resolved).
///
/// When reverse-complement indexing is enabled each input read occupies two
/// consecutive ids: even for the forward strand, odd for its reverse
/// complement.
pub type ReadId = u32;
