//! Crate error types.
//!
//! User-caused failures (bad input, mismatched sessions, malformed files)
//! surface as `Err` values; internal invariant violations are asserted.
//! Transient per-query failures do not travel through this module at all:
//! they are reported as a `failure` flag on the owning search object.

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Header(#[from] HeaderError),

    #[error(transparent)]
    Write(#[from] WriteError),

    #[error(transparent)]
    Read(#[from] ReadError),

    #[error(transparent)]
    Input(#[from] InputError),
}

/// Errors raised while validating file headers.
#[derive(thiserror::Error, Debug)]
pub enum HeaderError {
    #[error("Invalid record offset in packed read header: {0}")]
    InvalidSeqsBegin(u8),

    #[error("Session id mismatch: packed reads carry {expected:#018x}, derived file carries {found:#018x}")]
    SessionMismatch { expected: u64, found: u64 },

    #[error("Header buffer too small: {0} bytes, expected at least {1}")]
    InvalidSize(usize, usize),

    #[error("Library count {0} exceeds the supported maximum of 5 paired libraries")]
    LibraryOverflow(u8),

    #[error("Library counts sum to {counted} but the header records {expected} sequences")]
    LibraryCountMismatch { counted: u32, expected: u32 },
}

/// Errors raised while packing reads into the binary store.
#[derive(thiserror::Error, Debug)]
pub enum WriteError {
    #[error("Invalid base {base:?} in read {read}")]
    InvalidBase { base: char, read: u32 },

    #[error("Read {read} of length {len} exceeds the declared read length {max}")]
    TooLong { read: u32, len: usize, max: u8 },

    #[error("Read {read} of length {len} is too short to index")]
    TooShort { read: u32, len: usize },

    #[error("Reads were written outside of a library block")]
    NoLibrary,

    #[error("No reads were written")]
    Empty,
}

/// Errors raised while decoding the binary store or derived index files.
#[derive(thiserror::Error, Debug)]
pub enum ReadError {
    #[error("Unexpected end of stream in packed read record {0}")]
    TruncatedRecord(u32),

    #[error("Corrupt run length encoding at byte {0}")]
    CorruptRun(u64),

    #[error("Cannot resume: no cycles have been previously completed")]
    NothingToResume,

    #[error("Transformation has already been completed")]
    AlreadyComplete,

    #[error("Index is incomplete: {done} of {total} cycles finished")]
    IncompleteIndex { done: u8, total: u8 },
}

/// Errors raised while parsing the input manifest and read files.
#[derive(thiserror::Error, Debug)]
pub enum InputError {
    #[error("Invalid input form in line {0} of the manifest")]
    BadManifestLine(usize),

    #[error("Excessive library count of {0}; maximum supported is 5")]
    TooManyLibraries(usize),

    #[error("Failed to open read file {path}: {source}")]
    Unreadable {
        path: String,
        source: std::io::Error,
    },

    #[error("Paired files {0} and {1} hold different read counts")]
    PairMismatch(String, String),

    #[error("Read file {0} is empty or unrecognised")]
    EmptyFile(String),
}
