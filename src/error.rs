//! Error taxonomy for the encryption and xref engines.
//!
//! Mirrors the five kinds called for by the component design: malformed
//! input, failed authentication, detected tampering, unsupported schemes,
//! and caller misuse. Each top-level variant wraps a more specific inner
//! enum where that adds useful detail, the way the teacher nests
//! `Error::Xref(XrefError)`.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Read(#[from] ReadError),

    #[error(transparent)]
    Authentication(#[from] AuthenticationError),

    #[error("tamper detected: {0}")]
    Tamper(&'static str),

    #[error(transparent)]
    Unsupported(#[from] UnsupportedError),

    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
}

#[derive(Debug, Error)]
pub enum ReadError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("malformed file header")]
    Header,

    #[error("malformed trailer dictionary")]
    Trailer,

    #[error(transparent)]
    Xref(#[from] XrefError),

    #[error("object {0:?} not found")]
    ObjectNotFound(crate::model::ObjectId),

    #[error("reference has been freed")]
    Freed,

    #[error("expected object type {expected}")]
    ObjectType { expected: &'static str },

    #[error("dictionary key not present")]
    DictKey,

    #[error("offset {0} out of bounds")]
    Offset(usize),

    #[error("parse error at offset {offset}")]
    Parse { offset: usize },
}

#[derive(Debug, Error)]
pub enum XrefError {
    #[error("could not parse cross-reference section")]
    Parse,

    #[error("could not locate startxref")]
    Start,

    #[error("could not locate /Prev xref section")]
    PrevStart,

    #[error("could not parse cross-reference stream")]
    StreamStart,

    #[error(
        "generation {conflicting_generation} of object {id} occurs after generation \
         {freed_generation} was freed"
    )]
    SneakyReuse {
        id: u32,
        freed_generation: u32,
        conflicting_generation: u32,
    },

    #[error(
        "object {id}: freeing instruction names next generation {next_generation}, but the \
         next use of this object has generation {expected_generation}"
    )]
    FreeGenerationMismatch {
        id: u32,
        next_generation: u32,
        expected_generation: u32,
    },

    #[error("generation {generation} of object {id} was never freed, but reused later")]
    OrphanedGeneration { id: u32, generation: u32 },

    #[error("subsections must increase monotonically")]
    OverlappingSubsection,

    #[error("no history recorded for reference ({0}, {1}) at the requested revision")]
    NoHistoryAtRevision(u32, u16),
}

#[derive(Debug, Error)]
pub enum AuthenticationError {
    #[error("password did not match user or owner password")]
    PasswordMismatch,

    #[error("no recipient credential matched any recipient info")]
    NoMatchingRecipient,

    #[error("object fetch attempted after authentication failed")]
    NotAuthenticated,
}

#[derive(Debug, Error)]
pub enum UnsupportedError {
    #[error("unrecognized crypt filter method {0:?}")]
    CryptFilterMethod(Vec<u8>),

    #[error("unsupported security handler version {0}")]
    HandlerVersion(i64),

    #[error("unsupported security handler revision {0}")]
    HandlerRevision(i64),

    #[error("unsupported key length {0} bytes")]
    KeyLength(usize),

    #[error("recipient key-transport algorithm must be RSA, found {0}")]
    NonRsaRecipient(String),

    #[error("unsupported content-encryption cipher {0}")]
    Cipher(String),

    #[error("no security handler registered for /Filter {0:?}")]
    NoHandlerForFilter(Vec<u8>),
}
