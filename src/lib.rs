//! Revision-aware PDF cross-reference reconstruction and standards-compliant
//! document encryption.
//!
//! Three pieces, composed rather than layered: [`xref`] keeps the full
//! multi-revision history of every indirect reference in a file, not just
//! its current state; [`handlers`] implements the `/Standard` and
//! `/Adobe.PubSec` security handlers (ISO 32000-2 7.6) over the crypt filter
//! abstraction in [`crypt_filter`]; [`reader`] ties both to a byte buffer.
//! [`model`] is the narrow object representation the other modules share,
//! and [`historical`] answers "what did the document look like as of
//! revision N" on top of the xref cache. [`syntax`] supplies the one
//! general-purpose object tokenizer this core needs to plug into
//! [`reader`]'s `DocumentParser` hook.

#![forbid(unsafe_code)]
#![deny(clippy::all)]

pub mod crypt_filter;
pub mod crypto;
pub mod error;
pub mod handlers;
pub mod historical;
pub mod model;
pub mod reader;
pub mod syntax;
pub mod xref;

pub use error::{CoreError, Result};
pub use model::{Dictionary, Object, ObjectId, Stream, StringFormat};
