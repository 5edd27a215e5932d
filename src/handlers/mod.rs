//! Security handlers (§4.3/§4.4) and the registry that resolves a `/Filter`
//! name to one.

pub mod public_key;
pub mod standard;

use bitflags::bitflags;

use crate::crypt_filter::CryptFilterConfig;
use crate::error::{CoreError, Result, UnsupportedError};
use crate::model::Dictionary;

bitflags! {
    /// The `/P` permission flags, ISO 32000-2 Table 22. Stored and
    /// serialized as a signed 32-bit integer; bits above 32 have no
    /// meaning and are not tracked here (unlike the 64-bit field the 2.0
    /// spec documents as "reserved, must be 1" padding).
    #[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
    pub struct Permissions: i32 {
        const PRINTABLE = 1 << 2;
        const MODIFIABLE = 1 << 3;
        const COPYABLE = 1 << 4;
        const ANNOTABLE = 1 << 5;
        const FILLABLE = 1 << 8;
        const COPYABLE_FOR_ACCESSIBILITY = 1 << 9;
        const ASSEMBLABLE = 1 << 10;
        const PRINTABLE_IN_HIGH_QUALITY = 1 << 11;
    }
}

impl Default for Permissions {
    fn default() -> Self {
        Permissions::all()
    }
}

/// Outcome of a successful (or failed) authentication attempt against a
/// security handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthResult {
    User,
    Owner,
    Failed,
}

/// The two security handlers this core implements, behind one type so a
/// reader can hold either without caring which.
#[derive(Debug)]
pub enum Handler {
    Standard(standard::StandardSecurityHandler),
    PublicKey(public_key::PublicKeySecurityHandler),
}

impl Handler {
    pub fn crypt_filters(&self) -> &CryptFilterConfig {
        match self {
            Handler::Standard(h) => &h.filters,
            Handler::PublicKey(h) => &h.filters,
        }
    }

    pub fn encrypt_metadata(&self) -> bool {
        match self {
            Handler::Standard(h) => h.encrypt_metadata,
            Handler::PublicKey(h) => h.encrypt_metadata,
        }
    }
}

type HandlerBuilder = fn(&Dictionary) -> Result<Handler>;

struct HandlerRegistryEntry {
    filter_name: &'static [u8],
    subfilters: &'static [&'static [u8]],
    build: HandlerBuilder,
}

/// Explicit builder table mapping `/Filter` (and, failing that, `/SubFilter`)
/// to a handler constructor. Built once by the reader and passed around,
/// rather than handlers self-registering at module load time.
pub struct HandlerRegistry {
    entries: Vec<HandlerRegistryEntry>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        HandlerRegistry { entries: Vec::new() }
    }

    pub fn register(&mut self, filter_name: &'static [u8], subfilters: &'static [&'static [u8]], build: HandlerBuilder) {
        self.entries.push(HandlerRegistryEntry {
            filter_name,
            subfilters,
            build,
        });
    }

    /// The registry this core ships: `/Standard` and `/Adobe.PubSec`.
    pub fn with_defaults() -> Self {
        let mut registry = HandlerRegistry::new();
        registry.register(b"Standard", &[], standard::build_from_dict);
        registry.register(
            b"Adobe.PubSec",
            &[b"adbe.pkcs7.s3", b"adbe.pkcs7.s4", b"adbe.pkcs7.s5"],
            public_key::build_from_dict,
        );
        registry
    }

    pub fn build(&self, dict: &Dictionary) -> Result<Handler> {
        let filter_name = dict.get(b"Filter").and_then(|o| o.as_name()).ok();

        if let Some(filter_name) = filter_name {
            if let Some(entry) = self.entries.iter().find(|e| e.filter_name == filter_name) {
                return (entry.build)(dict);
            }
        }

        if let Ok(subfilter) = dict.get(b"SubFilter").and_then(|o| o.as_name()) {
            if let Some(entry) = self.entries.iter().find(|e| e.subfilters.contains(&subfilter)) {
                return (entry.build)(dict);
            }
        }

        Err(CoreError::Unsupported(UnsupportedError::NoHandlerForFilter(
            filter_name.map(|n| n.to_vec()).unwrap_or_default(),
        )))
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        HandlerRegistry::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictionary;

    #[test]
    fn registry_resolves_standard_by_filter_name() {
        let registry = HandlerRegistry::with_defaults();
        let dict = dictionary! {
            "Filter" => "Standard",
            "V" => 1,
            "R" => 2,
            "P" => -3904i64,
            "O" => crate::model::Object::string_literal(vec![0u8; 32]),
            "U" => crate::model::Object::string_literal(vec![0u8; 32]),
        };
        assert!(registry.build(&dict).is_ok());
    }

    #[test]
    fn registry_reports_missing_handler() {
        let registry = HandlerRegistry::with_defaults();
        let dict = dictionary! { "Filter" => "SomeOtherHandler" };
        assert!(registry.build(&dict).is_err());
    }
}
