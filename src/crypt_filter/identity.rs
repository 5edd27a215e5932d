//! The `/Identity` crypt filter: a pass-through that never touches the
//! bytes it is handed.
//!
//! Redesigned per the component notes: rather than a singleton reached via
//! a trait default method, `/Identity` is an explicit, independently
//! constructible variant so a caller holding a `dyn CryptFilter` can never
//! observe "no encryption" as a missing case rather than a present one.

use crate::crypt_filter::CryptFilter;
use crate::error::Result;
use crate::model::ObjectId;

#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityCryptFilter;

impl CryptFilter for IdentityCryptFilter {
    fn method(&self) -> &'static [u8] {
        b"Identity"
    }

    fn shared_key(&self) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }

    fn derive_object_key(&self, _id: ObjectId) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }

    fn encrypt(&self, _id: ObjectId, plaintext: &[u8]) -> Result<Vec<u8>> {
        Ok(plaintext.to_vec())
    }

    fn decrypt(&self, _id: ObjectId, ciphertext: &[u8]) -> Result<Vec<u8>> {
        Ok(ciphertext.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_unchanged() {
        let filter = IdentityCryptFilter;
        let data = b"untouched payload";
        let encrypted = filter.encrypt((1, 0), data).unwrap();
        assert_eq!(encrypted, data);
        let decrypted = filter.decrypt((1, 0), &encrypted).unwrap();
        assert_eq!(decrypted, data);
    }
}
