//! The `/AESV2` and `/AESV3` crypt filters.
//!
//! Both prepend a random 16-byte IV to the ciphertext and pad with PKCS#5;
//! they differ in where the per-object key comes from. AESV2 runs every
//! object's key through Algorithm 1 (MD5, `sAlT`-salted) same as the RC4
//! filter. AESV3 (revision 6) skips per-object derivation entirely — the
//! file encryption key doubles as every object's key.

use std::sync::Arc;

use rand::Rng as _;

use crate::crypt_filter::{CryptFilter, KeyCell};
use crate::crypto::aes_util::{cbc_decrypt_pkcs5, cbc_encrypt_pkcs5, AesKey};
use crate::crypto::object_key;
use crate::error::{CoreError, ReadError, Result};
use crate::model::ObjectId;

#[derive(Debug)]
pub struct Aes128CryptFilter {
    key_cell: Arc<KeyCell>,
}

impl Aes128CryptFilter {
    pub fn new(key_cell: Arc<KeyCell>) -> Self {
        Aes128CryptFilter { key_cell }
    }
}

impl CryptFilter for Aes128CryptFilter {
    fn method(&self) -> &'static [u8] {
        b"AESV2"
    }

    fn shared_key(&self) -> Result<Vec<u8>> {
        self.key_cell.get()
    }

    fn derive_object_key(&self, id: ObjectId) -> Result<Vec<u8>> {
        let shared = self.shared_key()?;
        Ok(object_key::derive_object_key(&shared, id.0, id.1, true))
    }

    fn encrypt(&self, id: ObjectId, plaintext: &[u8]) -> Result<Vec<u8>> {
        let key_bytes = self.derive_object_key(id)?;
        let key = AesKey::from_slice(&key_bytes)
            .ok_or(CoreError::InvalidArgument("AESV2 object key must be 16 bytes"))?;
        let mut iv = [0u8; 16];
        rand::rng().fill(&mut iv);
        let mut out = iv.to_vec();
        out.extend(cbc_encrypt_pkcs5(key, iv, plaintext));
        Ok(out)
    }

    fn decrypt(&self, id: ObjectId, ciphertext: &[u8]) -> Result<Vec<u8>> {
        if ciphertext.len() < 16 {
            return Err(CoreError::Read(ReadError::Parse { offset: 0 }));
        }
        let key_bytes = self.derive_object_key(id)?;
        let key = AesKey::from_slice(&key_bytes)
            .ok_or(CoreError::InvalidArgument("AESV2 object key must be 16 bytes"))?;
        let iv: [u8; 16] = ciphertext[..16].try_into().expect("checked length above");
        cbc_decrypt_pkcs5(key, iv, &ciphertext[16..])
            .ok_or(CoreError::Read(ReadError::Parse { offset: 16 }))
    }
}

#[derive(Debug)]
pub struct Aes256CryptFilter {
    key_cell: Arc<KeyCell>,
}

impl Aes256CryptFilter {
    pub fn new(key_cell: Arc<KeyCell>) -> Self {
        Aes256CryptFilter { key_cell }
    }
}

impl CryptFilter for Aes256CryptFilter {
    fn method(&self) -> &'static [u8] {
        b"AESV3"
    }

    fn shared_key(&self) -> Result<Vec<u8>> {
        self.key_cell.get()
    }

    /// AESV3 has no per-object key: the 32-byte file key is used directly.
    fn derive_object_key(&self, _id: ObjectId) -> Result<Vec<u8>> {
        self.shared_key()
    }

    fn encrypt(&self, id: ObjectId, plaintext: &[u8]) -> Result<Vec<u8>> {
        let key_bytes = self.derive_object_key(id)?;
        let key = AesKey::from_slice(&key_bytes)
            .ok_or(CoreError::InvalidArgument("AESV3 file key must be 32 bytes"))?;
        let mut iv = [0u8; 16];
        rand::rng().fill(&mut iv);
        let mut out = iv.to_vec();
        out.extend(cbc_encrypt_pkcs5(key, iv, plaintext));
        Ok(out)
    }

    fn decrypt(&self, id: ObjectId, ciphertext: &[u8]) -> Result<Vec<u8>> {
        if ciphertext.len() < 16 {
            return Err(CoreError::Read(ReadError::Parse { offset: 0 }));
        }
        let key_bytes = self.derive_object_key(id)?;
        let key = AesKey::from_slice(&key_bytes)
            .ok_or(CoreError::InvalidArgument("AESV3 file key must be 32 bytes"))?;
        let iv: [u8; 16] = ciphertext[..16].try_into().expect("checked length above");
        cbc_decrypt_pkcs5(key, iv, &ciphertext[16..])
            .ok_or(CoreError::Read(ReadError::Parse { offset: 16 }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aesv2_round_trips_and_prefixes_iv() {
        let cell = Arc::new(KeyCell::new());
        cell.set(vec![0x11u8; 16]);
        let filter = Aes128CryptFilter::new(cell);

        let plaintext = b"sixteen byte obj";
        let ciphertext = filter.encrypt((5, 0), plaintext).unwrap();
        assert_eq!(ciphertext.len() % 16, 0);
        assert!(ciphertext.len() >= 32);
        assert_eq!(filter.decrypt((5, 0), &ciphertext).unwrap(), plaintext);
    }

    #[test]
    fn aesv3_uses_file_key_directly_for_every_object() {
        let cell = Arc::new(KeyCell::new());
        cell.set(vec![0x22u8; 32]);
        let filter = Aes256CryptFilter::new(cell);

        assert_eq!(filter.derive_object_key((1, 0)).unwrap(), filter.derive_object_key((99, 3)).unwrap());

        let plaintext = b"revision 6 payload, longer than one block.";
        let ciphertext = filter.encrypt((1, 0), plaintext).unwrap();
        assert_eq!(filter.decrypt((1, 0), &ciphertext).unwrap(), plaintext);
    }

    #[test]
    fn rejects_truncated_ciphertext() {
        let cell = Arc::new(KeyCell::new());
        cell.set(vec![0x22u8; 32]);
        let filter = Aes256CryptFilter::new(cell);
        assert!(filter.decrypt((1, 0), &[0u8; 8]).is_err());
    }
}
