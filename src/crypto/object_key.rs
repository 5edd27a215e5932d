//! Per-object key derivation for the legacy (RC4 and AES-128) crypt filters.
//!
//! ISO 32000-1, 7.6.2, Algorithm 1: the shared file key is salted with the
//! low-order bytes of the object's id and generation (and, for AES, the
//! literal string `sAlT`), then MD5-hashed and truncated.

use md5::{Digest, Md5};

/// `min(16, keylen + 5)` per algorithm 1, step (d).
pub fn derive_object_key(file_key: &[u8], id: u32, generation: u16, is_aes: bool) -> Vec<u8> {
    let mut hasher = Md5::new();
    hasher.update(file_key);
    hasher.update(id.to_le_bytes()[0..3].as_ref());
    hasher.update(generation.to_le_bytes());
    if is_aes {
        hasher.update(b"sAlT");
    }
    let digest = hasher.finalize();
    let len = (file_key.len() + 5).min(16);
    digest[..len].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncates_to_min_16_keylen_plus_5() {
        let key16 = [0u8; 16];
        let derived = derive_object_key(&key16, 3, 0, false);
        assert_eq!(derived.len(), 16);

        let key5 = [0u8; 5];
        let derived = derive_object_key(&key5, 3, 0, false);
        assert_eq!(derived.len(), 10);
    }

    #[test]
    fn aes_salt_changes_the_key() {
        let key = [0u8; 16];
        let rc4_key = derive_object_key(&key, 3, 0, false);
        let aes_key = derive_object_key(&key, 3, 0, true);
        assert_ne!(rc4_key, aes_key);
    }

    #[test]
    fn differs_per_object_id() {
        let key = [0u8; 16];
        let a = derive_object_key(&key, 3, 0, false);
        let b = derive_object_key(&key, 4, 0, false);
        assert_ne!(a, b);
    }
}
