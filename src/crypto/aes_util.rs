//! AES-CBC helpers shared by the crypt filters and the R6 key-derivation
//! primitives.
//!
//! A single block of AES-CBC with an all-zero IV is operationally identical
//! to AES-ECB on that block, so the R6 permissions and key-wrap steps (which
//! the standard describes in ECB terms) are implemented here as CBC with
//! IV = 0; this keeps one code path instead of pulling in both cipher modes.

use aes::cipher::block_padding::NoPadding;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes::{Aes128, Aes256};

use crate::crypto::padding::Pkcs5;

/// Dispatches over the two key lengths the crypt filters use (AESV2 = 16
/// bytes, AESV3 = 32 bytes).
pub enum AesKey<'a> {
    Aes128(&'a [u8; 16]),
    Aes256(&'a [u8; 32]),
}

impl<'a> AesKey<'a> {
    pub fn from_slice(key: &'a [u8]) -> Option<AesKey<'a>> {
        match key.len() {
            16 => Some(AesKey::Aes128(key.try_into().ok()?)),
            32 => Some(AesKey::Aes256(key.try_into().ok()?)),
            _ => None,
        }
    }
}

/// AES-CBC encrypt with PKCS#5 (= PKCS#7) padding, as used by the AESV2/
/// AESV3 crypt filters.
pub fn cbc_encrypt_pkcs5(key: AesKey<'_>, iv: [u8; 16], plaintext: &[u8]) -> Vec<u8> {
    match key {
        AesKey::Aes128(key) => {
            cbc::Encryptor::<Aes128>::new(key.into(), &iv.into()).encrypt_padded_vec_mut::<Pkcs5>(plaintext)
        }
        AesKey::Aes256(key) => {
            cbc::Encryptor::<Aes256>::new(key.into(), &iv.into()).encrypt_padded_vec_mut::<Pkcs5>(plaintext)
        }
    }
}

/// AES-CBC decrypt with PKCS#5 (= PKCS#7) padding.
pub fn cbc_decrypt_pkcs5(key: AesKey<'_>, iv: [u8; 16], ciphertext: &[u8]) -> Option<Vec<u8>> {
    match key {
        AesKey::Aes128(key) => cbc::Decryptor::<Aes128>::new(key.into(), &iv.into())
            .decrypt_padded_vec_mut::<Pkcs5>(ciphertext)
            .ok(),
        AesKey::Aes256(key) => cbc::Decryptor::<Aes256>::new(key.into(), &iv.into())
            .decrypt_padded_vec_mut::<Pkcs5>(ciphertext)
            .ok(),
    }
}

/// AES-CBC encrypt with no padding; `data.len()` must be a multiple of 16.
/// Used by the R6 hash-algorithm loop and by building `/UE`, `/OE`.
pub fn cbc_encrypt_no_padding(key: AesKey<'_>, iv: [u8; 16], data: &[u8]) -> Vec<u8> {
    match key {
        AesKey::Aes128(key) => cbc::Encryptor::<Aes128>::new(key.into(), &iv.into())
            .encrypt_padded_vec_mut::<NoPadding>(data),
        AesKey::Aes256(key) => cbc::Encryptor::<Aes256>::new(key.into(), &iv.into())
            .encrypt_padded_vec_mut::<NoPadding>(data),
    }
}

/// AES-CBC decrypt with no padding; `data.len()` must be a multiple of 16.
/// Used to recover the file key from `/UE`/`/OE` and to verify `/Perms`.
pub fn cbc_decrypt_no_padding(key: AesKey<'_>, iv: [u8; 16], data: &[u8]) -> Vec<u8> {
    match key {
        AesKey::Aes128(key) => cbc::Decryptor::<Aes128>::new(key.into(), &iv.into())
            .decrypt_padded_vec_mut::<NoPadding>(data)
            .expect("no-padding decrypt of block-aligned input never fails"),
        AesKey::Aes256(key) => cbc::Decryptor::<Aes256>::new(key.into(), &iv.into())
            .decrypt_padded_vec_mut::<NoPadding>(data)
            .expect("no-padding decrypt of block-aligned input never fails"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cbc_pkcs5_round_trips() {
        let key = [0x42u8; 32];
        let iv = [0u8; 16];
        let plaintext = b"a hundred bytes worth of plaintext padding data for a crypt filter test!!";
        let ciphertext = cbc_encrypt_pkcs5(AesKey::Aes256(&key), iv, plaintext);
        let recovered = cbc_decrypt_pkcs5(AesKey::Aes256(&key), iv, &ciphertext).unwrap();
        assert_eq!(recovered, plaintext);
        // One block of IV prefix plus padding to the next block boundary.
        assert_eq!(ciphertext.len() % 16, 0);
    }

    #[test]
    fn cbc_no_padding_round_trips_on_block_aligned_input() {
        let key = [0x11u8; 32];
        let iv = [0u8; 16];
        let data = [0x99u8; 32];
        let ciphertext = cbc_encrypt_no_padding(AesKey::Aes256(&key), iv, &data);
        let recovered = cbc_decrypt_no_padding(AesKey::Aes256(&key), iv, &ciphertext);
        assert_eq!(recovered, data);
    }
}
