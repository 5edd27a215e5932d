//! The iterative hash algorithm introduced for AES-256 (revision 6)
//! passwords — ISO 32000-2, 7.6.4.3.4, "Algorithm 2.B".

use sha2::{Digest, Sha256, Sha384, Sha512};

use crate::crypto::aes_util::{cbc_encrypt_no_padding, AesKey};

/// Computes the repeated-hash used to validate an R6 password and to derive
/// the key used to unwrap `/UE`/`/OE`.
///
/// `user_key` is the 48-byte `/U` entry, and is only passed when computing
/// the *owner* password hash (the algorithm folds the user entry into the
/// owner's hash chain so that the two are not independently guessable).
pub fn compute_hash(password: &[u8], salt: &[u8], user_key: Option<&[u8]>) -> [u8; 32] {
    let mut k: Vec<u8> = {
        let mut hasher = Sha256::new();
        hasher.update(password);
        hasher.update(salt);
        if let Some(user_key) = user_key {
            hasher.update(user_key);
        }
        hasher.finalize().to_vec()
    };

    let mut round = 0u32;
    loop {
        let mut k1 = Vec::with_capacity(64 * (password.len() + k.len() + user_key.map_or(0, <[u8]>::len)));
        for _ in 0..64 {
            k1.extend_from_slice(password);
            k1.extend_from_slice(&k);
            if let Some(user_key) = user_key {
                k1.extend_from_slice(user_key);
            }
        }

        let aes_key: [u8; 16] = k[0..16].try_into().unwrap();
        let iv: [u8; 16] = k[16..32].try_into().unwrap();
        let e = cbc_encrypt_no_padding(AesKey::Aes128(&aes_key), iv, &k1);

        let modulus: u32 = e[0..16].iter().map(|&b| b as u32).sum::<u32>() % 3;
        k = match modulus {
            0 => Sha256::digest(&e).to_vec(),
            1 => Sha384::digest(&e).to_vec(),
            _ => Sha512::digest(&e).to_vec(),
        };

        round += 1;
        let last = *e.last().expect("E is never empty") as u32;
        if round >= 64 && last <= round.saturating_sub(32) {
            break;
        }
    }

    k[0..32].try_into().expect("hash chain always yields >= 32 bytes")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic() {
        let a = compute_hash(b"pass", b"saltsalt", None);
        let b = compute_hash(b"pass", b"saltsalt", None);
        assert_eq!(a, b);
    }

    #[test]
    fn different_salts_diverge() {
        let a = compute_hash(b"pass", b"saltsalt", None);
        let b = compute_hash(b"pass", b"saltsaltX", None);
        assert_ne!(a, b);
    }

    #[test]
    fn owner_hash_depends_on_user_key() {
        let without = compute_hash(b"pass", b"saltsalt", None);
        let with = compute_hash(b"pass", b"saltsalt", Some(b"some 48 byte /U entry padding..."));
        assert_ne!(without, with);
    }
}
