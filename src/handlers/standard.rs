//! The `/Standard` security handler (§4.3): password-based authentication
//! and key derivation, revisions 2 through 6.

use std::sync::Arc;

use md5::{Digest, Md5};
use rand::Rng as _;

use crate::crypt_filter::aes_filter::{Aes128CryptFilter, Aes256CryptFilter};
use crate::crypt_filter::identity::IdentityCryptFilter;
use crate::crypt_filter::rc4_filter::Rc4CryptFilter;
use crate::crypt_filter::{CryptFilter, CryptFilterConfig, KeyCell};
use crate::crypto::aes_util::{cbc_decrypt_no_padding, cbc_encrypt_no_padding, AesKey};
use crate::crypto::hash_r6;
use crate::crypto::password::{pdf_doc_encode, sanitize_password_r4, sanitize_password_r6, PAD_BYTES};
use crate::crypto::rc4::Rc4;
use crate::error::{CoreError, Result, UnsupportedError};
use crate::handlers::{AuthResult, Handler, Permissions};
use crate::model::{Dictionary, Object};

#[derive(Debug)]
pub struct StandardSecurityHandler {
    pub version: i64,
    pub revision: i64,
    pub key_length: usize,
    pub permissions: Permissions,
    pub encrypt_metadata: bool,
    pub owner_value: Vec<u8>,
    pub user_value: Vec<u8>,
    pub owner_encrypted: Option<Vec<u8>>,
    pub user_encrypted: Option<Vec<u8>>,
    pub perms_encrypted: Option<[u8; 16]>,
    key_cell: Arc<KeyCell>,
    pub filters: CryptFilterConfig,
}

pub(crate) fn build_from_dict(dict: &Dictionary) -> Result<Handler> {
    let version = dict.get(b"V").and_then(Object::as_i64).unwrap_or(1);
    let revision = dict.get(b"R")?.as_i64()?;
    let permissions = Permissions::from_bits_retain(dict.get(b"P")?.as_i64()? as i32);
    let owner_value = dict.get(b"O")?.as_str()?.to_vec();
    let user_value = dict.get(b"U")?.as_str()?.to_vec();
    let encrypt_metadata = dict
        .get(b"EncryptMetadata")
        .and_then(Object::as_bool)
        .unwrap_or(true);
    let length_bits = dict.get(b"Length").and_then(Object::as_i64).unwrap_or(40);
    let key_length = (length_bits / 8) as usize;

    let (owner_encrypted, user_encrypted, perms_encrypted) = if revision >= 5 {
        let oe = dict.get(b"OE")?.as_str()?.to_vec();
        let ue = dict.get(b"UE")?.as_str()?.to_vec();
        let perms_bytes = dict.get(b"Perms")?.as_str()?;
        let mut perms = [0u8; 16];
        let len = perms_bytes.len().min(16);
        perms[..len].copy_from_slice(&perms_bytes[..len]);
        (Some(oe), Some(ue), Some(perms))
    } else {
        (None, None, None)
    };

    let key_cell = Arc::new(KeyCell::new());
    let mut cf_entries: Vec<(Vec<u8>, Arc<dyn CryptFilter>)> = Vec::new();
    let stream_name;
    let string_name;

    if version >= 4 {
        if let Ok(cf_dict) = dict.get(b"CF").and_then(Object::as_dict) {
            for (name, entry) in cf_dict.iter() {
                let entry_dict = entry.as_dict()?;
                let cfm = entry_dict
                    .get(b"CFM")
                    .and_then(Object::as_name)
                    .unwrap_or(b"Identity");
                let filter: Arc<dyn CryptFilter> = match cfm {
                    b"None" => Arc::new(IdentityCryptFilter),
                    b"V2" => Arc::new(Rc4CryptFilter::new(key_cell.clone())),
                    b"AESV2" => Arc::new(Aes128CryptFilter::new(key_cell.clone())),
                    b"AESV3" => Arc::new(Aes256CryptFilter::new(key_cell.clone())),
                    other => {
                        return Err(CoreError::Unsupported(UnsupportedError::CryptFilterMethod(
                            other.to_vec(),
                        )))
                    }
                };
                cf_entries.push((name.clone(), filter));
            }
        }
        stream_name = dict
            .get(b"StmF")
            .and_then(Object::as_name)
            .unwrap_or(b"Identity")
            .to_vec();
        string_name = dict
            .get(b"StrF")
            .and_then(Object::as_name)
            .unwrap_or(b"Identity")
            .to_vec();
    } else {
        let method_name = if revision >= 5 { b"AESV3".as_slice() } else { b"V2" };
        let filter: Arc<dyn CryptFilter> = if revision >= 5 {
            Arc::new(Aes256CryptFilter::new(key_cell.clone()))
        } else {
            Arc::new(Rc4CryptFilter::new(key_cell.clone()))
        };
        cf_entries.push((method_name.to_vec(), filter));
        stream_name = method_name.to_vec();
        string_name = method_name.to_vec();
    }

    let mut filters = CryptFilterConfig::new(stream_name, string_name);
    for (name, filter) in cf_entries {
        filters.insert(name, filter);
    }
    if let Ok(eff) = dict.get(b"EFF").and_then(Object::as_name) {
        filters.set_embedded_file_filter(eff.to_vec());
    }

    Ok(Handler::Standard(StandardSecurityHandler {
        version,
        revision,
        key_length,
        permissions,
        encrypt_metadata,
        owner_value,
        user_value,
        owner_encrypted,
        user_encrypted,
        perms_encrypted,
        key_cell,
        filters,
    }))
}

/// Algorithm 2 (ISO 32000-2, 7.6.4.3.2): derive the file encryption key from
/// an already-padded 32-byte user password.
fn compute_file_key_r4(
    padded_user_password: &[u8; 32],
    owner_value: &[u8],
    permissions: Permissions,
    first_id: &[u8],
    revision: i64,
    key_length: usize,
    encrypt_metadata: bool,
) -> Vec<u8> {
    let mut hasher = Md5::new();
    hasher.update(padded_user_password);
    hasher.update(owner_value);
    hasher.update((permissions.bits() as u32).to_le_bytes());
    hasher.update(first_id);
    if revision >= 4 && !encrypt_metadata {
        hasher.update(b"\xff\xff\xff\xff");
    }
    let mut hash = hasher.finalize().to_vec();

    let n = if revision >= 3 { key_length } else { 5 };
    if revision >= 3 {
        for _ in 0..50 {
            hash = Md5::digest(&hash[..n]).to_vec();
        }
    }
    hash[..n].to_vec()
}

/// Algorithm 3: the `/O` entry.
fn compute_o_r4(owner_password: &[u8], user_password: &[u8], revision: i64, key_length: usize) -> Vec<u8> {
    let padded_owner = sanitize_password_r4(owner_password);
    let mut hash = Md5::digest(padded_owner).to_vec();
    let n = if revision >= 3 { key_length } else { 5 };
    if revision >= 3 {
        for _ in 0..50 {
            hash = Md5::digest(&hash).to_vec();
        }
    }

    let padded_user = sanitize_password_r4(user_password);
    let mut result = Rc4::new(&hash[..n]).encrypt(padded_user);

    if revision >= 3 {
        let mut key = vec![0u8; n];
        for i in 1u8..=19 {
            for (in_byte, out_byte) in hash[..n].iter().zip(key.iter_mut()) {
                *out_byte = in_byte ^ i;
            }
            result = Rc4::new(&key).encrypt(&result);
        }
    }
    result
}

/// Algorithm 4 (revision 2): the `/U` entry.
fn compute_u_r2(file_key: &[u8]) -> Vec<u8> {
    Rc4::new(file_key).encrypt(PAD_BYTES)
}

/// Algorithm 5 (revision 3/4): the `/U` entry.
fn compute_u_r3_r4(file_key: &[u8], first_id: &[u8]) -> Vec<u8> {
    let mut hasher = Md5::new();
    hasher.update(PAD_BYTES);
    hasher.update(first_id);
    let hash = hasher.finalize();

    let mut result = Rc4::new(file_key).encrypt(hash);
    let mut key = vec![0u8; file_key.len()];
    for i in 1u8..=19 {
        for (in_byte, out_byte) in file_key.iter().zip(key.iter_mut()) {
            *out_byte = in_byte ^ i;
        }
        result = Rc4::new(&key).encrypt(&result);
    }
    // Algorithm 4/5, step f: the trailing 16 bytes are arbitrary padding;
    // this handler follows ISO 32000-2's resolution of zero bytes rather
    // than random ones.
    result.resize(32, 0);
    result
}

impl StandardSecurityHandler {
    /// Builds a handler from a pair of passwords for revisions 2-4
    /// (§4.3, "Construction from passwords, legacy path").
    pub fn build_legacy(
        user_password: &[u8],
        owner_password: Option<&[u8]>,
        revision: i64,
        key_length: usize,
        permissions: Permissions,
        first_id: &[u8],
        encrypt_metadata: bool,
    ) -> Self {
        let owner_password = owner_password.unwrap_or(user_password);
        let owner_value = compute_o_r4(owner_password, user_password, revision, key_length);

        let padded_user = sanitize_password_r4(user_password);
        let file_key = compute_file_key_r4(
            &padded_user,
            &owner_value,
            permissions,
            first_id,
            revision,
            key_length,
            encrypt_metadata,
        );

        let user_value = if revision <= 2 {
            compute_u_r2(&file_key)
        } else {
            compute_u_r3_r4(&file_key, first_id)
        };

        let key_cell = Arc::new(KeyCell::new());
        key_cell.set(file_key);
        let filter: Arc<dyn CryptFilter> = Arc::new(Rc4CryptFilter::new(key_cell.clone()));
        let mut filters = CryptFilterConfig::new(b"StdCF".to_vec(), b"StdCF".to_vec());
        filters.insert(b"StdCF".to_vec(), filter);

        StandardSecurityHandler {
            version: if key_length > 5 { 2 } else { 1 },
            revision,
            key_length,
            permissions,
            encrypt_metadata,
            owner_value,
            user_value,
            owner_encrypted: None,
            user_encrypted: None,
            perms_encrypted: None,
            key_cell,
            filters,
        }
    }

    /// Builds a handler from text passwords for revisions 2-4, applying
    /// PDFDocEncoding (§4.1) before padding. Prefer this over
    /// [`Self::build_legacy`] when the caller has an actual password string
    /// rather than bytes already in the legacy encoding.
    #[allow(clippy::too_many_arguments)]
    pub fn build_legacy_text(
        user_password: &str,
        owner_password: Option<&str>,
        revision: i64,
        key_length: usize,
        permissions: Permissions,
        first_id: &[u8],
        encrypt_metadata: bool,
    ) -> Self {
        let user_bytes = pdf_doc_encode(user_password);
        let owner_bytes = owner_password.map(pdf_doc_encode);
        Self::build_legacy(
            &user_bytes,
            owner_bytes.as_deref(),
            revision,
            key_length,
            permissions,
            first_id,
            encrypt_metadata,
        )
    }

    /// Builds a handler for revision 6 (§4.3, "Construction from
    /// passwords, R6").
    pub fn build_r6(user_password: &str, owner_password: Option<&str>, permissions: Permissions, encrypt_metadata: bool) -> Self {
        let owner_password = owner_password.unwrap_or(user_password);
        let user_password = sanitize_password_r6(user_password);
        let owner_password = sanitize_password_r6(owner_password);

        let mut file_key = [0u8; 32];
        rand::rng().fill(&mut file_key);

        let mut user_value = [0u8; 48];
        rand::rng().fill(&mut user_value[32..]);
        let user_validation_salt = user_value[32..40].to_vec();
        let user_key_salt = user_value[40..48].to_vec();
        user_value[..32].copy_from_slice(&hash_r6::compute_hash(&user_password, &user_validation_salt, None));

        let user_key_hash = hash_r6::compute_hash(&user_password, &user_key_salt, None);
        let user_encrypted = cbc_encrypt_no_padding(AesKey::Aes256(&user_key_hash), [0u8; 16], &file_key);

        let mut owner_value = [0u8; 48];
        rand::rng().fill(&mut owner_value[32..]);
        let owner_validation_salt = owner_value[32..40].to_vec();
        let owner_key_salt = owner_value[40..48].to_vec();
        owner_value[..32]
            .copy_from_slice(&hash_r6::compute_hash(&owner_password, &owner_validation_salt, Some(&user_value)));

        let owner_key_hash = hash_r6::compute_hash(&owner_password, &owner_key_salt, Some(&user_value));
        let owner_encrypted = cbc_encrypt_no_padding(AesKey::Aes256(&owner_key_hash), [0u8; 16], &file_key);

        let mut perms_plain = [0u8; 16];
        perms_plain[..4].copy_from_slice(&permissions.bits().to_le_bytes());
        perms_plain[4..8].copy_from_slice(b"\xff\xff\xff\xff");
        perms_plain[8] = if encrypt_metadata { b'T' } else { b'F' };
        perms_plain[9..12].copy_from_slice(b"adb");
        rand::rng().fill(&mut perms_plain[12..16]);
        let perms_encrypted = cbc_encrypt_no_padding(AesKey::Aes256(&file_key), [0u8; 16], &perms_plain);
        let mut perms_block = [0u8; 16];
        perms_block.copy_from_slice(&perms_encrypted[..16]);

        let key_cell = Arc::new(KeyCell::new());
        key_cell.set(file_key.to_vec());
        let filter: Arc<dyn CryptFilter> = Arc::new(Aes256CryptFilter::new(key_cell.clone()));
        let mut filters = CryptFilterConfig::new(b"StdCF".to_vec(), b"StdCF".to_vec());
        filters.insert(b"StdCF".to_vec(), filter);

        StandardSecurityHandler {
            version: 5,
            revision: 6,
            key_length: 32,
            permissions,
            encrypt_metadata,
            owner_value: owner_value.to_vec(),
            user_value: user_value.to_vec(),
            owner_encrypted: Some(owner_encrypted),
            user_encrypted: Some(user_encrypted),
            perms_encrypted: Some(perms_block),
            key_cell,
            filters,
        }
    }

    pub fn shared_key(&self) -> Result<Vec<u8>> {
        self.key_cell.get()
    }

    /// §4.3 "Authentication", legacy and R6 branches.
    pub fn authenticate(&self, password: &[u8], first_id: &[u8]) -> Result<AuthResult> {
        let result = if self.revision >= 5 {
            self.authenticate_r6(password)?
        } else {
            self.authenticate_legacy(password, first_id)
        };
        if result == AuthResult::Failed {
            self.key_cell.mark_failed();
        }
        Ok(result)
    }

    /// §4.3 authentication entry point for a text password: applies
    /// PDFDocEncoding for legacy revisions or SASLprep for R6 (§4.1) before
    /// delegating to [`Self::authenticate`]. Use this over `authenticate`
    /// when the caller has an actual password string rather than bytes
    /// already in the revision's encoding.
    pub fn authenticate_text(&self, password: &str, first_id: &[u8]) -> Result<AuthResult> {
        if self.revision >= 5 {
            self.authenticate(&sanitize_password_r6(password), first_id)
        } else {
            self.authenticate(&pdf_doc_encode(password), first_id)
        }
    }

    fn authenticate_legacy(&self, password: &[u8], first_id: &[u8]) -> AuthResult {
        let padded = sanitize_password_r4(password);
        let file_key = compute_file_key_r4(
            &padded,
            &self.owner_value,
            self.permissions,
            first_id,
            self.revision,
            self.key_length,
            self.encrypt_metadata,
        );

        if self.recomputed_u_matches(&file_key, first_id) {
            self.key_cell.set(file_key);
            return AuthResult::User;
        }

        // Owner path: recover the candidate user password from `/O` (Algorithm 7)
        // and re-attempt user authentication with it.
        let padded_owner = sanitize_password_r4(password);
        let mut hash = Md5::digest(padded_owner).to_vec();
        let n = if self.revision >= 3 { self.key_length } else { 5 };
        if self.revision >= 3 {
            for _ in 0..50 {
                hash = Md5::digest(&hash[..n]).to_vec();
            }
        }

        let mut recovered = self.owner_value.clone();
        if self.revision >= 3 {
            let mut key = vec![0u8; n];
            for i in (1u8..=19).rev() {
                for (in_byte, out_byte) in hash[..n].iter().zip(key.iter_mut()) {
                    *out_byte = in_byte ^ i;
                }
                recovered = Rc4::new(&key).decrypt(&recovered);
            }
        }
        recovered = Rc4::new(&hash[..n]).decrypt(&recovered);

        let recovered_padded = sanitize_password_r4(&recovered);
        let owner_file_key = compute_file_key_r4(
            &recovered_padded,
            &self.owner_value,
            self.permissions,
            first_id,
            self.revision,
            self.key_length,
            self.encrypt_metadata,
        );

        if self.recomputed_u_matches(&owner_file_key, first_id) {
            self.key_cell.set(owner_file_key);
            AuthResult::Owner
        } else {
            AuthResult::Failed
        }
    }

    fn recomputed_u_matches(&self, file_key: &[u8], first_id: &[u8]) -> bool {
        let recomputed = if self.revision <= 2 {
            compute_u_r2(file_key)
        } else {
            compute_u_r3_r4(file_key, first_id)
        };
        let compare_len = if self.revision <= 2 { 32 } else { 16 };
        self.user_value.len() >= compare_len
            && recomputed.len() >= compare_len
            && recomputed[..compare_len] == self.user_value[..compare_len]
    }

    fn authenticate_r6(&self, password: &[u8]) -> Result<AuthResult> {
        let password = &password[..password.len().min(127)];

        let hashed_owner = &self.owner_value[0..32];
        let owner_validation_salt = &self.owner_value[32..40];
        let owner_key_salt = &self.owner_value[40..48];

        let hashed_user = &self.user_value[0..32];
        let user_validation_salt = &self.user_value[32..40];
        let user_key_salt = &self.user_value[40..48];

        if hash_r6::compute_hash(password, owner_validation_salt, Some(&self.user_value)) == *hashed_owner {
            let key_hash = hash_r6::compute_hash(password, owner_key_salt, Some(&self.user_value));
            let oe = self
                .owner_encrypted
                .as_ref()
                .expect("R6 handler always carries /OE");
            let file_key = cbc_decrypt_no_padding(AesKey::Aes256(&key_hash), [0u8; 16], oe);
            self.verify_perms(&file_key)?;
            self.key_cell.set(file_key);
            return Ok(AuthResult::Owner);
        }

        if hash_r6::compute_hash(password, user_validation_salt, None) == *hashed_user {
            let key_hash = hash_r6::compute_hash(password, user_key_salt, None);
            let ue = self
                .user_encrypted
                .as_ref()
                .expect("R6 handler always carries /UE");
            let file_key = cbc_decrypt_no_padding(AesKey::Aes256(&key_hash), [0u8; 16], ue);
            self.verify_perms(&file_key)?;
            self.key_cell.set(file_key);
            return Ok(AuthResult::User);
        }

        Ok(AuthResult::Failed)
    }

    /// Algorithm 13: verifies the `/Perms` entry decrypts to the expected
    /// permissions/metadata marker. A mismatch is tampering, not merely a
    /// failed password, so it is reported as an error rather than `Failed`.
    fn verify_perms(&self, file_key: &[u8]) -> Result<()> {
        let perms = self.perms_encrypted.expect("R6 handler always carries /Perms");
        let decrypted = cbc_decrypt_no_padding(AesKey::Aes256(file_key), [0u8; 16], &perms);

        if &decrypted[9..12] != b"adb" {
            return Err(CoreError::Tamper("/Perms marker bytes do not read \"adb\""));
        }
        if decrypted[..4] != self.permissions.bits().to_le_bytes() {
            return Err(CoreError::Tamper("/Perms permissions do not match /P"));
        }
        let expected_metadata_flag = if self.encrypt_metadata { b'T' } else { b'F' };
        if decrypted[8] != expected_metadata_flag {
            return Err(CoreError::Tamper("/Perms metadata flag does not match /EncryptMetadata"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn r3_round_trip_authenticates_with_user_password() {
        let first_id = [0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff];
        let handler = StandardSecurityHandler::build_legacy(
            b"abcd",
            Some(b"owner"),
            3,
            16,
            Permissions::from_bits_retain(-44),
            &first_id,
            true,
        );

        let result = handler.authenticate(b"abcd", &first_id).unwrap();
        assert_eq!(result, AuthResult::User);
        assert_eq!(handler.shared_key().unwrap().len(), 16);
    }

    #[test]
    fn r3_owner_password_authenticates_as_owner() {
        let first_id = [0u8; 16];
        let handler = StandardSecurityHandler::build_legacy(
            b"abcd",
            Some(b"owner"),
            3,
            16,
            Permissions::all(),
            &first_id,
            true,
        );

        let result = handler.authenticate(b"owner", &first_id).unwrap();
        assert_eq!(result, AuthResult::Owner);
    }

    #[test]
    fn r3_wrong_password_fails_and_latches() {
        let first_id = [0u8; 16];
        let handler = StandardSecurityHandler::build_legacy(
            b"abcd",
            Some(b"owner"),
            3,
            16,
            Permissions::all(),
            &first_id,
            true,
        );

        let result = handler.authenticate(b"nope", &first_id).unwrap();
        assert_eq!(result, AuthResult::Failed);
        assert!(handler.shared_key().is_err());
    }

    #[test]
    fn r6_round_trip_distinguishes_user_and_owner() {
        let handler = StandardSecurityHandler::build_r6("pass", Some("ownerpw"), Permissions::all(), true);

        assert_eq!(handler.authenticate(b"pass", &[]).unwrap(), AuthResult::User);
    }

    #[test]
    fn r6_owner_password_authenticates_as_owner() {
        let handler = StandardSecurityHandler::build_r6("pass", Some("ownerpw"), Permissions::all(), true);
        assert_eq!(handler.authenticate(b"ownerpw", &[]).unwrap(), AuthResult::Owner);
    }

    #[test]
    fn r6_tampered_perms_is_a_tamper_error_not_a_failed_auth() {
        let mut handler = StandardSecurityHandler::build_r6("pass", None, Permissions::all(), true);
        let mut perms = handler.perms_encrypted.unwrap();
        perms[0] ^= 0xFF;
        handler.perms_encrypted = Some(perms);

        let err = handler.authenticate(b"pass", &[]).unwrap_err();
        assert!(matches!(err, CoreError::Tamper(_)));
    }
}
