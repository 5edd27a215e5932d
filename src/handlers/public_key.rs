//! The `/Adobe.PubSec` security handler (§4.4): certificate-based recipient
//! key transport via a small hand-derived subset of CMS `EnvelopedData`
//! (RFC 5652 §6), rather than the full signed-data surface of a
//! general-purpose CMS library — this handler only ever produces and
//! consumes `KeyTransRecipientInfo` over RSA, so the sequences below are
//! all that's needed.

use std::sync::Arc;

use const_oid::ObjectIdentifier;
use der::asn1::{Any, OctetString, SetOfVec};
use der::{Decode, Encode, Sequence};
use rand::Rng as _;
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use spki::AlgorithmIdentifierOwned;
use x509_cert::name::Name;
use x509_cert::serial_number::SerialNumber;

use crate::crypt_filter::aes_filter::{Aes128CryptFilter, Aes256CryptFilter};
use crate::crypt_filter::rc4_filter::Rc4CryptFilter;
use crate::crypt_filter::{CryptFilter, CryptFilterConfig, KeyCell};
use crate::crypto::aes_util::{cbc_decrypt_pkcs5, cbc_encrypt_pkcs5, AesKey};
use crate::error::{AuthenticationError, CoreError, ReadError, Result, UnsupportedError};
use crate::handlers::{AuthResult, Handler};
use crate::model::{Dictionary, Object};

const ID_DATA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.7.1");
const ID_ENVELOPED_DATA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.7.3");
const RSA_ENCRYPTION: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.1");
const AES_256_CBC: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.1.42");

#[derive(Sequence)]
struct IssuerAndSerialNumber {
    issuer: Name,
    serial_number: SerialNumber,
}

/// `RecipientIdentifier` degenerates to just the `issuerAndSerialNumber`
/// alternative: `subjectKeyIdentifier` recipients are not produced or
/// accepted.
#[derive(Sequence)]
struct KeyTransRecipientInfo {
    version: u8,
    rid: IssuerAndSerialNumber,
    key_encryption_algorithm: AlgorithmIdentifierOwned,
    encrypted_key: OctetString,
}

/// `aes256-CBC`'s `AlgorithmIdentifier.parameters` is just the IV as a bare
/// OCTET STRING (RFC 3565 §4.1), not a nested SEQUENCE, so this is typed
/// directly rather than going through the general `ANY`-typed
/// `AlgorithmIdentifier`.
#[derive(Sequence)]
struct AesCbcAlgorithmIdentifier {
    algorithm: ObjectIdentifier,
    iv: OctetString,
}

#[derive(Sequence)]
struct EncryptedContentInfo {
    content_type: ObjectIdentifier,
    content_encryption_algorithm: AesCbcAlgorithmIdentifier,
    #[asn1(context_specific = "0", optional = "true")]
    encrypted_content: Option<OctetString>,
}

#[derive(Sequence)]
struct EnvelopedData {
    version: u8,
    recipient_infos: SetOfVec<KeyTransRecipientInfo>,
    encrypted_content_info: EncryptedContentInfo,
}

#[derive(Sequence)]
struct ContentInfo {
    content_type: ObjectIdentifier,
    #[asn1(context_specific = "0", tag_mode = "EXPLICIT")]
    content: Any,
}

/// Identifies a recipient the way CMS does: by the issuer name and serial
/// number of their certificate, not the certificate itself. This core
/// never walks a certificate chain or checks validity periods, so nothing
/// past those two fields is needed.
#[derive(Debug, Clone)]
pub struct RecipientIdentity {
    pub issuer: Name,
    pub serial: SerialNumber,
}

/// A recipient's identity plus the RSA public key used to wrap an
/// envelope key for them, as supplied to a document's author at
/// encryption time.
pub struct Recipient {
    pub identity: RecipientIdentity,
    pub public_key: RsaPublicKey,
}

/// Something that holds a recipient's private key and can unwrap an
/// encrypted envelope key addressed to it (§4.4.1).
pub trait EnvelopeKeyDecrypter: std::fmt::Debug + Send + Sync {
    fn matches(&self, issuer: &Name, serial: &SerialNumber) -> bool;
    fn unwrap_envelope_key(&self, encrypted_key: &[u8]) -> Result<Vec<u8>>;
}

#[derive(Debug)]
pub struct SimpleEnvelopeKeyDecrypter {
    identity: RecipientIdentity,
    private_key: RsaPrivateKey,
}

impl SimpleEnvelopeKeyDecrypter {
    pub fn new(identity: RecipientIdentity, private_key: RsaPrivateKey) -> Self {
        SimpleEnvelopeKeyDecrypter { identity, private_key }
    }
}

impl EnvelopeKeyDecrypter for SimpleEnvelopeKeyDecrypter {
    fn matches(&self, issuer: &Name, serial: &SerialNumber) -> bool {
        self.identity.issuer == *issuer && self.identity.serial == *serial
    }

    fn unwrap_envelope_key(&self, encrypted_key: &[u8]) -> Result<Vec<u8>> {
        self.private_key
            .decrypt(Pkcs1v15Encrypt, encrypted_key)
            .map_err(|_| CoreError::Authentication(AuthenticationError::NoMatchingRecipient))
    }
}

#[derive(Debug)]
pub struct PublicKeySecurityHandler {
    pub version: i64,
    pub encrypt_metadata: bool,
    pub key_length: usize,
    use_sha256: bool,
    recipient_cms_der: Vec<Vec<u8>>,
    key_cell: Arc<KeyCell>,
    pub filters: CryptFilterConfig,
}

pub(crate) fn build_from_dict(dict: &Dictionary) -> Result<Handler> {
    let version = dict.get(b"V").and_then(Object::as_i64).unwrap_or(1);
    let encrypt_metadata = dict.get(b"EncryptMetadata").and_then(Object::as_bool).unwrap_or(true);
    let length_bits = dict.get(b"Length").and_then(Object::as_i64).unwrap_or(40);
    let key_length = (length_bits / 8) as usize;
    let use_sha256 = version >= 5;

    let key_cell = Arc::new(KeyCell::new());
    let mut cf_entries: Vec<(Vec<u8>, Arc<dyn CryptFilter>)> = Vec::new();
    let mut recipient_cms_der = Vec::new();
    let stream_name;
    let string_name;

    if let Ok(cf_dict) = dict.get(b"CF").and_then(Object::as_dict) {
        for (name, entry) in cf_dict.iter() {
            let entry_dict = entry.as_dict()?;
            let cfm = entry_dict.get(b"CFM").and_then(Object::as_name).unwrap_or(b"Identity");
            let filter: Arc<dyn CryptFilter> = match cfm {
                b"V2" => Arc::new(Rc4CryptFilter::new(key_cell.clone())),
                b"AESV2" => Arc::new(Aes128CryptFilter::new(key_cell.clone())),
                b"AESV3" => Arc::new(Aes256CryptFilter::new(key_cell.clone())),
                other => return Err(CoreError::Unsupported(UnsupportedError::CryptFilterMethod(other.to_vec()))),
            };
            cf_entries.push((name.clone(), filter));

            if let Ok(recipients) = entry_dict.get(b"Recipients").and_then(Object::as_array) {
                for recipient in recipients {
                    recipient_cms_der.push(recipient.as_str()?.to_vec());
                }
            }
        }
        stream_name = dict.get(b"StmF").and_then(Object::as_name).unwrap_or(b"Identity").to_vec();
        string_name = dict.get(b"StrF").and_then(Object::as_name).unwrap_or(b"Identity").to_vec();
    } else {
        // SubFilter s3/s4: a single implicit RC4 filter, recipients live at
        // the top level of the encryption dictionary.
        if let Ok(recipients) = dict.get(b"Recipients").and_then(Object::as_array) {
            for recipient in recipients {
                recipient_cms_der.push(recipient.as_str()?.to_vec());
            }
        }
        let filter: Arc<dyn CryptFilter> = Arc::new(Rc4CryptFilter::new(key_cell.clone()));
        cf_entries.push((b"DefaultCryptFilter".to_vec(), filter));
        stream_name = b"DefaultCryptFilter".to_vec();
        string_name = b"DefaultCryptFilter".to_vec();
    }

    let mut filters = CryptFilterConfig::new(stream_name, string_name);
    for (name, filter) in cf_entries {
        filters.insert(name, filter);
    }

    Ok(Handler::PublicKey(PublicKeySecurityHandler {
        version,
        encrypt_metadata,
        key_length,
        use_sha256,
        recipient_cms_der,
        key_cell,
        filters,
    }))
}

impl PublicKeySecurityHandler {
    /// §4.4 "Recipient CMS construction". Produces a handler with the
    /// shared key already installed (the builder knows the seed it just
    /// generated) plus the DER blob to store under `/Recipients`.
    pub fn build_from_recipients(recipients: &[Recipient], permissions: i32, encrypt_metadata: bool, key_length: usize) -> Result<(Self, Vec<u8>)> {
        let use_sha256 = key_length == 32;

        let mut seed = [0u8; 20];
        rand::rng().fill(&mut seed);

        let der = construct_recipient_cms(recipients, &seed, permissions)?;
        let recipient_cms_der = vec![der.clone()];

        let shared_key = compute_shared_key(&seed, &recipient_cms_der, encrypt_metadata, key_length, use_sha256);

        let key_cell = Arc::new(KeyCell::new());
        key_cell.set(shared_key);

        let filter: Arc<dyn CryptFilter> = if use_sha256 {
            Arc::new(Aes256CryptFilter::new(key_cell.clone()))
        } else {
            Arc::new(Rc4CryptFilter::new(key_cell.clone()))
        };
        let mut filters = CryptFilterConfig::new(b"DefaultCryptFilter".to_vec(), b"DefaultCryptFilter".to_vec());
        filters.insert(b"DefaultCryptFilter".to_vec(), filter);

        Ok((
            PublicKeySecurityHandler {
                version: if use_sha256 { 5 } else { 4 },
                encrypt_metadata,
                key_length,
                use_sha256,
                recipient_cms_der,
                key_cell,
                filters,
            },
            der,
        ))
    }

    pub fn shared_key(&self) -> Result<Vec<u8>> {
        self.key_cell.get()
    }

    /// §4.4 "Authentication": try to recover the seed from each recipient
    /// CMS object on file with the supplied decrypter.
    pub fn authenticate(&self, decrypter: &dyn EnvelopeKeyDecrypter) -> Result<AuthResult> {
        for der in &self.recipient_cms_der {
            match recover_seed(der, decrypter) {
                Ok(Some(seed)) => {
                    let shared_key = compute_shared_key(&seed, &self.recipient_cms_der, self.encrypt_metadata, self.key_length, self.use_sha256);
                    self.key_cell.set(shared_key);
                    return Ok(AuthResult::User);
                }
                Ok(None) => continue,
                Err(err) => return Err(err),
            }
        }
        self.key_cell.mark_failed();
        Ok(AuthResult::Failed)
    }
}

/// §4.4 "Recipient CMS construction". The envelope content is the 20-byte
/// seed followed by the 4-byte little-endian permission mask, per ISO
/// 32000-2 7.6.5.
fn construct_recipient_cms(recipients: &[Recipient], seed: &[u8; 20], permissions: i32) -> Result<Vec<u8>> {
    let mut envelope_content = seed.to_vec();
    envelope_content.extend_from_slice(&permissions.to_le_bytes());

    let mut envelope_key = [0u8; 32];
    rand::rng().fill(&mut envelope_key);
    let mut iv = [0u8; 16];
    rand::rng().fill(&mut iv);
    let encrypted_envelope_content = cbc_encrypt_pkcs5(AesKey::Aes256(&envelope_key), iv, &envelope_content);

    let mut recipient_infos = SetOfVec::new();
    for recipient in recipients {
        let encrypted_key = recipient
            .public_key
            .encrypt(&mut rand::rng(), Pkcs1v15Encrypt, &envelope_key)
            .map_err(|_| CoreError::InvalidArgument("RSA encryption of envelope key failed"))?;

        let ktri = KeyTransRecipientInfo {
            version: 0,
            rid: IssuerAndSerialNumber {
                issuer: recipient.identity.issuer.clone(),
                serial_number: recipient.identity.serial.clone(),
            },
            key_encryption_algorithm: AlgorithmIdentifierOwned {
                oid: RSA_ENCRYPTION,
                parameters: None,
            },
            encrypted_key: OctetString::new(encrypted_key).map_err(|_| CoreError::InvalidArgument("envelope key too large to encode"))?,
        };
        recipient_infos
            .insert(ktri)
            .map_err(|_| CoreError::InvalidArgument("duplicate recipient in CMS set"))?;
    }

    let content_encryption_algorithm = AesCbcAlgorithmIdentifier {
        algorithm: AES_256_CBC,
        iv: OctetString::new(iv.to_vec()).expect("16-byte IV always encodes"),
    };

    let enveloped_data = EnvelopedData {
        version: 0,
        recipient_infos,
        encrypted_content_info: EncryptedContentInfo {
            content_type: ID_DATA,
            content_encryption_algorithm,
            encrypted_content: Some(
                OctetString::new(encrypted_envelope_content).map_err(|_| CoreError::InvalidArgument("encrypted envelope content too large"))?,
            ),
        },
    };

    let enveloped_der = enveloped_data.to_der().map_err(|_| CoreError::InvalidArgument("failed to DER-encode EnvelopedData"))?;

    let content_info = ContentInfo {
        content_type: ID_ENVELOPED_DATA,
        content: Any::from_der(&enveloped_der).map_err(|_| CoreError::InvalidArgument("failed to wrap EnvelopedData as ANY"))?,
    };

    content_info.to_der().map_err(|_| CoreError::InvalidArgument("failed to DER-encode ContentInfo"))
}

/// §4.4 "Recipient seed recovery". Returns `Ok(None)` when no recipient
/// info in this CMS object matches the decrypter (try the next CMS
/// object); returns an error only for a structurally malformed blob or an
/// unsupported algorithm.
fn recover_seed(der: &[u8], decrypter: &dyn EnvelopeKeyDecrypter) -> Result<Option<[u8; 20]>> {
    let content_info = ContentInfo::from_der(der).map_err(|_| CoreError::Read(ReadError::Parse { offset: 0 }))?;
    if content_info.content_type != ID_ENVELOPED_DATA {
        return Err(CoreError::Read(ReadError::Parse { offset: 0 }));
    }

    let enveloped_der = content_info.content.to_der().map_err(|_| CoreError::Read(ReadError::Parse { offset: 0 }))?;
    let enveloped_data = EnvelopedData::from_der(&enveloped_der).map_err(|_| CoreError::Read(ReadError::Parse { offset: 0 }))?;

    for ktri in enveloped_data.recipient_infos.iter() {
        if !decrypter.matches(&ktri.rid.issuer, &ktri.rid.serial_number) {
            continue;
        }
        if ktri.key_encryption_algorithm.oid != RSA_ENCRYPTION {
            return Err(CoreError::Unsupported(UnsupportedError::NonRsaRecipient(ktri.key_encryption_algorithm.oid.to_string())));
        }

        let envelope_key = decrypter.unwrap_envelope_key(ktri.encrypted_key.as_bytes())?;

        let encrypted_content = enveloped_data
            .encrypted_content_info
            .encrypted_content
            .as_ref()
            .ok_or(CoreError::Read(ReadError::Parse { offset: 0 }))?;

        let plaintext = decrypt_envelope_content(&enveloped_data.encrypted_content_info.content_encryption_algorithm, &envelope_key, encrypted_content.as_bytes())?;

        if plaintext.len() < 20 {
            return Err(CoreError::Read(ReadError::Parse { offset: 0 }));
        }
        let mut seed = [0u8; 20];
        seed.copy_from_slice(&plaintext[..20]);
        return Ok(Some(seed));
    }

    Ok(None)
}

/// Envelope content is always AES-256-CBC when we are the producer. A
/// third-party CMS blob naming any other cipher (DES/3DES/RC2/RC4) is
/// rejected: ISO 32000-2 doesn't oblige a producer to support them, and
/// no maintained RustCrypto crate covers the legacy ones here.
fn decrypt_envelope_content(algorithm: &AesCbcAlgorithmIdentifier, envelope_key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    if algorithm.algorithm != AES_256_CBC {
        return Err(CoreError::Unsupported(UnsupportedError::Cipher(algorithm.algorithm.to_string())));
    }
    if algorithm.iv.as_bytes().len() != 16 {
        return Err(CoreError::Read(ReadError::Parse { offset: 0 }));
    }
    let mut iv = [0u8; 16];
    iv.copy_from_slice(algorithm.iv.as_bytes());
    let key: &[u8; 32] = envelope_key
        .try_into()
        .map_err(|_| CoreError::Unsupported(UnsupportedError::KeyLength(envelope_key.len())))?;
    cbc_decrypt_pkcs5(AesKey::Aes256(key), iv, ciphertext).ok_or(CoreError::Read(ReadError::Parse { offset: 0 }))
}

/// §4.2 "Public-key variant", shared-key derivation from the recovered
/// seed: hash the seed, then the raw DER of every recipient CMS object on
/// file, then (if metadata is left unencrypted) four 0xFF bytes. SHA-256
/// for the AES-256 handler, SHA-1 otherwise, truncated to the key length.
fn compute_shared_key(seed: &[u8; 20], recipient_cms_der: &[Vec<u8>], encrypt_metadata: bool, key_length: usize, use_sha256: bool) -> Vec<u8> {
    let mut input = seed.to_vec();
    for der in recipient_cms_der {
        input.extend_from_slice(der);
    }
    if !encrypt_metadata {
        input.extend_from_slice(&[0xFF, 0xFF, 0xFF, 0xFF]);
    }

    let digest = if use_sha256 {
        Sha256::digest(&input).to_vec()
    } else {
        use sha1::Digest as _;
        Sha1::digest(&input).to_vec()
    };

    digest[..key_length.min(digest.len())].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn identity(serial: u8) -> RecipientIdentity {
        RecipientIdentity {
            issuer: Name::from_str("CN=Test Recipient").unwrap(),
            serial: SerialNumber::new(&[serial]).unwrap(),
        }
    }

    #[test]
    fn matching_recipient_recovers_a_key_of_the_requested_length() {
        let key_a = RsaPrivateKey::new(&mut rand::rng(), 1024).unwrap();
        let key_b = RsaPrivateKey::new(&mut rand::rng(), 1024).unwrap();

        let recipients = vec![
            Recipient {
                identity: identity(1),
                public_key: RsaPublicKey::from(&key_a),
            },
            Recipient {
                identity: identity(2),
                public_key: RsaPublicKey::from(&key_b),
            },
        ];

        let (handler, _der) = PublicKeySecurityHandler::build_from_recipients(&recipients, -4, true, 32).unwrap();

        let decrypter_b = SimpleEnvelopeKeyDecrypter::new(identity(2), key_b);
        let result = handler.authenticate(&decrypter_b).unwrap();
        assert_eq!(result, AuthResult::User);
        assert_eq!(handler.shared_key().unwrap().len(), 32);
    }

    #[test]
    fn two_recipients_of_the_same_document_recover_the_same_key() {
        let key_a = RsaPrivateKey::new(&mut rand::rng(), 1024).unwrap();
        let key_b = RsaPrivateKey::new(&mut rand::rng(), 1024).unwrap();

        let recipients = vec![
            Recipient {
                identity: identity(1),
                public_key: RsaPublicKey::from(&key_a),
            },
            Recipient {
                identity: identity(2),
                public_key: RsaPublicKey::from(&key_b),
            },
        ];

        let (handler_a, der) = PublicKeySecurityHandler::build_from_recipients(&recipients, -4, true, 32).unwrap();
        handler_a.authenticate(&SimpleEnvelopeKeyDecrypter::new(identity(1), key_a)).unwrap();
        let key_from_a = handler_a.shared_key().unwrap();

        // A second handler view over the same on-disk `/Recipients` blob,
        // as a reader opening the document would construct, recovered by
        // the other recipient.
        let handler_b = PublicKeySecurityHandler {
            version: 5,
            encrypt_metadata: true,
            key_length: 32,
            use_sha256: true,
            recipient_cms_der: vec![der],
            key_cell: Arc::new(KeyCell::new()),
            filters: CryptFilterConfig::new(b"DefaultCryptFilter".to_vec(), b"DefaultCryptFilter".to_vec()),
        };
        handler_b.authenticate(&SimpleEnvelopeKeyDecrypter::new(identity(2), key_b)).unwrap();
        let key_from_b = handler_b.shared_key().unwrap();

        assert_eq!(key_from_a, key_from_b);
    }

    #[test]
    fn unrelated_decrypter_fails_and_latches() {
        let key_a = RsaPrivateKey::new(&mut rand::rng(), 1024).unwrap();
        let key_c = RsaPrivateKey::new(&mut rand::rng(), 1024).unwrap();

        let recipients = vec![Recipient {
            identity: identity(1),
            public_key: RsaPublicKey::from(&key_a),
        }];

        let (handler, _der) = PublicKeySecurityHandler::build_from_recipients(&recipients, -4, true, 32).unwrap();
        let decrypter_c = SimpleEnvelopeKeyDecrypter::new(identity(99), key_c);
        assert_eq!(handler.authenticate(&decrypter_c).unwrap(), AuthResult::Failed);
        assert!(handler.shared_key().is_err());
    }
}
