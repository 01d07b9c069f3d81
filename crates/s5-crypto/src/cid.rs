//! S5 content identifiers
//!
//! Two CID types are handled here:
//!
//! ```text
//! raw:       [0x26][multihash: 33][size: LE, trailing zero bytes trimmed]
//! encrypted: [0xae][algorithm][chunk pow2][encrypted multihash: 33][key: 32]
//!            [padding: u32 LE][raw CID bytes]
//! ```
//!
//! Both are rendered as `'u'` followed by base64url without padding. A file
//! extension appended after a `.` is ignored when decoding.

use crate::hashing::{Blake3Hash, Multihash, MULTIHASH_BYTE_SIZE};
use crate::keys::{EncryptionKey, KEY_SIZE};
use crate::{CryptoError, Result, CHUNK_SIZE_POW2, ENCRYPTION_ALGORITHM_XCHACHA20_POLY1305};
use base64::Engine;
use std::fmt;
use std::str::FromStr;

/// CID type byte for unencrypted blobs
pub const CID_TYPE_RAW: u8 = 0x26;

/// CID type byte for encrypted blobs
pub const CID_TYPE_ENCRYPTED: u8 = 0xae;

/// Multibase prefix for base64url without padding
pub const MULTIBASE_BASE64URL: char = 'u';

const MAX_SIZE_BYTES: usize = 8;

const ENC_HASH_OFFSET: usize = 3;
const ENC_KEY_OFFSET: usize = ENC_HASH_OFFSET + MULTIHASH_BYTE_SIZE;
const ENC_PADDING_OFFSET: usize = ENC_KEY_OFFSET + KEY_SIZE;
const ENC_CID_OFFSET: usize = ENC_PADDING_OFFSET + 4;

/// Split a CID string into its decoded bytes, dropping any `.ext` suffix
fn decode_multibase(s: &str) -> Result<Vec<u8>> {
    let s = s.trim();
    let s = s.split('.').next().unwrap_or(s);
    let mut chars = s.chars();
    match chars.next() {
        Some(MULTIBASE_BASE64URL) => {}
        Some(other) => {
            return Err(CryptoError::UnsupportedFormat(format!(
                "multibase prefix '{other}'"
            )))
        }
        None => return Err(CryptoError::InvalidCid("empty CID".to_string())),
    }
    base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(chars.as_str())
        .map_err(|e| CryptoError::InvalidCid(e.to_string()))
}

fn encode_multibase(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(1 + bytes.len().div_ceil(3) * 4);
    out.push(MULTIBASE_BASE64URL);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode_string(bytes, &mut out);
    out
}

/// A raw (unencrypted) CID: content multihash plus content size
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Cid {
    hash: Multihash,
    size: u64,
}

impl Cid {
    /// Build a CID from a BLAKE3 digest and the content length
    pub fn from_hash(hash: Blake3Hash, size: u64) -> Self {
        Self {
            hash: hash.to_multihash(),
            size,
        }
    }

    /// Build a CID from an existing multihash
    pub fn from_multihash(hash: Multihash, size: u64) -> Self {
        Self { hash, size }
    }

    /// The content multihash
    pub fn hash(&self) -> &Multihash {
        &self.hash
    }

    /// The content size in bytes
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Binary form
    pub fn to_bytes(&self) -> Vec<u8> {
        let size = self.size.to_le_bytes();
        let used = MAX_SIZE_BYTES - size.iter().rev().take_while(|&&b| b == 0).count();

        let mut out = Vec::with_capacity(1 + MULTIHASH_BYTE_SIZE + used);
        out.push(CID_TYPE_RAW);
        out.extend_from_slice(self.hash.as_bytes());
        out.extend_from_slice(&size[..used]);
        out
    }

    /// Parse the binary form
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let (&kind, rest) = bytes
            .split_first()
            .ok_or_else(|| CryptoError::InvalidCid("empty CID".to_string()))?;
        if kind != CID_TYPE_RAW {
            return Err(CryptoError::UnsupportedFormat(format!("CID type 0x{kind:02x}")));
        }
        if rest.len() < MULTIHASH_BYTE_SIZE {
            return Err(CryptoError::InvalidCid(format!(
                "raw CID too short: {} bytes",
                bytes.len()
            )));
        }
        let (hash, size_bytes) = rest.split_at(MULTIHASH_BYTE_SIZE);
        if size_bytes.len() > MAX_SIZE_BYTES {
            return Err(CryptoError::InvalidCid(format!(
                "size field of {} bytes",
                size_bytes.len()
            )));
        }
        let mut size = [0u8; MAX_SIZE_BYTES];
        size[..size_bytes.len()].copy_from_slice(size_bytes);

        Ok(Self {
            hash: Multihash::from_bytes(hash)?,
            size: u64::from_le_bytes(size),
        })
    }

    /// String form, `'u'` + base64url
    pub fn encode(&self) -> String {
        encode_multibase(&self.to_bytes())
    }

    /// Parse the string form
    pub fn decode(s: &str) -> Result<Self> {
        Self::from_bytes(&decode_multibase(s)?)
    }
}

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for Cid {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self> {
        Self::decode(s)
    }
}

/// An encrypted CID: addresses the ciphertext and carries what is needed to
/// decrypt and verify it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncryptedCid {
    algorithm: u8,
    chunk_size_pow2: u8,
    encrypted_hash: Multihash,
    key: EncryptionKey,
    padding: u32,
    original: Cid,
}

impl EncryptedCid {
    /// Describe an XChaCha20-Poly1305 blob with the default chunk size
    pub fn new(encrypted_hash: Multihash, key: EncryptionKey, padding: u32, original: Cid) -> Self {
        Self {
            algorithm: ENCRYPTION_ALGORITHM_XCHACHA20_POLY1305,
            chunk_size_pow2: CHUNK_SIZE_POW2,
            encrypted_hash,
            key,
            padding,
            original,
        }
    }

    /// Algorithm byte
    pub fn algorithm(&self) -> u8 {
        self.algorithm
    }

    /// Log2 of the plaintext chunk size
    pub fn chunk_size_pow2(&self) -> u8 {
        self.chunk_size_pow2
    }

    /// Plaintext chunk size
    pub fn chunk_size(&self) -> usize {
        1usize << self.chunk_size_pow2
    }

    /// Multihash of the ciphertext blob stored on the network
    pub fn encrypted_hash(&self) -> &Multihash {
        &self.encrypted_hash
    }

    /// Decryption key; all zeros when removed
    pub fn key(&self) -> &EncryptionKey {
        &self.key
    }

    /// Whether the CID still carries a usable key
    pub fn has_key(&self) -> bool {
        !self.key.is_zero()
    }

    /// Bytes to strip from the end of the decrypted output
    pub fn padding(&self) -> u32 {
        self.padding
    }

    /// CID of the plaintext
    pub fn original(&self) -> &Cid {
        &self.original
    }

    /// Binary form
    pub fn to_bytes(&self) -> Vec<u8> {
        let original = self.original.to_bytes();
        let mut out = Vec::with_capacity(ENC_CID_OFFSET + original.len());
        out.push(CID_TYPE_ENCRYPTED);
        out.push(self.algorithm);
        out.push(self.chunk_size_pow2);
        out.extend_from_slice(self.encrypted_hash.as_bytes());
        out.extend_from_slice(self.key.as_bytes());
        out.extend_from_slice(&self.padding.to_le_bytes());
        out.extend_from_slice(&original);
        out
    }

    /// Parse the binary form
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        match bytes.first() {
            Some(&CID_TYPE_ENCRYPTED) => {}
            Some(&other) => {
                return Err(CryptoError::UnsupportedFormat(format!(
                    "CID type 0x{other:02x} is not an encrypted CID"
                )))
            }
            None => return Err(CryptoError::InvalidCid("empty CID".to_string())),
        }
        if bytes.len() < ENC_CID_OFFSET + 1 {
            return Err(CryptoError::InvalidCid(format!(
                "encrypted CID too short: {} bytes",
                bytes.len()
            )));
        }
        let algorithm = bytes[1];
        if algorithm != ENCRYPTION_ALGORITHM_XCHACHA20_POLY1305 {
            return Err(CryptoError::UnsupportedFormat(format!(
                "encryption algorithm 0x{algorithm:02x}"
            )));
        }
        let chunk_size_pow2 = bytes[2];
        if chunk_size_pow2 != CHUNK_SIZE_POW2 {
            return Err(CryptoError::UnsupportedFormat(format!(
                "chunk size 2^{chunk_size_pow2}"
            )));
        }

        let encrypted_hash = Multihash::from_bytes(&bytes[ENC_HASH_OFFSET..ENC_KEY_OFFSET])?;
        let key = EncryptionKey::from_bytes(&bytes[ENC_KEY_OFFSET..ENC_PADDING_OFFSET])?;
        let mut padding = [0u8; 4];
        padding.copy_from_slice(&bytes[ENC_PADDING_OFFSET..ENC_CID_OFFSET]);
        let original = Cid::from_bytes(&bytes[ENC_CID_OFFSET..])?;

        Ok(Self {
            algorithm,
            chunk_size_pow2,
            encrypted_hash,
            key,
            padding: u32::from_le_bytes(padding),
            original,
        })
    }

    /// String form, `'u'` + base64url
    pub fn encode(&self) -> String {
        encode_multibase(&self.to_bytes())
    }

    /// Parse the string form
    pub fn decode(s: &str) -> Result<Self> {
        Self::from_bytes(&decode_multibase(s)?)
    }

    /// The same CID with the key field zeroed
    pub fn without_key(&self) -> Self {
        Self {
            key: EncryptionKey::zeroed(),
            ..self.clone()
        }
    }

    /// String form of [`without_key`](Self::without_key), safe to share publicly
    pub fn to_keyless_string(&self) -> String {
        self.without_key().encode()
    }
}

impl fmt::Display for EncryptedCid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for EncryptedCid {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self> {
        Self::decode(s)
    }
}

/// Zero the key inside an encrypted CID string, leaving every other field intact
pub fn remove_key_from_encrypted_cid(cid: &str) -> Result<String> {
    Ok(EncryptedCid::decode(cid)?.to_keyless_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashing::hash;
    use rstest::rstest;

    fn sample_encrypted(padding: u32) -> EncryptedCid {
        let plain = b"the plaintext";
        let original = Cid::from_hash(hash(plain), plain.len() as u64);
        let key = EncryptionKey::from_bytes(&[0x42; KEY_SIZE]).unwrap();
        EncryptedCid::new(hash(b"the ciphertext").to_multihash(), key, padding, original)
    }

    #[rstest]
    #[case(0, 34)]
    #[case(1, 35)]
    #[case(255, 35)]
    #[case(256, 36)]
    #[case(33_554_432, 38)]
    #[case(u64::MAX, 42)]
    fn test_size_trimming(#[case] size: u64, #[case] expected_len: usize) {
        let cid = Cid::from_hash(hash(b"x"), size);
        let bytes = cid.to_bytes();
        assert_eq!(bytes.len(), expected_len);
        assert_eq!(Cid::from_bytes(&bytes).unwrap().size(), size);
    }

    #[test]
    fn test_raw_cid_layout() {
        let digest = hash(b"hello");
        let bytes = Cid::from_hash(digest, 5).to_bytes();
        assert_eq!(bytes[0], CID_TYPE_RAW);
        assert_eq!(bytes[1], 0x1f);
        assert_eq!(&bytes[2..34], digest.as_bytes());
        assert_eq!(&bytes[34..], &[5]);
    }

    #[test]
    fn test_raw_cid_string_roundtrip() {
        let cid = Cid::from_hash(hash(b"roundtrip"), 1_048_576);
        let encoded = cid.to_string();
        assert!(encoded.starts_with('u'));
        assert!(!encoded.contains('='));

        let decoded: Cid = encoded.parse().unwrap();
        assert_eq!(decoded, cid);
        assert_eq!(decoded.hash().digest(), hash(b"roundtrip"));
    }

    #[test]
    fn test_extension_suffix_ignored() {
        let cid = Cid::from_hash(hash(b"video"), 99);
        let with_ext = format!("{}.mp4", cid.encode());
        assert_eq!(Cid::decode(&with_ext).unwrap(), cid);
    }

    #[test]
    fn test_unsupported_prefix() {
        let cid = Cid::from_hash(hash(b"x"), 1).encode();
        let other = format!("z{}", &cid[1..]);
        assert!(matches!(Cid::decode(&other), Err(CryptoError::UnsupportedFormat(_))));
        assert!(matches!(Cid::decode(""), Err(CryptoError::InvalidCid(_))));
    }

    #[test]
    fn test_encrypted_cid_layout() {
        let enc = sample_encrypted(7);
        let bytes = enc.to_bytes();

        assert_eq!(bytes[0], CID_TYPE_ENCRYPTED);
        assert_eq!(bytes[1], ENCRYPTION_ALGORITHM_XCHACHA20_POLY1305);
        assert_eq!(bytes[2], 18);
        assert_eq!(&bytes[3..36], enc.encrypted_hash().as_bytes());
        assert_eq!(&bytes[36..68], &[0x42; KEY_SIZE]);
        assert_eq!(&bytes[68..72], &[7, 0, 0, 0]);
        assert_eq!(&bytes[72..], enc.original().to_bytes().as_slice());
    }

    #[test]
    fn test_encrypted_cid_roundtrip() {
        let enc = sample_encrypted(0);
        let decoded = EncryptedCid::decode(&enc.encode()).unwrap();
        assert_eq!(decoded, enc);
        assert_eq!(decoded.key().as_bytes(), &[0x42; KEY_SIZE]);
        assert_eq!(decoded.original(), enc.original());
        assert_eq!(decoded.chunk_size(), crate::CHUNK_SIZE);
        assert!(decoded.has_key());
    }

    #[test]
    fn test_remove_key_zeroes_only_key() {
        let enc = sample_encrypted(3);
        let keyless = remove_key_from_encrypted_cid(&enc.encode()).unwrap();

        let decoded = EncryptedCid::decode(&keyless).unwrap();
        assert!(!decoded.has_key());
        assert_eq!(decoded.encrypted_hash(), enc.encrypted_hash());
        assert_eq!(decoded.padding(), 3);
        assert_eq!(decoded.original(), enc.original());

        let before = enc.to_bytes();
        let after = decoded.to_bytes();
        assert_eq!(before.len(), after.len());
        assert_eq!(&before[..36], &after[..36]);
        assert_eq!(&before[68..], &after[68..]);
        assert!(after[36..68].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_raw_cid_is_not_encrypted() {
        let raw = Cid::from_hash(hash(b"plain"), 5).encode();
        assert!(matches!(
            EncryptedCid::decode(&raw),
            Err(CryptoError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_unknown_algorithm_rejected() {
        let mut bytes = sample_encrypted(0).to_bytes();
        bytes[1] = 0x01;
        assert!(matches!(
            EncryptedCid::from_bytes(&bytes),
            Err(CryptoError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_truncated_encrypted_cid() {
        let bytes = sample_encrypted(0).to_bytes();
        assert!(matches!(
            EncryptedCid::from_bytes(&bytes[..50]),
            Err(CryptoError::InvalidCid(_))
        ));
    }
}
