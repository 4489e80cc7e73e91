use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use cbc::cipher::block_padding::Iso10126;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;
use thiserror::Error;

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes192CbcEnc = cbc::Encryptor<aes::Aes192>;
type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;
type Aes192CbcDec = cbc::Decryptor<aes::Aes192>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

const IV_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("unsupported cipher algorithm '{0}'")]
    UnsupportedAlgorithm(String),

    #[error("invalid key length: {0} bytes (expected 16, 24 or 32)")]
    InvalidKeyLength(usize),

    #[error("invalid key size: {0} bits")]
    InvalidKeySize(usize),

    #[error("base64 decoding failed: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("initialisation vector must be {IV_LEN} bytes, got {0}")]
    InvalidIv(usize),

    #[error("decryption failed: wrong key or corrupt ciphertext")]
    Unpad,

    #[error("decrypted text is not valid UTF-8")]
    InvalidUtf8,

    #[error("malformed ciphertext: {0}")]
    Malformed(String),

    #[error("OTP interval must be non-zero")]
    ZeroInterval,

    #[error("key material {path}: {source}")]
    KeyMaterial {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("key material {path} exhausted at offset {offset}")]
    KeyMaterialExhausted { path: PathBuf, offset: u64 },
}

/// Output of one encryption: base64 IV and ciphertext body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub iv: String,
    pub body: String,
}

impl fmt::Display for Sealed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.iv, self.body)
    }
}

/// Symmetric encryption of one payload at a time.
pub trait Encryptor: Send + Sync + fmt::Debug {
    fn encrypt(&self, plaintext: &str) -> Result<Sealed, CryptoError>;

    fn decrypt(&self, iv: &str, body: &str) -> Result<String, CryptoError>;
}

/// Block cipher algorithms accepted in key strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Aes,
}

impl Algorithm {
    pub fn is_valid_key_len(self, len: usize) -> bool {
        match self {
            Algorithm::Aes => matches!(len, 16 | 24 | 32),
        }
    }
}

impl FromStr for Algorithm {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("aes") {
            Ok(Algorithm::Aes)
        } else {
            Err(CryptoError::UnsupportedAlgorithm(s.to_string()))
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Algorithm::Aes => f.write_str("AES"),
        }
    }
}

/// CBC mode with ISO 10126 padding and a fresh random IV per message.
#[derive(Clone)]
pub struct BlockEncryptor {
    algorithm: Algorithm,
    key: Vec<u8>,
}

impl BlockEncryptor {
    pub fn new(algorithm: Algorithm, key: Vec<u8>) -> Result<Self, CryptoError> {
        if !algorithm.is_valid_key_len(key.len()) {
            return Err(CryptoError::InvalidKeyLength(key.len()));
        }
        Ok(Self { algorithm, key })
    }

    pub fn from_base64(algorithm: Algorithm, key: &str) -> Result<Self, CryptoError> {
        Self::new(algorithm, STANDARD.decode(key)?)
    }

    pub fn encrypt_with_iv(&self, plaintext: &str, iv: &[u8; IV_LEN]) -> Result<Sealed, CryptoError> {
        let data = plaintext.as_bytes();
        let invalid = |_| CryptoError::InvalidKeyLength(self.key.len());
        let ciphertext = match self.key.len() {
            16 => Aes128CbcEnc::new_from_slices(&self.key, iv)
                .map_err(invalid)?
                .encrypt_padded_vec_mut::<Iso10126>(data),
            24 => Aes192CbcEnc::new_from_slices(&self.key, iv)
                .map_err(invalid)?
                .encrypt_padded_vec_mut::<Iso10126>(data),
            32 => Aes256CbcEnc::new_from_slices(&self.key, iv)
                .map_err(invalid)?
                .encrypt_padded_vec_mut::<Iso10126>(data),
            n => return Err(CryptoError::InvalidKeyLength(n)),
        };

        Ok(Sealed {
            iv: STANDARD.encode(iv),
            body: STANDARD.encode(ciphertext),
        })
    }
}

impl Encryptor for BlockEncryptor {
    fn encrypt(&self, plaintext: &str) -> Result<Sealed, CryptoError> {
        let mut iv = [0u8; IV_LEN];
        rand::thread_rng().fill_bytes(&mut iv);
        self.encrypt_with_iv(plaintext, &iv)
    }

    fn decrypt(&self, iv: &str, body: &str) -> Result<String, CryptoError> {
        let iv = STANDARD.decode(iv)?;
        if iv.len() != IV_LEN {
            return Err(CryptoError::InvalidIv(iv.len()));
        }
        let ciphertext = STANDARD.decode(body)?;

        let invalid = |_| CryptoError::InvalidKeyLength(self.key.len());
        let plain = match self.key.len() {
            16 => Aes128CbcDec::new_from_slices(&self.key, &iv)
                .map_err(invalid)?
                .decrypt_padded_vec_mut::<Iso10126>(&ciphertext),
            24 => Aes192CbcDec::new_from_slices(&self.key, &iv)
                .map_err(invalid)?
                .decrypt_padded_vec_mut::<Iso10126>(&ciphertext),
            32 => Aes256CbcDec::new_from_slices(&self.key, &iv)
                .map_err(invalid)?
                .decrypt_padded_vec_mut::<Iso10126>(&ciphertext),
            n => return Err(CryptoError::InvalidKeyLength(n)),
        }
        .map_err(|_| CryptoError::Unpad)?;

        String::from_utf8(plain).map_err(|_| CryptoError::InvalidUtf8)
    }
}

impl fmt::Debug for BlockEncryptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockEncryptor")
            .field("algorithm", &self.algorithm)
            .field("key_bits", &(self.key.len() * 8))
            .finish()
    }
}

/// Generate a random base64 key of `bits` length for `algorithm`.
pub fn generate_key(algorithm: Algorithm, bits: usize) -> Result<String, CryptoError> {
    if bits % 8 != 0 || !algorithm.is_valid_key_len(bits / 8) {
        return Err(CryptoError::InvalidKeySize(bits));
    }
    let mut key = vec![0u8; bits / 8];
    rand::rngs::OsRng.fill_bytes(&mut key);
    Ok(STANDARD.encode(key))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encryptor(bits: usize) -> BlockEncryptor {
        let key = generate_key(Algorithm::Aes, bits).unwrap();
        BlockEncryptor::from_base64(Algorithm::Aes, &key).unwrap()
    }

    #[test]
    fn round_trip_for_every_key_size() {
        for bits in [128, 192, 256] {
            let enc = encryptor(bits);
            let sealed = enc.encrypt("attack at dawn").unwrap();
            assert_eq!(enc.decrypt(&sealed.iv, &sealed.body).unwrap(), "attack at dawn");
        }
    }

    #[test]
    fn round_trip_edge_payloads() {
        let enc = encryptor(128);
        let long = "0123456789abcdef|".repeat(300);
        for text in ["", "|", "a|b|c", "ünïcødé ✓", long.as_str()] {
            let sealed = enc.encrypt(text).unwrap();
            assert_eq!(enc.decrypt(&sealed.iv, &sealed.body).unwrap(), text);
        }
    }

    #[test]
    fn fresh_iv_per_message() {
        let enc = encryptor(128);
        let a = enc.encrypt("same").unwrap();
        let b = enc.encrypt("same").unwrap();
        assert_ne!(a.iv, b.iv);
    }

    #[test]
    fn sealed_displays_with_separator() {
        let sealed = Sealed {
            iv: "aXY=".into(),
            body: "Ym9keQ==".into(),
        };
        assert_eq!(sealed.to_string(), "aXY=|Ym9keQ==");
    }

    #[test]
    fn wrong_key_does_not_yield_plaintext() {
        let sealed = encryptor(128).encrypt("secret message").unwrap();
        let other = encryptor(128);
        match other.decrypt(&sealed.iv, &sealed.body) {
            Ok(text) => assert_ne!(text, "secret message"),
            Err(_) => {}
        }
    }

    #[test]
    fn rejects_bad_keys_and_ivs() {
        assert!(matches!(
            BlockEncryptor::new(Algorithm::Aes, vec![0; 10]),
            Err(CryptoError::InvalidKeyLength(10))
        ));
        assert!(matches!(
            BlockEncryptor::from_base64(Algorithm::Aes, "not base64!"),
            Err(CryptoError::Base64(_))
        ));
        let enc = encryptor(128);
        assert!(matches!(
            enc.decrypt(&STANDARD.encode([0u8; 8]), "AAAA"),
            Err(CryptoError::InvalidIv(8))
        ));
    }

    #[test]
    fn algorithm_names_are_case_insensitive() {
        assert_eq!("aes".parse::<Algorithm>().unwrap(), Algorithm::Aes);
        assert_eq!("AES".parse::<Algorithm>().unwrap(), Algorithm::Aes);
        assert!("Blowfish".parse::<Algorithm>().is_err());
    }

    #[test]
    fn generate_key_validates_size() {
        assert_eq!(STANDARD.decode(generate_key(Algorithm::Aes, 256).unwrap()).unwrap().len(), 32);
        assert!(generate_key(Algorithm::Aes, 100).is_err());
    }

    #[test]
    fn debug_hides_key() {
        let enc = BlockEncryptor::new(Algorithm::Aes, vec![7; 16]).unwrap();
        let rendered = format!("{enc:?}");
        assert!(rendered.contains("128"));
        assert!(!rendered.contains("7, 7"));
    }
}
