//! # cipher-filter
//!
//! The `encryption` filter: per-target payload encryption for `PRIVMSG`
//! traffic, plus the key schemes it understands.
//!
//! Keys are configured as strings and parsed by the first matching syntax:
//!
//! - `OTP(<alg>,<bits>,<start>,<interval>,<stride>,<file>)`: a key that
//!   rotates through a pre-shared key-material file on a calendar schedule.
//! - `<alg>:<base64>`: an explicit algorithm and key.
//! - `<base64>`: an AES key.
//!
//! Encrypted payloads travel as `<birch>|<iv>|<ciphertext>` and are split with
//! the line-split filter when they outgrow one line.

mod config;
mod encryptor;
mod filter;
mod keys;
mod otp;

pub use config::{EncryptionConfig, KeyBinding};
pub use encryptor::{generate_key, Algorithm, BlockEncryptor, CryptoError, Encryptor, Sealed};
pub use filter::{EncryptionFilter, ENCRYPTED_MARKER, PLAIN_MARKER};
pub use keys::{DefaultSyntax, ExplicitSyntax, KeyParser, KeySpecError, KeySyntax, OtpSyntax};
pub use otp::{Interval, OtpEncryptor, OtpSchedule};
