use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use thiserror::Error;

use crate::encryptor::{Algorithm, BlockEncryptor, CryptoError, Encryptor};
use crate::otp::{Interval, OtpEncryptor, OtpSchedule};

static OTP_KEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^OTP\(([^,\s]+),([0-9]+),([^,\s]*),([^,\s]*),([0-9]+),([^(]+)\)$")
        .expect("OTP key pattern compiles")
});

static EXPLICIT_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\S+):(\S+)$").expect("explicit key pattern compiles"));

#[derive(Debug, Error)]
pub enum KeySpecError {
    #[error("malformed {syntax} key: {reason}")]
    Malformed {
        syntax: &'static str,
        reason: String,
    },

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// One way of writing a key in configuration.
pub trait KeySyntax: Send + Sync {
    fn name(&self) -> &'static str;

    /// `Ok(None)` when `spec` is not written in this syntax.
    fn parse(&self, spec: &str) -> Result<Option<Box<dyn Encryptor>>, KeySpecError>;
}

/// `OTP(<algorithm>,<keybits>,<start>,<interval>,<stride>,<path>)`
#[derive(Debug, Default)]
pub struct OtpSyntax;

impl KeySyntax for OtpSyntax {
    fn name(&self) -> &'static str {
        "OTP"
    }

    fn parse(&self, spec: &str) -> Result<Option<Box<dyn Encryptor>>, KeySpecError> {
        let Some(caps) = OTP_KEY.captures(spec) else {
            return Ok(None);
        };
        let malformed = |reason: String| KeySpecError::Malformed {
            syntax: "OTP",
            reason,
        };

        let algorithm: Algorithm = caps[1].parse()?;
        let key_bits: usize = caps[2]
            .parse()
            .map_err(|_| malformed(format!("key size '{}' out of range", &caps[2])))?;
        let start = parse_start(&caps[3])
            .ok_or_else(|| malformed(format!("unrecognised start time '{}'", &caps[3])))?;
        let stride: u64 = caps[5]
            .parse()
            .map_err(|_| malformed(format!("stride '{}' out of range", &caps[5])))?;

        let encryptor = OtpEncryptor::new(
            caps[6].trim(),
            algorithm,
            key_bits,
            OtpSchedule {
                start,
                interval: Interval::parse(&caps[4]),
                stride,
            },
        )?;
        Ok(Some(Box::new(encryptor)))
    }
}

/// `yyyyMMddTHHmmss±zzzz`, or `yyyyMMdd` taken as UTC midnight.
fn parse_start(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_str(text, "%Y%m%dT%H%M%S%z") {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(text, "%Y%m%d")
        .ok()?
        .and_hms_opt(0, 0, 0)
        .map(|naive| naive.and_utc())
}

/// `<algorithm>:<base64 key>`
#[derive(Debug, Default)]
pub struct ExplicitSyntax;

impl KeySyntax for ExplicitSyntax {
    fn name(&self) -> &'static str {
        "explicit"
    }

    fn parse(&self, spec: &str) -> Result<Option<Box<dyn Encryptor>>, KeySpecError> {
        let Some(caps) = EXPLICIT_KEY.captures(spec) else {
            return Ok(None);
        };
        let algorithm: Algorithm = caps[1].parse()?;
        let encryptor = BlockEncryptor::from_base64(algorithm, &caps[2])?;
        Ok(Some(Box::new(encryptor)))
    }
}

/// A bare base64 AES key.
#[derive(Debug, Default)]
pub struct DefaultSyntax;

impl KeySyntax for DefaultSyntax {
    fn name(&self) -> &'static str {
        "default"
    }

    fn parse(&self, spec: &str) -> Result<Option<Box<dyn Encryptor>>, KeySpecError> {
        let encryptor = BlockEncryptor::from_base64(Algorithm::Aes, spec.trim())?;
        Ok(Some(Box::new(encryptor)))
    }
}

/// Tries each syntax in order; the first that recognises a key decides.
pub struct KeyParser {
    syntaxes: Vec<Box<dyn KeySyntax>>,
}

impl KeyParser {
    pub fn new(syntaxes: Vec<Box<dyn KeySyntax>>) -> Self {
        Self { syntaxes }
    }

    pub fn parse(&self, spec: &str) -> Result<Box<dyn Encryptor>, KeySpecError> {
        for syntax in &self.syntaxes {
            if let Some(encryptor) = syntax.parse(spec)? {
                tracing::trace!(syntax = syntax.name(), "key recognised");
                return Ok(encryptor);
            }
        }
        Err(KeySpecError::Malformed {
            syntax: "any",
            reason: "no key syntax recognises the value".into(),
        })
    }
}

impl Default for KeyParser {
    fn default() -> Self {
        Self::new(vec![
            Box::new(OtpSyntax),
            Box::new(ExplicitSyntax),
            Box::new(DefaultSyntax),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encryptor::generate_key;
    use chrono::TimeZone;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn default_syntax_accepts_bare_base64() {
        let key = generate_key(Algorithm::Aes, 128).unwrap();
        let enc = KeyParser::default().parse(&key).unwrap();
        let sealed = enc.encrypt("hi").unwrap();
        assert_eq!(enc.decrypt(&sealed.iv, &sealed.body).unwrap(), "hi");
    }

    #[test]
    fn explicit_syntax_is_case_insensitive() {
        let key = generate_key(Algorithm::Aes, 256).unwrap();
        let parser = KeyParser::default();
        assert!(parser.parse(&format!("aes:{key}")).is_ok());
        assert!(parser.parse(&format!("AES:{key}")).is_ok());
    }

    #[test]
    fn unknown_algorithm_is_rejected() {
        let key = generate_key(Algorithm::Aes, 128).unwrap();
        let err = KeyParser::default().parse(&format!("Twofish:{key}")).unwrap_err();
        assert!(matches!(
            err,
            KeySpecError::Crypto(CryptoError::UnsupportedAlgorithm(_))
        ));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(KeyParser::default().parse("not a key at all").is_err());
        assert!(KeyParser::default().parse("c2hvcnQ=").is_err());
    }

    #[test]
    fn otp_syntax_builds_rotating_encryptor() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&[42u8; 256]).unwrap();
        file.flush().unwrap();

        let spec = format!("otp(AES,128,20240101T000000+0000,36500d,16,{})", file.path().display());
        let enc = KeyParser::default().parse(&spec).unwrap();
        let sealed = enc.encrypt("rotating").unwrap();
        assert!(sealed.body.contains(':'));
        assert!(format!("{enc:?}").contains("OtpEncryptor"));
    }

    #[test]
    fn otp_with_missing_file_fails_instead_of_falling_through() {
        let err = KeyParser::default()
            .parse("OTP(AES,128,20240101,1h,16,/definitely/missing.bin)")
            .unwrap_err();
        assert!(matches!(
            err,
            KeySpecError::Crypto(CryptoError::KeyMaterial { .. })
        ));
    }

    #[test]
    fn otp_with_bad_start_is_malformed() {
        let err = KeyParser::default()
            .parse("OTP(AES,128,yesterday,1h,16,/tmp/k.bin)")
            .unwrap_err();
        assert!(matches!(err, KeySpecError::Malformed { syntax: "OTP", .. }));
    }

    #[test]
    fn start_time_formats() {
        assert_eq!(
            parse_start("20240315T120000+0100"),
            Some(Utc.with_ymd_and_hms(2024, 3, 15, 11, 0, 0).unwrap())
        );
        assert_eq!(
            parse_start("20240315"),
            Some(Utc.with_ymd_and_hms(2024, 3, 15, 0, 0, 0).unwrap())
        );
        assert_eq!(parse_start(""), None);
    }
}
