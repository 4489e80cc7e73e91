use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
#[error("unsupported character encoding '{0}' (expected utf-8 or iso-8859-1)")]
pub struct UnknownCharset(pub String);

/// Character encoding used on both sockets of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Charset {
    #[default]
    Utf8,
    Latin1,
}

impl Charset {
    /// Decode one line. Invalid UTF-8 is replaced, never rejected.
    pub fn decode(self, bytes: &[u8]) -> String {
        match self {
            Charset::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            Charset::Latin1 => bytes.iter().map(|&b| char::from(b)).collect(),
        }
    }

    /// Encode one line. Characters outside Latin-1 become `?`.
    pub fn encode(self, text: &str) -> Vec<u8> {
        match self {
            Charset::Utf8 => text.as_bytes().to_vec(),
            Charset::Latin1 => text
                .chars()
                .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
                .collect(),
        }
    }
}

impl FromStr for Charset {
    type Err = UnknownCharset;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "utf-8" | "utf8" => Ok(Charset::Utf8),
            "iso-8859-1" | "iso8859-1" | "latin1" | "latin-1" => Ok(Charset::Latin1),
            _ => Err(UnknownCharset(s.to_string())),
        }
    }
}

impl TryFrom<String> for Charset {
    type Error = UnknownCharset;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Charset> for String {
    fn from(charset: Charset) -> Self {
        charset.to_string()
    }
}

impl fmt::Display for Charset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Charset::Utf8 => f.write_str("utf-8"),
            Charset::Latin1 => f.write_str("iso-8859-1"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_names() {
        assert_eq!("UTF-8".parse::<Charset>().unwrap(), Charset::Utf8);
        assert_eq!("latin1".parse::<Charset>().unwrap(), Charset::Latin1);
        assert_eq!("ISO-8859-1".parse::<Charset>().unwrap(), Charset::Latin1);
        assert!("ebcdic".parse::<Charset>().is_err());
    }

    #[test]
    fn latin1_maps_bytes_to_code_points() {
        let text = Charset::Latin1.decode(&[b'c', 0xe9, b'!']);
        assert_eq!(text, "cé!");
        assert_eq!(Charset::Latin1.encode("cé€"), vec![b'c', 0xe9, b'?']);
    }

    #[test]
    fn utf8_is_lossy_on_decode() {
        assert_eq!(Charset::Utf8.decode("héllo".as_bytes()), "héllo");
        assert_eq!(Charset::Utf8.decode(&[b'a', 0xff]), "a\u{fffd}");
    }
}
