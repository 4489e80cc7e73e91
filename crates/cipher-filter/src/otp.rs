use std::fmt;
use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use chrono::{DateTime, Months, TimeDelta, Utc};
use parking_lot::Mutex;
use regex::Regex;

use crate::encryptor::{Algorithm, BlockEncryptor, CryptoError, Encryptor, Sealed};

static INTERVAL_PART: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([0-9]+)([Mdhms])").expect("interval pattern compiles"));

/// Additive calendar interval between two key rotations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Interval {
    pub months: u32,
    pub days: u32,
    pub hours: u32,
    pub minutes: u32,
    pub seconds: u32,
}

impl Interval {
    /// Parse any combination of `<n>M`, `<n>d`, `<n>h`, `<n>m` and `<n>s`.
    /// Unrecognised text is ignored; a repeated unit keeps its last value.
    pub fn parse(text: &str) -> Self {
        let mut interval = Self::default();
        for caps in INTERVAL_PART.captures_iter(text) {
            let Ok(value) = caps[1].parse::<u32>() else {
                tracing::warn!(part = &caps[0], "interval component out of range, ignored");
                continue;
            };
            match &caps[2] {
                "M" => interval.months = value,
                "d" => interval.days = value,
                "h" => interval.hours = value,
                "m" => interval.minutes = value,
                _ => interval.seconds = value,
            }
        }
        interval
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }

    fn duration(&self) -> TimeDelta {
        TimeDelta::days(i64::from(self.days))
            + TimeDelta::hours(i64::from(self.hours))
            + TimeDelta::minutes(i64::from(self.minutes))
            + TimeDelta::seconds(i64::from(self.seconds))
    }

    fn advance(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        from.checked_add_months(Months::new(self.months))?
            .checked_add_signed(self.duration())
    }

    /// Number of interval additions needed to get from the earlier of
    /// `start` and `time` to (or past) the later one.
    pub fn index_between(&self, start: DateTime<Utc>, time: DateTime<Utc>) -> u64 {
        self.index_within(start, time, u64::MAX).unwrap_or(u64::MAX)
    }

    /// Like [`index_between`](Self::index_between), but `None` as soon as the
    /// index would pass `max_index`. Calendar intervals are walked one
    /// addition at a time, so the bound also caps the work done.
    pub fn index_within(
        &self,
        start: DateTime<Utc>,
        time: DateTime<Utc>,
        max_index: u64,
    ) -> Option<u64> {
        if self.is_zero() {
            return Some(0);
        }
        let (mut cursor, marker) = if start <= time { (start, time) } else { (time, start) };

        if self.months == 0 {
            let step = nanos(self.duration());
            let span = nanos(marker - cursor);
            let index = u64::try_from((span + step - 1) / step).unwrap_or(u64::MAX);
            return (index <= max_index).then_some(index);
        }

        let mut index = 0u64;
        while cursor < marker {
            if index == max_index {
                return None;
            }
            match self.advance(cursor) {
                Some(next) => cursor = next,
                None => break,
            }
            index += 1;
        }
        Some(index)
    }
}

fn nanos(delta: TimeDelta) -> i128 {
    i128::from(delta.num_seconds()) * 1_000_000_000 + i128::from(delta.subsec_nanos())
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}M{}d{}h{}m{}s",
            self.months, self.days, self.hours, self.minutes, self.seconds
        )
    }
}

/// Where and when each key lives in a key-material file.
#[derive(Debug, Clone)]
pub struct OtpSchedule {
    pub start: DateTime<Utc>,
    pub interval: Interval,
    /// Byte distance between consecutive keys.
    pub stride: u64,
}

struct CachedKey {
    index: u64,
    key: Vec<u8>,
}

/// Encryptor whose key rotates through a pre-shared key-material file.
///
/// The key for interval `n` is read from `[n * stride, n * stride + key_len)`.
/// Ciphertext bodies are prefixed with the encryption time in epoch
/// milliseconds so the receiver can select the same key.
pub struct OtpEncryptor {
    path: PathBuf,
    algorithm: Algorithm,
    key_len: usize,
    schedule: OtpSchedule,
    /// Size of the key-material file when the encryptor was built.
    material_len: u64,
    cache: Mutex<Option<CachedKey>>,
}

impl OtpEncryptor {
    pub fn new(
        path: impl Into<PathBuf>,
        algorithm: Algorithm,
        key_bits: usize,
        schedule: OtpSchedule,
    ) -> Result<Self, CryptoError> {
        let path = path.into();
        if key_bits % 8 != 0 || !algorithm.is_valid_key_len(key_bits / 8) {
            return Err(CryptoError::InvalidKeySize(key_bits));
        }
        if schedule.interval.is_zero() {
            return Err(CryptoError::ZeroInterval);
        }
        let meta = std::fs::metadata(&path).map_err(|source| CryptoError::KeyMaterial {
            path: path.clone(),
            source,
        })?;
        if !meta.is_file() {
            return Err(CryptoError::KeyMaterial {
                path,
                source: std::io::Error::new(ErrorKind::InvalidInput, "not a regular file"),
            });
        }

        Ok(Self {
            path,
            algorithm,
            key_len: key_bits / 8,
            schedule,
            material_len: meta.len(),
            cache: Mutex::new(None),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Highest interval index the key material has a full key for.
    fn last_index(&self) -> u64 {
        match self.material_len.checked_sub(self.key_len as u64) {
            Some(room) if self.schedule.stride > 0 => room / self.schedule.stride,
            Some(_) => u64::MAX,
            None => 0,
        }
    }

    /// Interval index of `time`. Times past the end of the key material are
    /// rejected without walking the whole calendar.
    pub fn interval_index(&self, time: DateTime<Utc>) -> Result<u64, CryptoError> {
        let last = self.last_index();
        self.schedule
            .interval
            .index_within(self.schedule.start, time, last)
            .ok_or_else(|| CryptoError::KeyMaterialExhausted {
                path: self.path.clone(),
                offset: last.saturating_add(1).saturating_mul(self.schedule.stride),
            })
    }

    /// Key for the interval containing `time`, from cache when unchanged.
    pub fn key_for(&self, time: DateTime<Utc>) -> Result<Vec<u8>, CryptoError> {
        let index = self.interval_index(time)?;
        let mut cache = self.cache.lock();
        if let Some(cached) = cache.as_ref().filter(|c| c.index == index) {
            return Ok(cached.key.clone());
        }

        let key = self.read_key(index)?;
        tracing::debug!(file = %self.path.display(), index, "rotated one-time key");
        *cache = Some(CachedKey {
            index,
            key: key.clone(),
        });
        Ok(key)
    }

    fn read_key(&self, index: u64) -> Result<Vec<u8>, CryptoError> {
        let io_err = |source| CryptoError::KeyMaterial {
            path: self.path.clone(),
            source,
        };
        let offset = index
            .checked_mul(self.schedule.stride)
            .ok_or_else(|| CryptoError::KeyMaterialExhausted {
                path: self.path.clone(),
                offset: u64::MAX,
            })?;

        let mut file = File::open(&self.path).map_err(io_err)?;
        file.seek(SeekFrom::Start(offset)).map_err(io_err)?;

        let mut key = vec![0u8; self.key_len];
        match file.read_exact(&mut key) {
            Ok(()) => Ok(key),
            Err(err) if err.kind() == ErrorKind::UnexpectedEof => {
                Err(CryptoError::KeyMaterialExhausted {
                    path: self.path.clone(),
                    offset,
                })
            }
            Err(err) => Err(io_err(err)),
        }
    }

    fn cipher_at(&self, time: DateTime<Utc>) -> Result<BlockEncryptor, CryptoError> {
        BlockEncryptor::new(self.algorithm, self.key_for(time)?)
    }

    /// Encrypt as if the current time were `time`.
    pub fn encrypt_at(&self, plaintext: &str, time: DateTime<Utc>) -> Result<Sealed, CryptoError> {
        let sealed = self.cipher_at(time)?.encrypt(plaintext)?;
        Ok(Sealed {
            iv: sealed.iv,
            body: format!("{}:{}", time.timestamp_millis(), sealed.body),
        })
    }
}

impl Encryptor for OtpEncryptor {
    fn encrypt(&self, plaintext: &str) -> Result<Sealed, CryptoError> {
        self.encrypt_at(plaintext, Utc::now())
    }

    fn decrypt(&self, iv: &str, body: &str) -> Result<String, CryptoError> {
        let (millis, ciphertext) = body
            .split_once(':')
            .ok_or_else(|| CryptoError::Malformed("missing key timestamp".into()))?;
        let time = millis
            .parse::<i64>()
            .ok()
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .ok_or_else(|| CryptoError::Malformed(format!("bad key timestamp '{millis}'")))?;

        self.cipher_at(time)?.decrypt(iv, ciphertext)
    }
}

impl fmt::Debug for OtpEncryptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OtpEncryptor")
            .field("file", &self.path.file_name())
            .field("algorithm", &self.algorithm)
            .field("key_bits", &(self.key_len * 8))
            .field("interval", &self.schedule.interval.to_string())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    fn key_file(len: usize) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        let bytes: Vec<u8> = (0..len).map(|i| (i * 31 % 251) as u8).collect();
        file.write_all(&bytes).unwrap();
        file.flush().unwrap();
        file
    }

    fn daily(file: &NamedTempFile) -> OtpEncryptor {
        OtpEncryptor::new(
            file.path(),
            Algorithm::Aes,
            128,
            OtpSchedule {
                start: utc(2024, 1, 1, 0, 0, 0),
                interval: Interval::parse("1d"),
                stride: 16,
            },
        )
        .unwrap()
    }

    #[test]
    fn parses_interval_components() {
        let interval = Interval::parse("1M2d3h4m5s");
        assert_eq!(
            interval,
            Interval {
                months: 1,
                days: 2,
                hours: 3,
                minutes: 4,
                seconds: 5
            }
        );
        assert_eq!(Interval::parse("12h").hours, 12);
        assert!(Interval::parse("").is_zero());
        assert!(Interval::parse("1y").is_zero());
    }

    #[test]
    fn index_counts_additions_to_reach_or_pass() {
        let start = utc(2024, 1, 1, 0, 0, 0);
        let day = Interval::parse("1d");
        assert_eq!(day.index_between(start, start), 0);
        assert_eq!(day.index_between(start, utc(2024, 1, 1, 0, 0, 1)), 1);
        assert_eq!(day.index_between(start, utc(2024, 1, 2, 0, 0, 0)), 1);
        assert_eq!(day.index_between(start, utc(2024, 1, 2, 0, 0, 1)), 2);
        // Symmetric for times before the start.
        assert_eq!(day.index_between(start, utc(2023, 12, 30, 12, 0, 0)), 2);
    }

    #[test]
    fn index_with_months_walks_the_calendar() {
        let start = utc(2024, 1, 31, 0, 0, 0);
        let month = Interval::parse("1M");
        // Jan 31 + 1 month clamps to Feb 29 in a leap year.
        assert_eq!(month.index_between(start, utc(2024, 2, 29, 0, 0, 0)), 1);
        assert_eq!(month.index_between(start, utc(2024, 3, 1, 0, 0, 0)), 2);
    }

    #[test]
    fn key_is_stable_within_interval_and_changes_at_boundary() {
        let file = key_file(16 * 10);
        let enc = daily(&file);

        let morning = enc.key_for(utc(2024, 1, 3, 8, 0, 0)).unwrap();
        let evening = enc.key_for(utc(2024, 1, 3, 20, 0, 0)).unwrap();
        assert_eq!(morning, evening);

        let next_day = enc.key_for(utc(2024, 1, 4, 8, 0, 0)).unwrap();
        assert_ne!(morning, next_day);
    }

    #[test]
    fn key_offset_is_index_times_stride() {
        let file = key_file(64);
        let enc = OtpEncryptor::new(
            file.path(),
            Algorithm::Aes,
            128,
            OtpSchedule {
                start: utc(2024, 1, 1, 0, 0, 0),
                interval: Interval::parse("1h"),
                stride: 20,
            },
        )
        .unwrap();

        let bytes = std::fs::read(file.path()).unwrap();
        let key = enc.key_for(utc(2024, 1, 1, 1, 30, 0)).unwrap();
        assert_eq!(key, bytes[40..56]);
    }

    #[test]
    fn round_trip_uses_embedded_time() {
        let file = key_file(16 * 10);
        let enc = daily(&file);

        let sealed = enc.encrypt_at("hello otp", utc(2024, 1, 5, 12, 0, 0)).unwrap();
        assert!(sealed.body.starts_with(&utc(2024, 1, 5, 12, 0, 0).timestamp_millis().to_string()));

        // Warm the cache with a different interval first.
        enc.key_for(utc(2024, 1, 2, 0, 30, 0)).unwrap();
        assert_eq!(enc.decrypt(&sealed.iv, &sealed.body).unwrap(), "hello otp");
    }

    #[test]
    fn exhausted_key_material_is_an_error() {
        let file = key_file(32);
        let enc = daily(&file);
        let err = enc.encrypt_at("x", utc(2024, 1, 10, 0, 0, 1)).unwrap_err();
        assert!(matches!(err, CryptoError::KeyMaterialExhausted { .. }));
    }

    #[test]
    fn index_within_stops_at_the_bound() {
        let start = utc(2024, 1, 1, 0, 0, 0);
        let month = Interval::parse("1M");
        assert_eq!(month.index_within(start, utc(2024, 12, 15, 0, 0, 0), 12), Some(12));
        assert_eq!(month.index_within(start, utc(2025, 1, 15, 0, 0, 0), 12), None);
        assert_eq!(Interval::parse("1d").index_within(start, utc(2024, 1, 5, 0, 0, 0), 3), None);
    }

    #[test]
    fn far_future_timestamp_is_rejected_without_walking() {
        let file = key_file(16 * 10);
        let enc = OtpEncryptor::new(
            file.path(),
            Algorithm::Aes,
            128,
            OtpSchedule {
                start: utc(2024, 1, 1, 0, 0, 0),
                interval: Interval::parse("1M"),
                stride: 16,
            },
        )
        .unwrap();

        let sealed = enc.encrypt_at("hi", utc(2024, 3, 1, 0, 0, 0)).unwrap();
        let (_, ciphertext) = sealed.body.split_once(':').unwrap();
        let far = utc(200_000, 1, 1, 0, 0, 0).timestamp_millis();

        let started = std::time::Instant::now();
        let err = enc.decrypt(&sealed.iv, &format!("{far}:{ciphertext}")).unwrap_err();
        assert!(matches!(err, CryptoError::KeyMaterialExhausted { .. }));
        assert!(started.elapsed() < std::time::Duration::from_secs(1));
    }

    #[test]
    fn malformed_body_is_rejected() {
        let file = key_file(32);
        let enc = daily(&file);
        assert!(matches!(
            enc.decrypt("AAAAAAAAAAAAAAAAAAAAAA==", "no-timestamp"),
            Err(CryptoError::Malformed(_))
        ));
    }

    #[test]
    fn construction_validates_inputs() {
        let file = key_file(32);
        let schedule = OtpSchedule {
            start: utc(2024, 1, 1, 0, 0, 0),
            interval: Interval::default(),
            stride: 16,
        };
        assert!(matches!(
            OtpEncryptor::new(file.path(), Algorithm::Aes, 128, schedule.clone()),
            Err(CryptoError::ZeroInterval)
        ));
        let schedule = OtpSchedule {
            interval: Interval::parse("1d"),
            ..schedule
        };
        assert!(matches!(
            OtpEncryptor::new(file.path(), Algorithm::Aes, 100, schedule.clone()),
            Err(CryptoError::InvalidKeySize(100))
        ));
        assert!(matches!(
            OtpEncryptor::new("/nonexistent/keys.bin", Algorithm::Aes, 128, schedule),
            Err(CryptoError::KeyMaterial { .. })
        ));
    }
}
