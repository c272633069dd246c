//! Serial numbers and object identifiers.
//!
//! A [`Serial`] is a 64-bit number drawn from `[MIN_SERIAL, MAX_SERIAL)`
//! and rendered as `_` followed by eleven base-62 digits. An [`Ident`] is
//! a pair of serials; the high serial picks one of the [`BUCKET_COUNT`]
//! store buckets. Serial zero is the reserved empty marker and prints as
//! a lone `_`.
//!
//! Fresh serials come from a process-wide ChaCha generator that reseeds
//! itself from the operating system every [`RESEED_PERIOD`] draws.

use std::fmt;
use std::sync::Mutex;

use rand::rngs::OsRng;
use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// The base-62 digit alphabet, in ascending digit order.
pub const B62_DIGITS: &[u8; 62] =
    b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Smallest non-empty serial: `62 * 62`.
pub const MIN_SERIAL: u64 = 62 * 62;

/// One past the largest serial: `10 * 62 * 62^9`.
pub const MAX_SERIAL: u64 = 10 * 62 * B62_CUBE * B62_CUBE * B62_CUBE;

const B62_CUBE: u64 = 62 * 62 * 62;

/// Width of the valid serial range.
pub const DELTA_SERIAL: u64 = MAX_SERIAL - MIN_SERIAL;

/// Digits in the text form of a serial, after the `_` sigil.
pub const NB_DIGITS: usize = 11;

/// Number of store buckets; the serial range divides evenly across them.
pub const BUCKET_COUNT: u64 = 10 * 62;

const BUCKET_SPAN: u64 = DELTA_SERIAL / BUCKET_COUNT;

/// Draws between reseeds of the shared serial generator.
pub const RESEED_PERIOD: u64 = 8192;

// ---------------------------------------------------------------------------
// Shared random source
// ---------------------------------------------------------------------------

struct SerialRng {
    rng: ChaCha20Rng,
    draws: u64,
}

static SERIAL_RNG: Mutex<Option<SerialRng>> = Mutex::new(None);

fn fresh_chacha() -> ChaCha20Rng {
    let mut seed = [0u8; 32];
    OsRng.fill_bytes(&mut seed);
    ChaCha20Rng::from_seed(seed)
}

/// Runs `f` against the shared generator, reseeding it from the OS every
/// [`RESEED_PERIOD`] draws.
fn with_serial_rng<T>(f: impl FnOnce(&mut ChaCha20Rng) -> T) -> T {
    let mut guard = SERIAL_RNG.lock().unwrap_or_else(|e| e.into_inner());
    let state = guard.get_or_insert_with(|| SerialRng {
        rng: fresh_chacha(),
        draws: 0,
    });
    if state.draws % RESEED_PERIOD == 0 && state.draws > 0 {
        state.rng = fresh_chacha();
    }
    state.draws += 1;
    f(&mut state.rng)
}

// ---------------------------------------------------------------------------
// Hash32
// ---------------------------------------------------------------------------

/// A non-zero 32-bit structural hash (zero only for the empty identifier
/// and the nil value).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Hash32(pub u32);

impl fmt::Display for Hash32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "h#{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Serial
// ---------------------------------------------------------------------------

/// A serial number: zero (empty) or a value in `[MIN_SERIAL, MAX_SERIAL)`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Serial(u64);

impl Serial {
    /// The reserved empty serial.
    pub const EMPTY: Serial = Serial(0);

    /// Wraps a raw number, rejecting anything outside the valid range.
    /// Zero is accepted as the empty serial.
    pub fn from_u64(n: u64) -> Result<Serial, CoreError> {
        if n == 0 || (MIN_SERIAL..MAX_SERIAL).contains(&n) {
            Ok(Serial(n))
        } else {
            Err(CoreError::SerialOutOfRange(n))
        }
    }

    /// Parses the `_` + 11 base-62 digits text form.
    pub fn parse(text: &str) -> Result<Serial, CoreError> {
        let bytes = text.as_bytes();
        if bytes.is_empty() {
            return Err(CoreError::EmptySerialText);
        }
        if bytes[0] != b'_' {
            return Err(CoreError::BadSerialPrefix(text.to_owned()));
        }
        if bytes.len() != NB_DIGITS + 1 {
            return Err(CoreError::BadSerialLength(text.to_owned()));
        }
        let mut n: u64 = 0;
        for &b in &bytes[1..] {
            let d = B62_DIGITS
                .iter()
                .position(|&c| c == b)
                .ok_or_else(|| CoreError::BadSerialDigit {
                    text: text.to_owned(),
                    digit: b as char,
                })?;
            n = n * 62 + d as u64;
        }
        Serial::from_u64(n)
    }

    /// Draws a fresh serial uniformly from the valid range.
    pub fn random() -> Serial {
        with_serial_rng(|rng| Serial(rng.gen_range(MIN_SERIAL..MAX_SERIAL)))
    }

    /// Draws a fresh serial whose bucket number is `bucket`.
    pub fn random_in_bucket(bucket: u64) -> Result<Serial, CoreError> {
        if bucket >= BUCKET_COUNT {
            return Err(CoreError::BadBucket(bucket));
        }
        let off = with_serial_rng(|rng| rng.gen_range(0..BUCKET_SPAN));
        Ok(Serial(bucket * BUCKET_SPAN + off + MIN_SERIAL))
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Bucket index this serial shards into.
    pub fn bucket(self) -> u64 {
        self.0 / BUCKET_SPAN
    }

    /// Position of this serial inside its bucket.
    pub fn bucket_offset(self) -> u64 {
        self.0 % BUCKET_SPAN
    }
}

impl fmt::Display for Serial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            return f.write_str("_");
        }
        let mut buf = [0u8; NB_DIGITS + 1];
        buf[0] = b'_';
        let mut n = self.0;
        for ix in (1..=NB_DIGITS).rev() {
            buf[ix] = B62_DIGITS[(n % 62) as usize];
            n /= 62;
        }
        // buf holds '_' plus digits from the fixed alphabet
        f.write_str(std::str::from_utf8(&buf).map_err(|_| fmt::Error)?)
    }
}

// ---------------------------------------------------------------------------
// Ident
// ---------------------------------------------------------------------------

/// An object identifier: a pair of serials, both empty or both non-empty.
/// Ordered lexicographically, high serial first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Ident {
    pub hi: Serial,
    pub lo: Serial,
}

impl Ident {
    /// The reserved empty identifier, printed as `__`.
    pub const EMPTY: Ident = Ident {
        hi: Serial::EMPTY,
        lo: Serial::EMPTY,
    };

    /// Builds an identifier from two serials. Both must be empty, or both
    /// non-empty and in range.
    pub fn from_serials(hi: Serial, lo: Serial) -> Result<Ident, CoreError> {
        if hi.is_empty() && lo.is_empty() {
            return Ok(Ident::EMPTY);
        }
        if hi.is_empty() || lo.is_empty() {
            return Err(CoreError::HalfEmptyIdent {
                hi: hi.as_u64(),
                lo: lo.as_u64(),
            });
        }
        Ok(Ident { hi, lo })
    }

    /// Builds an identifier from two raw numbers, validating both.
    pub fn from_u64s(hi: u64, lo: u64) -> Result<Ident, CoreError> {
        Ident::from_serials(Serial::from_u64(hi)?, Serial::from_u64(lo)?)
    }

    /// Parses the 24-character text form (`__` for the empty identifier).
    pub fn parse(text: &str) -> Result<Ident, CoreError> {
        if text.is_empty() {
            return Err(CoreError::BadIdentText(text.to_owned()));
        }
        if text == "__" {
            return Ok(Ident::EMPTY);
        }
        // byte slicing below, so multi-byte input must be rejected here
        if text.len() != 2 * (NB_DIGITS + 1) || !text.is_ascii() || !text.starts_with('_') {
            return Err(CoreError::BadIdentText(text.to_owned()));
        }
        let hi = Serial::parse(&text[..NB_DIGITS + 1])
            .map_err(|_| CoreError::BadIdentText(text.to_owned()))?;
        let lo = Serial::parse(&text[NB_DIGITS + 1..])
            .map_err(|_| CoreError::BadIdentText(text.to_owned()))?;
        Ident::from_serials(hi, lo)
    }

    /// Draws a fresh identifier from two random serials.
    pub fn random() -> Ident {
        Ident {
            hi: Serial::random(),
            lo: Serial::random(),
        }
    }

    /// Draws a fresh identifier pinned to the given bucket.
    pub fn random_in_bucket(bucket: u64) -> Result<Ident, CoreError> {
        Ok(Ident {
            hi: Serial::random_in_bucket(bucket)?,
            lo: Serial::random(),
        })
    }

    pub fn is_empty(self) -> bool {
        self.hi.is_empty() && self.lo.is_empty()
    }

    /// Bucket index, taken from the high serial.
    pub fn bucket(self) -> u64 {
        self.hi.bucket()
    }

    /// 32-bit hash of the identifier; zero only for the empty identifier.
    pub fn hash32(self) -> Hash32 {
        if self.is_empty() {
            return Hash32(0);
        }
        let h = (self.hi.as_u64().wrapping_mul(1033) ^ self.lo.as_u64().wrapping_mul(2027)) as u32;
        if h == 0 {
            Hash32((self.hi.as_u64() as u32 & 0xfffff) + 17 * (self.lo.as_u64() as u32 & 0xfffff) + 30)
        } else {
            Hash32(h)
        }
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            f.write_str("__")
        } else {
            write!(f, "{}{}", self.hi, self.lo)
        }
    }
}
