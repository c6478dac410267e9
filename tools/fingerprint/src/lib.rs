/*!
Canonical byte encoding and cache-key accumulation.

Every cacheable stage in the builder (manifest load, per-module build,
cleanup, finish, platform synthesis, source bundling) computes its cache key
by feeding a fixed, versioned sequence of values through an [`Accumulator`]
and reading out the resulting digest. Two manifests that are equal under this
canonical encoding always produce bitwise-equal keys at every stage; this is
the property the rest of the builder relies on for correct incremental
rebuilds.

The encoding rules mirror the reference implementation's `GChecksum` helpers
byte for byte (see `builder-checksum.c` in the upstream flatpak-builder
project): strings are NUL-terminated so that `None` and `Some("")` hash
differently, `None` lists and `false`/`None` "compat" values are either
omitted or replaced with single sentinel bytes, and multi-byte integers are
encoded little-endian.
*/

use sha2::{Digest as _, Sha256, Sha512};
use std::fmt;

/// The hash function backing an [`Accumulator`]. SHA-256 is the baseline;
/// SHA-512 is permitted for installations that want a wider margin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Sha256,
    Sha512,
}

impl Default for Algorithm {
    fn default() -> Self {
        Algorithm::Sha256
    }
}

enum State {
    Sha256(Sha256),
    Sha512(Sha512),
}

/// A running cache-key computation. Feed it values in a fixed order (the
/// order is part of each stage's contract, not something callers may vary)
/// and call [`Accumulator::finish`] to obtain the stage key.
///
/// Accumulating never fails: there is no I/O and no fallible conversion on
/// this path, only byte framing.
pub struct Accumulator {
    state: State,
}

/// A finished cache key, printable as a lowercase hex string.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Digest(String);

impl Digest {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Digest {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Sentinel bytes used throughout the encoding. Kept as named constants
/// because their exact values are load-bearing: changing them silently
/// invalidates every existing cache entry.
mod sentinel {
    pub const NULL_STRING: u8 = 0x01;
    pub const LIST_PRESENT: u8 = 0x01;
    pub const LIST_NULL: u8 = 0x02;
    pub const BOOL_FALSE: u8 = 0x00;
    pub const BOOL_TRUE: u8 = 0x01;
}

impl Accumulator {
    /// Start a new accumulator for one stage. `stage_version` (e.g.
    /// `"module-v2"`) is mixed in first, so that any change to this crate's
    /// encoding or to a stage's field order can be given a fresh version
    /// string to forcibly invalidate old keys.
    pub fn new(stage_version: &str) -> Self {
        Self::with_algorithm(Algorithm::default(), stage_version)
    }

    pub fn with_algorithm(algorithm: Algorithm, stage_version: &str) -> Self {
        let mut acc = Self {
            state: match algorithm {
                Algorithm::Sha256 => State::Sha256(Sha256::new()),
                Algorithm::Sha512 => State::Sha512(Sha512::new()),
            },
        };
        acc.string(Some(stage_version));
        acc
    }

    fn update(&mut self, data: &[u8]) {
        match &mut self.state {
            State::Sha256(h) => h.update(data),
            State::Sha512(h) => h.update(data),
        }
    }

    /// Append raw bytes with no framing. Used for pre-digested content such
    /// as a source's already-verified checksum.
    pub fn raw(&mut self, data: &[u8]) -> &mut Self {
        self.update(data);
        self
    }

    /// Encode a string: its bytes followed by a NUL byte, or the single byte
    /// `0x01` if `value` is `None`. The NUL terminator distinguishes `""`
    /// from `None`; without it, `Some("")` and `None` would hash equal.
    pub fn string(&mut self, value: Option<&str>) -> &mut Self {
        match value {
            Some(s) => {
                self.update(s.as_bytes());
                self.update(&[0u8]);
            }
            None => self.update(&[sentinel::NULL_STRING]),
        }
        self
    }

    /// Encode a string only when it is non-empty. New optional fields that
    /// default to "unset" should use this so that old cache keys, computed
    /// before the field existed, remain valid.
    pub fn compat_string(&mut self, value: Option<&str>) -> &mut Self {
        if let Some(s) = value {
            if !s.is_empty() {
                self.string(Some(s));
            }
        }
        self
    }

    /// Encode a string list: `0x01` followed by each element via
    /// [`Accumulator::string`], or `0x02` alone if `value` is `None`.
    pub fn string_list<S: AsRef<str>>(&mut self, value: Option<&[S]>) -> &mut Self {
        match value {
            Some(items) => {
                self.update(&[sentinel::LIST_PRESENT]);
                for item in items {
                    self.string(Some(item.as_ref()));
                }
            }
            None => self.update(&[sentinel::LIST_NULL]),
        }
        self
    }

    /// Encode a string list only when it is non-empty.
    pub fn compat_string_list<S: AsRef<str>>(&mut self, value: Option<&[S]>) -> &mut Self {
        match value {
            Some(items) if !items.is_empty() => {
                self.string_list(Some(items));
            }
            _ => {}
        }
        self
    }

    /// Encode a boolean as a single byte, `0x00` or `0x01`.
    pub fn boolean(&mut self, value: bool) -> &mut Self {
        self.update(&[if value {
            sentinel::BOOL_TRUE
        } else {
            sentinel::BOOL_FALSE
        }]);
        self
    }

    /// Encode a boolean only when `true`.
    pub fn compat_boolean(&mut self, value: bool) -> &mut Self {
        if value {
            self.boolean(value);
        }
        self
    }

    /// Encode a `u32` little-endian.
    pub fn u32(&mut self, value: u32) -> &mut Self {
        self.update(&value.to_le_bytes());
        self
    }

    /// Encode a `u64` little-endian.
    pub fn u64(&mut self, value: u64) -> &mut Self {
        self.update(&value.to_le_bytes());
        self
    }

    /// Finish the computation and return the hex digest.
    pub fn finish(self) -> Digest {
        let hex = match self.state {
            State::Sha256(h) => hex::encode(h.finalize()),
            State::Sha512(h) => hex::encode(h.finalize()),
        };
        Digest(hex)
    }
}

/// Mixes a parent stage key into a new accumulator's input, the way every
/// stage after `init-app-dir` chains from the previous stage's key.
pub fn chained(stage_version: &str, parent: Option<&Digest>) -> Accumulator {
    let mut acc = Accumulator::new(stage_version);
    acc.string(parent.map(Digest::as_str));
    acc
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn determinism() {
        let mut a = Accumulator::new("test-v1");
        a.string(Some("hello")).boolean(true).u32(7);
        let da = a.finish();

        let mut b = Accumulator::new("test-v1");
        b.string(Some("hello")).boolean(true).u32(7);
        let db = b.finish();

        assert_eq!(da, db);
    }

    #[test]
    fn string_distinguishes_none_from_empty() {
        let mut a = Accumulator::new("test-v1");
        a.string(Some(""));
        let da = a.finish();

        let mut b = Accumulator::new("test-v1");
        b.string(None);
        let db = b.finish();

        assert_ne!(da, db);
    }

    #[test]
    fn string_list_distinguishes_none_from_empty() {
        let empty: &[String] = &[];
        let mut a = Accumulator::new("test-v1");
        a.string_list(Some(empty));
        let da = a.finish();

        let mut b = Accumulator::new("test-v1");
        b.string_list::<String>(None);
        let db = b.finish();

        assert_ne!(da, db);
    }

    #[test]
    fn compat_monotonicity_string() {
        // A compat field that is unset must hash the same as a manifest
        // from before the field existed, i.e. feeding nothing at all.
        let mut with_field = Accumulator::new("test-v1");
        with_field.string(Some("base"));
        with_field.compat_string(None);
        let with_field = with_field.finish();

        let mut without_field = Accumulator::new("test-v1");
        without_field.string(Some("base"));
        let without_field = without_field.finish();

        assert_eq!(with_field, without_field);
    }

    #[test]
    fn compat_monotonicity_empty_string_is_also_invisible() {
        let mut a = Accumulator::new("test-v1");
        a.string(Some("base"));
        a.compat_string(Some(""));
        let a = a.finish();

        let mut b = Accumulator::new("test-v1");
        b.string(Some("base"));
        let b = b.finish();

        assert_eq!(a, b);
    }

    #[test]
    fn compat_monotonicity_boolean() {
        let mut a = Accumulator::new("test-v1");
        a.string(Some("base"));
        a.compat_boolean(false);
        let a = a.finish();

        let mut b = Accumulator::new("test-v1");
        b.string(Some("base"));
        let b = b.finish();

        assert_eq!(a, b);
    }

    #[test]
    fn stage_version_forks_the_key_space() {
        let mut a = Accumulator::new("module-v1");
        a.string(Some("same"));
        let a = a.finish();

        let mut b = Accumulator::new("module-v2");
        b.string(Some("same"));
        let b = b.finish();

        assert_ne!(a, b);
    }

    #[test]
    fn chained_mixes_parent_key() {
        let parent = Accumulator::new("module-v2").finish();
        let mut a = chained("module-v2", Some(&parent));
        a.string(Some("x"));
        let a = a.finish();

        let mut b = chained("module-v2", None);
        b.string(Some("x"));
        let b = b.finish();

        assert_ne!(a, b);
    }
}
