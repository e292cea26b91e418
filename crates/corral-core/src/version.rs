//! Agent version numbers
//!
//! Versions have the form `major.minor.patch[.build]`, or
//! `major.minor-tagpatch[.build]` for pre-releases (`1.2-alpha3`).
//! A [`Binary`] additionally names the series and architecture a
//! build targets, e.g. `1.2.3.1-trusty-amd64`.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

static NUMBER_PAT: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"^(\d{1,9})\.(\d{1,9})(?:\.|-([a-z]+))(\d{1,9})(?:\.(\d{1,9}))?$")
        .expect("version pattern is valid")
});

/// A version number
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Number {
    pub major: u32,
    pub minor: u32,
    pub tag: String,
    pub patch: u32,
    pub build: u32,
}

impl Number {
    pub fn new(major: u32, minor: u32, patch: u32, build: u32) -> Self {
        Self {
            major,
            minor,
            tag: String::new(),
            patch,
            build,
        }
    }

    /// The version of this client, taken from the crate version.
    pub fn current() -> Self {
        env!("CARGO_PKG_VERSION")
            .parse()
            .unwrap_or_else(|_| Number::new(0, 0, 0, 0))
    }

    /// Development versions carry a tag or a non-zero build number.
    pub fn is_dev(&self) -> bool {
        !self.tag.is_empty() || self.build > 0
    }

    /// Whether `self` and `other` are equal once build numbers are ignored.
    ///
    /// Uploaded tools get an incremented build number, so a client must
    /// still consider them its own version.
    pub fn is_compatible(&self, other: &Number) -> bool {
        self.without_build() == other.without_build()
    }

    pub fn without_build(&self) -> Number {
        Number {
            build: 0,
            ..self.clone()
        }
    }

    pub fn with_build(&self, build: u32) -> Number {
        Number {
            build,
            ..self.clone()
        }
    }

    /// `major.minor` of this version, used to match tools streams.
    pub fn major_minor(&self) -> (u32, u32) {
        (self.major, self.minor)
    }
}

impl FromStr for Number {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        let caps = NUMBER_PAT
            .captures(s)
            .ok_or_else(|| CoreError::InvalidVersion(s.to_string()))?;
        let num = |i: usize| -> Result<u32> {
            match caps.get(i) {
                Some(m) => m
                    .as_str()
                    .parse()
                    .map_err(|_| CoreError::InvalidVersion(s.to_string())),
                None => Ok(0),
            }
        };
        Ok(Number {
            major: num(1)?,
            minor: num(2)?,
            tag: caps.get(3).map(|m| m.as_str().to_string()).unwrap_or_default(),
            patch: num(4)?,
            build: num(5)?,
        })
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.tag.is_empty() {
            write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        } else {
            write!(f, "{}.{}-{}{}", self.major, self.minor, self.tag, self.patch)?;
        }
        if self.build > 0 {
            write!(f, ".{}", self.build)?;
        }
        Ok(())
    }
}

impl Ord for Number {
    fn cmp(&self, other: &Self) -> Ordering {
        self.major
            .cmp(&other.major)
            .then(self.minor.cmp(&other.minor))
            .then_with(|| match (self.tag.is_empty(), other.tag.is_empty()) {
                // A release sorts after any pre-release of the same minor.
                (true, false) => Ordering::Greater,
                (false, true) => Ordering::Less,
                _ => self.tag.cmp(&other.tag),
            })
            .then(self.patch.cmp(&other.patch))
            .then(self.build.cmp(&other.build))
    }
}

impl PartialOrd for Number {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A version number built for a particular series and architecture
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Binary {
    pub number: Number,
    pub series: String,
    pub arch: String,
}

impl Binary {
    pub fn new(number: Number, series: impl Into<String>, arch: impl Into<String>) -> Self {
        Self {
            number,
            series: series.into(),
            arch: arch.into(),
        }
    }
}

impl FromStr for Binary {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.rsplitn(3, '-');
        let (arch, series, number) = match (parts.next(), parts.next(), parts.next()) {
            (Some(a), Some(s), Some(n)) if !a.is_empty() && !s.is_empty() => (a, s, n),
            _ => return Err(CoreError::InvalidBinaryVersion(s.to_string())),
        };
        let number = number
            .parse()
            .map_err(|_| CoreError::InvalidBinaryVersion(s.to_string()))?;
        Ok(Binary::new(number, series, arch))
    }
}

impl fmt::Display for Binary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.number, self.series, self.arch)
    }
}

macro_rules! string_serde {
    ($ty:ty) => {
        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

string_serde!(Number);
string_serde!(Binary);
