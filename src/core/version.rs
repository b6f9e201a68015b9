//! Version classification - maps runtime version identifiers to categories

use std::cmp::Ordering;
use std::fmt::{self, Display};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Category of a runtime version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VersionType {
    Release,
    Snapshot,
    OldBeta,
    OldAlpha,
}

impl VersionType {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Release => "Release",
            Self::Snapshot => "Snapshot",
            Self::OldBeta => "OldBeta",
            Self::OldAlpha => "OldAlpha",
        }
    }

    /// Versions predating the modern release line
    pub fn is_legacy(&self) -> bool {
        matches!(self, Self::OldBeta | Self::OldAlpha)
    }
}

impl Display for VersionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VersionError {
    #[error("Empty version string")]
    Empty,

    #[error("Incorrect major version: {0}")]
    IncorrectMajor(String),

    #[error("Incorrect minor version: {0}")]
    IncorrectMinor(String),

    #[error("Incorrect patch version: {0}")]
    IncorrectPatch(String),

    #[error("Incorrect snapshot year: {0}")]
    IncorrectYear(String),

    #[error("Incorrect snapshot week: {0}")]
    IncorrectWeek(String),

    #[error("Incorrect snapshot build: {0}")]
    IncorrectBuild(String),

    #[error("Missing minor version")]
    MissingMinor,

    #[error("Invalid snapshot format")]
    InvalidSnapshotFormat,

    #[error("Too many components")]
    ExtraComponents,

    #[error("Unrecognized version format: {0}")]
    UnknownVersionFormat(String),
}

/// A numeric `MAJOR.MINOR[.PATCH]` version
///
/// A missing patch compares as `.0`, so `1.5` equals `1.5.0`.
#[derive(Debug, Clone)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: Option<u32>,
}

impl Version {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch: Some(patch),
        }
    }

    fn key(&self) -> (u32, u32, u32) {
        (self.major, self.minor, self.patch.unwrap_or(0))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Version {}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.patch {
            Some(patch) => write!(f, "{}.{}.{}", self.major, self.minor, patch),
            None => write!(f, "{}.{}", self.major, self.minor),
        }
    }
}

fn parse_component(s: &str) -> Option<u32> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut split = s.split('.');

        let major_str = split.next().unwrap_or_default();
        let minor_str = split.next().ok_or(VersionError::MissingMinor)?;
        let patch_str = split.next();

        if split.next().is_some() {
            return Err(VersionError::ExtraComponents);
        }

        let major = parse_component(major_str)
            .ok_or_else(|| VersionError::IncorrectMajor(major_str.to_string()))?;
        let minor = parse_component(minor_str)
            .ok_or_else(|| VersionError::IncorrectMinor(minor_str.to_string()))?;
        let patch = match patch_str {
            Some(p) => Some(
                parse_component(p).ok_or_else(|| VersionError::IncorrectPatch(p.to_string()))?,
            ),
            None => None,
        };

        Ok(Self {
            major,
            minor,
            patch,
        })
    }
}

/// A weekly snapshot such as `24w14a`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub year: u32,
    pub week: u32,
    pub build: String,
}

impl Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}w{:02}{}", self.year, self.week, self.build)
    }
}

impl FromStr for Snapshot {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if !s.is_ascii() {
            return Err(VersionError::InvalidSnapshotFormat);
        }

        let (year_str, rest) = s
            .split_once('w')
            .ok_or(VersionError::InvalidSnapshotFormat)?;

        if year_str.len() != 2 || rest.len() < 3 {
            return Err(VersionError::InvalidSnapshotFormat);
        }

        let week_str = &rest[..2];
        let build_str = &rest[2..];

        let year = parse_component(year_str)
            .ok_or_else(|| VersionError::IncorrectYear(year_str.to_string()))?;

        let week = parse_component(week_str)
            .filter(|w| (1..=53).contains(w))
            .ok_or_else(|| VersionError::IncorrectWeek(week_str.to_string()))?;

        if !build_str.bytes().all(|b| b.is_ascii_lowercase()) {
            return Err(VersionError::IncorrectBuild(build_str.to_string()));
        }

        Ok(Self {
            year,
            week,
            build: build_str.to_string(),
        })
    }
}

/// A parsed runtime version identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GameVersion {
    Release(Version),
    Snapshot(Snapshot),
    /// Pre-release or release candidate of an upcoming release
    PreRelease { base: Version, tag: String },
    OldBeta(Version),
    /// Alpha, infdev, indev, classic and pre-classic builds
    OldAlpha(String),
}

impl GameVersion {
    pub fn version_type(&self) -> VersionType {
        match self {
            Self::Release(_) => VersionType::Release,
            Self::Snapshot(_) | Self::PreRelease { .. } => VersionType::Snapshot,
            Self::OldBeta(_) => VersionType::OldBeta,
            Self::OldAlpha(_) => VersionType::OldAlpha,
        }
    }

    /// The numeric release this version belongs to, when there is one
    pub fn release(&self) -> Option<&Version> {
        match self {
            Self::Release(v) => Some(v),
            Self::PreRelease { base, .. } => Some(base),
            _ => None,
        }
    }
}

fn parse_pre_release(s: &str) -> Option<GameVersion> {
    let (base, tag) = if let Some((base, number)) = s.split_once(" Pre-Release ") {
        parse_component(number)?;
        (base, format!("pre{}", number))
    } else {
        let (base, tag) = s.split_once('-')?;
        let number = tag.strip_prefix("pre").or_else(|| tag.strip_prefix("rc"))?;
        parse_component(number)?;
        (base, tag.to_string())
    };

    let base = Version::from_str(base).ok()?;
    Some(GameVersion::PreRelease { base, tag })
}

/// Parses `1.7.3`, `1.2_02`, `1.6-tb3`, `0.0.11a`, `0.30_01c`
fn parse_legacy_body(body: &str) -> Option<Version> {
    let (head, tail) = match body.find(['_', '-']) {
        Some(idx) => (&body[..idx], Some(&body[idx + 1..])),
        None => (body, None),
    };

    if let Some(tail) = tail {
        if tail.is_empty() || !tail.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return None;
        }
    }

    let head = head.trim_end_matches(|c: char| c.is_ascii_lowercase());
    Version::from_str(head).ok()
}

fn is_dated_build(s: &str) -> bool {
    let mut parts = s.splitn(2, '-');
    let date = parts.next().unwrap_or_default();
    let date_ok = date.len() == 8 && parse_component(date).is_some();
    match parts.next() {
        Some(time) => date_ok && parse_component(time).is_some(),
        None => date_ok,
    }
}

fn parse_old_alpha(s: &str) -> Option<GameVersion> {
    let recognized = if let Some(body) = s.strip_prefix("inf-") {
        body.len() == 8 && parse_component(body).is_some()
    } else if let Some(body) = s.strip_prefix("in-") {
        is_dated_build(body)
    } else if let Some(body) = s.strip_prefix("rd-") {
        parse_component(body).is_some()
    } else if let Some(body) = s.strip_prefix('a').or_else(|| s.strip_prefix('c')) {
        parse_legacy_body(body).is_some()
    } else {
        false
    };

    recognized.then(|| GameVersion::OldAlpha(s.to_string()))
}

impl FromStr for GameVersion {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(VersionError::Empty);
        }

        if let Ok(ver) = Version::from_str(s) {
            return Ok(GameVersion::Release(ver));
        }

        if let Ok(snap) = Snapshot::from_str(s) {
            return Ok(GameVersion::Snapshot(snap));
        }

        if let Some(pre) = parse_pre_release(s) {
            return Ok(pre);
        }

        if let Some(body) = s.strip_prefix('b') {
            if let Some(ver) = parse_legacy_body(body) {
                return Ok(GameVersion::OldBeta(ver));
            }
        }

        if let Some(alpha) = parse_old_alpha(s) {
            return Ok(alpha);
        }

        Err(VersionError::UnknownVersionFormat(s.to_string()))
    }
}

/// Classify a version identifier into its category
pub fn classify(version: &str) -> Result<VersionType, VersionError> {
    GameVersion::from_str(version).map(|v| v.version_type())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn releases() {
        for v in ["1.21.5", "1.8", "1.0", "1.20.10"] {
            assert_eq!(classify(v), Ok(VersionType::Release), "{}", v);
        }
    }

    #[test]
    fn snapshots_and_pre_releases() {
        for v in [
            "24w14a",
            "25w14craftmine",
            "1.21.5-pre1",
            "1.21-rc1",
            "1.14 Pre-Release 2",
        ] {
            assert_eq!(classify(v), Ok(VersionType::Snapshot), "{}", v);
        }
    }

    #[test]
    fn legacy_buckets() {
        for v in ["b1.7.3", "b1.2_02", "b1.6-tb3", "b1.8.1"] {
            assert_eq!(classify(v), Ok(VersionType::OldBeta), "{}", v);
        }
        for v in [
            "a1.2.6",
            "a1.1.2_01",
            "inf-20100618",
            "in-20100223",
            "in-20091223-1459",
            "c0.30_01c",
            "c0.0.11a",
            "rd-132211",
        ] {
            assert_eq!(classify(v), Ok(VersionType::OldAlpha), "{}", v);
        }
    }

    #[test]
    fn rejects_unclassifiable() {
        for v in [
            "", "latest", "1", "1.2.3.4", "1.x", "24w99a", "b", "1.21.5 ", "+1.2", "1.21-beta",
        ] {
            assert!(classify(v).is_err(), "{} should not classify", v);
        }
    }

    #[test]
    fn ordering_treats_missing_patch_as_zero() {
        let v1_5: Version = "1.5".parse().unwrap();
        let v1_5_2: Version = "1.5.2".parse().unwrap();
        assert!(v1_5 < v1_5_2);
        assert_eq!(v1_5.cmp(&Version::new(1, 5, 0)), Ordering::Equal);
        assert_eq!(v1_5, Version::new(1, 5, 0));
        assert_eq!(v1_5.to_string(), "1.5");
        assert!("1.6.1".parse::<Version>().unwrap() > v1_5_2);
    }
}
