// src/version/mod.rs

//! Versioned identifiers and version requirements
//!
//! Every installed unit is addressed by a combined id of the form
//! `name@version`, where the version is a concrete semantic version.
//! Queries use the same shape but allow a range in the version slot:
//!
//! - `"button"` → any version of `button`
//! - `"button@^1.2"` → caret range
//! - `"button@1.2.0"` → exactly 1.2.0 (a bare version is never a caret range)
//! - `"button@2.0.0.1"` → malformed, coerced to `=2.0.0`
//!
//! Scoped names such as `@ui/button@1.0.0` are supported: the separator is the
//! last `@` that is not the first character.

use crate::error::{Error, Result};
use semver::{BuildMetadata, Comparator, Op, Prerelease, Version, VersionReq};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Separator between a name and its version or range
pub const SEPARATOR: char = '@';

/// Join a name and a concrete version into a combined id
pub fn combine(name: &str, version: &Version) -> String {
    format!("{}{}{}", name, SEPARATOR, version)
}

/// Split a combined id or query into its name and optional version part
pub fn decombine(s: &str) -> (&str, Option<&str>) {
    match s.rfind(SEPARATOR) {
        Some(pos) if pos > 0 => {
            let (name, rest) = s.split_at(pos);
            let version = &rest[1..];
            if version.is_empty() {
                (name, None)
            } else {
                (name, Some(version))
            }
        }
        _ => (s, None),
    }
}

/// Order two combined ids by name, then by semantic precedence
///
/// Ids whose version part does not parse sort after every parsable version of
/// the same name and fall back to lexical order among themselves.
pub fn compare(a: &str, b: &str) -> Ordering {
    let (a_name, a_ver) = decombine(a);
    let (b_name, b_ver) = decombine(b);

    match a_name.cmp(b_name) {
        Ordering::Equal => {}
        ord => return ord,
    }

    let a_parsed = a_ver.map(Version::parse);
    let b_parsed = b_ver.map(Version::parse);
    match (a_parsed, b_parsed) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(Ok(x)), Some(Ok(y))) => x.cmp(&y),
        (Some(Ok(_)), Some(Err(_))) => Ordering::Less,
        (Some(Err(_)), Some(Ok(_))) => Ordering::Greater,
        (Some(Err(_)), Some(Err(_))) => a_ver.cmp(&b_ver),
    }
}

/// A name paired with a concrete version
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VersionedId {
    pub name: String,
    pub version: Version,
}

impl VersionedId {
    pub fn new(name: impl Into<String>, version: Version) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }

    /// Parse a combined id; the version part is mandatory and must be concrete
    pub fn parse(s: &str) -> Result<Self> {
        let (name, version) = decombine(s.trim());
        if name.is_empty() {
            return Err(Error::InvalidQuery(format!("Empty name in id '{}'", s)));
        }
        let version = version
            .ok_or_else(|| Error::InvalidVersion(format!("Id '{}' carries no version", s)))?;
        let version = Version::parse(version)
            .map_err(|e| Error::InvalidVersion(format!("'{}' in id '{}': {}", version, s, e)))?;
        Ok(Self::new(name, version))
    }

    /// The `name@version` string for this id
    pub fn combined(&self) -> String {
        combine(&self.name, &self.version)
    }
}

impl fmt::Display for VersionedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.name, SEPARATOR, self.version)
    }
}

impl FromStr for VersionedId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Ord for VersionedId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name
            .cmp(&other.name)
            .then_with(|| self.version.cmp(&other.version))
    }
}

impl PartialOrd for VersionedId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A name paired with a version range
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub name: String,
    pub range: VersionReq,
}

impl Requirement {
    /// A requirement accepting any version of `name`
    pub fn any(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            range: VersionReq::STAR,
        }
    }

    /// Parse `name` or `name@range`, coercing a malformed range
    pub fn parse(query: &str) -> Result<Self> {
        let (name, range) = decombine(query.trim());
        if name.is_empty() {
            return Err(Error::InvalidQuery(format!("Empty name in query '{}'", query)));
        }
        let range = match range {
            Some(raw) => parse_range(raw)?,
            None => VersionReq::STAR,
        };
        Ok(Self {
            name: name.to_string(),
            range,
        })
    }

    /// True when the range places no constraint on the version
    pub fn is_any(&self) -> bool {
        self.range == VersionReq::STAR
    }

    /// Check a bare version against the range
    ///
    /// An unconstrained requirement also accepts pre-releases, which a
    /// `semver` wildcard alone would not.
    pub fn satisfied_by(&self, version: &Version) -> bool {
        self.is_any() || self.range.matches(version)
    }

    /// Check a full id: the names must be equal and the version in range
    pub fn matches(&self, id: &VersionedId) -> bool {
        self.name == id.name && self.satisfied_by(&id.version)
    }

    /// The single version this requirement pins, if it is an exact match
    pub fn exact_version(&self) -> Option<Version> {
        match self.range.comparators.as_slice() {
            [c] if c.op == Op::Exact => Some(Version {
                major: c.major,
                minor: c.minor?,
                patch: c.patch?,
                pre: c.pre.clone(),
                build: BuildMetadata::EMPTY,
            }),
            _ => None,
        }
    }

    /// The version a consumer asked for: the lowest version the range admits
    ///
    /// Returns `None` for an unconstrained requirement.
    pub fn requested_version(&self) -> Option<Version> {
        if self.is_any() {
            return None;
        }
        let mut best: Option<Version> = None;
        for c in &self.range.comparators {
            let mut v = Version {
                major: c.major,
                minor: c.minor.unwrap_or(0),
                patch: c.patch.unwrap_or(0),
                pre: c.pre.clone(),
                build: BuildMetadata::EMPTY,
            };
            match c.op {
                Op::Exact | Op::GreaterEq | Op::Caret | Op::Tilde | Op::Wildcard => {}
                Op::Greater => {
                    if c.patch.is_some() {
                        v.patch = v.patch.saturating_add(1);
                    } else if c.minor.is_some() {
                        v.minor = v.minor.saturating_add(1);
                        v.patch = 0;
                    } else {
                        v.major = v.major.saturating_add(1);
                        v.minor = 0;
                        v.patch = 0;
                    }
                    v.pre = Prerelease::EMPTY;
                }
                // Upper bounds say nothing about the floor
                _ => continue,
            }
            if best.as_ref().is_none_or(|b| v > *b) {
                best = Some(v);
            }
        }
        best.or_else(|| Some(Version::new(0, 0, 0)))
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_any() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}{}{}", self.name, SEPARATOR, self.range)
        }
    }
}

impl FromStr for Requirement {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Build a requirement matching exactly one version
pub fn exact_range(version: &Version) -> VersionReq {
    VersionReq {
        comparators: vec![Comparator {
            op: Op::Exact,
            major: version.major,
            minor: Some(version.minor),
            patch: Some(version.patch),
            pre: version.pre.clone(),
        }],
    }
}

/// Parse a version range the way queries and includes are written
///
/// A bare version means exactly that version. A leading `v` is tolerated.
/// Anything `semver` rejects is coerced to the exact version made of its
/// leading numeric components.
pub fn parse_range(raw: &str) -> Result<VersionReq> {
    let t = raw.trim();
    if t.is_empty() || t == "*" || t == "x" {
        return Ok(VersionReq::STAR);
    }

    let plain = t.strip_prefix('v').unwrap_or(t);
    if let Ok(v) = Version::parse(plain) {
        return Ok(exact_range(&v));
    }

    if let Ok(req) = VersionReq::parse(&normalize_range(t)) {
        return Ok(req);
    }

    coerce(t)
        .map(|v| {
            tracing::debug!("Coerced malformed range '{}' to ={}", raw, v);
            exact_range(&v)
        })
        .ok_or_else(|| Error::InvalidQuery(format!("Unusable version range '{}'", raw)))
}

/// Extract `major[.minor[.patch]]` from the first run of digits in a string
pub fn coerce(raw: &str) -> Option<Version> {
    let start = raw.find(|c: char| c.is_ascii_digit())?;
    let mut parts = [0u64; 3];
    let mut count = 0;

    for segment in raw[start..].split('.') {
        let digits: String = segment.chars().take_while(|c| c.is_ascii_digit()).collect();
        if digits.is_empty() || count == 3 {
            break;
        }
        parts[count] = digits.parse().ok()?;
        count += 1;
        if digits.len() != segment.len() {
            break;
        }
    }

    Some(Version::new(parts[0], parts[1], parts[2]))
}

fn is_range_boundary(ch: char) -> bool {
    ch.is_ascii_whitespace() || matches!(ch, ',' | '<' | '>' | '=' | '^' | '~')
}

/// Drop `v` prefixes in front of version numbers inside a range
fn normalize_range(raw: &str) -> String {
    let chars: Vec<char> = raw.trim().chars().collect();
    let mut out = String::with_capacity(chars.len());
    for (i, &ch) in chars.iter().enumerate() {
        if ch == 'v'
            && i + 1 < chars.len()
            && chars[i + 1].is_ascii_digit()
            && (i == 0 || is_range_boundary(chars[i - 1]))
        {
            continue;
        }
        out.push(ch);
    }
    out
}
