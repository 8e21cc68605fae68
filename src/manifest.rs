// src/manifest.rs

//! Install manifests and the records they normalize into
//!
//! A manifest is a loosely typed JSON object written by hand or produced by
//! compiling an installed unit. Parsing keeps every field optional;
//! validation then turns it into a strongly typed [`Component`] or
//! [`Package`] with every default applied, so nothing downstream has to
//! second-guess a missing field.
//!
//! # Example component manifest
//!
//! ```json
//! {
//!   "type": "component",
//!   "id": "button",
//!   "name": "Button",
//!   "version": "2.0.0",
//!   "compatibleUntil": "1.5.0",
//!   "files": ["index.html", "js/*.js"],
//!   "input": [{ "name": "label", "required": true }],
//!   "output": [{ "name": "click", "type": "event" }]
//! }
//! ```
//!
//! # Example package manifest
//!
//! ```json
//! {
//!   "type": "package",
//!   "id": "forms",
//!   "name": "Forms",
//!   "version": "1.0.0",
//!   "includes": [
//!     "button@^2.0.0",
//!     "package/layout@1.x",
//!     { "id": "slider@^1", "fallback": "slider@1.2.0.zip" }
//!   ]
//! }
//! ```

use crate::error::{Error, Result};
use crate::filesystem::path::sanitize_relative;
use crate::graph::{NodeKey, UnitKind};
use crate::version::{Requirement, VersionedId, combine};
use semver::Version;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::Path;
use tracing::warn;

/// Default widget height and width
pub const DEFAULT_DIMENSION: u32 = 200;

/// Category used when a manifest names none
pub const DEFAULT_CATEGORY: &str = "Uncategorized";

/// Index file used when a manifest names none, or names a directory
pub const DEFAULT_INDEX_FILE: &str = "index.html";

/// Just enough of a manifest to dispatch on its `type`
#[derive(Debug, Deserialize)]
struct ManifestHeader {
    #[serde(rename = "type", default)]
    kind: Option<UnitKind>,
}

/// Read the `type` field of a manifest file
pub fn manifest_kind(path: &Path) -> Result<Option<UnitKind>> {
    let content = fs::read_to_string(path)?;
    let header: ManifestHeader = serde_json::from_str(&content)?;
    Ok(header.kind)
}

fn required_text(value: Option<String>, field: &str) -> Result<String> {
    match value.map(|v| v.trim().to_string()) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(Error::InvalidManifest(format!("'{}' must be a non-empty string", field))),
    }
}

fn parse_version(raw: Option<String>, field: &str) -> Result<Version> {
    let raw = required_text(raw, field)?;
    Version::parse(&raw)
        .map_err(|e| Error::InvalidVersion(format!("'{}' = '{}': {}", field, raw, e)))
}

fn dimension(value: Option<i64>, field: &str) -> Result<u32> {
    match value {
        None => Ok(DEFAULT_DIMENSION),
        Some(v) => u32::try_from(v)
            .map_err(|_| Error::InvalidManifest(format!("'{}' must be >= 0, got {}", field, v))),
    }
}

/// Normalize a relative path and render it with forward slashes
pub(crate) fn relative_string(raw: &str) -> Result<String> {
    let path = sanitize_relative(raw.trim())?;
    Ok(path.to_string_lossy().replace('\\', "/"))
}

// ---------------------------------------------------------------------------
// Components
// ---------------------------------------------------------------------------

/// An input port as written in a manifest
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawInput {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub required: Option<bool>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
}

/// An output port as written in a manifest
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawOutput {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
}

/// Component manifest as parsed, before validation
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentManifest {
    #[serde(rename = "type", default)]
    pub kind: Option<UnitKind>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub compatible_until: Option<String>,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub input: Vec<RawInput>,
    #[serde(default)]
    pub output: Vec<RawOutput>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub minimized: Option<bool>,
    #[serde(default)]
    pub default_height: Option<i64>,
    #[serde(default)]
    pub default_width: Option<i64>,
    #[serde(default)]
    pub index_file: Option<String>,
}

/// A validated input port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSpec {
    pub name: String,
    /// Maximum number of connections; 0 means unlimited
    pub limit: u32,
    pub required: bool,
    #[serde(rename = "type")]
    pub kind: String,
}

/// A validated output port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// A normalized component record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Component {
    pub id: String,
    pub name: String,
    pub description: String,
    pub version: Version,
    /// Lowest version of the same id this one can stand in for
    pub compatible_until: Version,
    pub default_height: u32,
    pub default_width: u32,
    pub input: Vec<InputSpec>,
    pub output: Vec<OutputSpec>,
    pub category: String,
    pub minimized: bool,
    /// Declared glob patterns, relative to the component directory
    pub files: Vec<String>,
    /// Entry point, relative to the component directory
    pub index_file: String,
}

impl ComponentManifest {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// Validate and apply defaults
    pub fn validate(self) -> Result<Component> {
        if let Some(kind) = self.kind
            && kind != UnitKind::Component
        {
            return Err(Error::InvalidManifest(format!(
                "Expected a component manifest, found type '{}'",
                kind
            )));
        }

        let id = required_text(self.id, "id")?;
        let name = required_text(self.name, "name")?;
        let version = parse_version(self.version, "version")?;

        let compatible_until = match self.compatible_until {
            Some(raw) if !raw.trim().is_empty() => {
                let until = parse_version(Some(raw), "compatibleUntil")?;
                if until > version {
                    return Err(Error::InvalidManifest(format!(
                        "compatibleUntil {} is newer than version {}",
                        until, version
                    )));
                }
                until
            }
            _ => version.clone(),
        };

        let mut input = Vec::with_capacity(self.input.len());
        for (i, raw) in self.input.into_iter().enumerate() {
            let name = required_text(raw.name, &format!("input[{}].name", i))?;
            let limit = match raw.limit {
                None => 0,
                Some(v) => u32::try_from(v).map_err(|_| {
                    Error::InvalidManifest(format!("input[{}].limit must be >= 0, got {}", i, v))
                })?,
            };
            let kind = raw
                .kind
                .filter(|k| !k.trim().is_empty())
                .unwrap_or_else(|| name.clone());
            input.push(InputSpec {
                name,
                limit,
                required: raw.required.unwrap_or(false),
                kind,
            });
        }

        let mut output = Vec::with_capacity(self.output.len());
        for (i, raw) in self.output.into_iter().enumerate() {
            let name = required_text(raw.name, &format!("output[{}].name", i))?;
            let kind = raw
                .kind
                .filter(|k| !k.trim().is_empty())
                .unwrap_or_else(|| name.clone());
            output.push(OutputSpec { name, kind });
        }

        let files = self
            .files
            .iter()
            .map(|pattern| relative_string(pattern))
            .collect::<Result<Vec<_>>>()?;

        let index_file = match self.index_file {
            Some(raw) if !raw.trim().is_empty() => relative_string(&raw)?,
            _ => DEFAULT_INDEX_FILE.to_string(),
        };

        Ok(Component {
            id,
            name,
            description: self.description.unwrap_or_default(),
            version,
            compatible_until,
            default_height: dimension(self.default_height, "defaultHeight")?,
            default_width: dimension(self.default_width, "defaultWidth")?,
            input,
            output,
            category: self
                .category
                .filter(|c| !c.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_CATEGORY.to_string()),
            minimized: self.minimized.unwrap_or(false),
            files,
            index_file,
        })
    }
}

impl Component {
    pub fn combined_id(&self) -> String {
        combine(&self.id, &self.version)
    }

    pub fn versioned_id(&self) -> VersionedId {
        VersionedId::new(self.id.clone(), self.version.clone())
    }

    pub fn node_key(&self) -> NodeKey {
        NodeKey::component(self.combined_id())
    }

    /// Serialize as an install manifest (`type` included)
    pub fn to_manifest_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(&Tagged {
            kind: UnitKind::Component,
            unit: self,
        })?)
    }
}

#[derive(Serialize)]
struct Tagged<'a, T> {
    #[serde(rename = "type")]
    kind: UnitKind,
    #[serde(flatten)]
    unit: &'a T,
}

// ---------------------------------------------------------------------------
// Packages
// ---------------------------------------------------------------------------

/// One entry of a package's `includes` as written
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawInclude {
    Reference(String),
    Detailed {
        #[serde(alias = "range", alias = "reference")]
        id: String,
        #[serde(default)]
        fallback: Option<String>,
        #[serde(rename = "type", default)]
        kind: Option<UnitKind>,
    },
    Other(serde_json::Value),
}

/// A normalized include: what to look for, and where to get it otherwise
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "IncludeRecord", try_from = "IncludeRecord")]
pub struct Include {
    /// `None` for a bare reference, which may name either kind
    pub kind: Option<UnitKind>,
    pub requirement: Requirement,
    /// Archive or manifest path, relative to the package manifest
    pub fallback: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IncludeRecord {
    reference: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    fallback: Option<String>,
}

impl From<Include> for IncludeRecord {
    fn from(include: Include) -> Self {
        Self {
            reference: include.reference(),
            fallback: include.fallback,
        }
    }
}

impl TryFrom<IncludeRecord> for Include {
    type Error = Error;

    fn try_from(record: IncludeRecord) -> Result<Self> {
        let (kind, requirement) = parse_reference(&record.reference, None)?;
        Ok(Self {
            kind,
            requirement,
            fallback: record.fallback,
        })
    }
}

/// Split an optional `component/` or `package/` prefix off a reference
///
/// A bare reference yields no kind. Scoped names (`@ui/button`) carry a slash
/// of their own and are left intact.
pub fn parse_reference(raw: &str, kind: Option<UnitKind>) -> Result<(Option<UnitKind>, Requirement)> {
    let raw = raw.trim();
    let (prefixed, rest) = match raw.split_once('/') {
        Some((prefix, rest)) => match UnitKind::parse(prefix) {
            Some(k) => (Some(k), rest),
            None => (None, raw),
        },
        None => (None, raw),
    };

    if let (Some(explicit), Some(prefixed)) = (kind, prefixed)
        && explicit != prefixed
    {
        return Err(Error::InvalidManifest(format!(
            "Include '{}' is marked as {} but prefixed as {}",
            raw, explicit, prefixed
        )));
    }

    Ok((prefixed.or(kind), Requirement::parse(rest)?))
}

impl Include {
    /// Reference as written back, e.g. `component/button@^2.0.0` or `grid@1`
    pub fn reference(&self) -> String {
        match self.kind {
            Some(kind) => format!("{}/{}", kind, self.requirement),
            None => self.requirement.to_string(),
        }
    }

    /// Kinds to look in, in order; bare references try components first
    pub fn candidate_kinds(&self) -> &'static [UnitKind] {
        match self.kind {
            Some(UnitKind::Component) => &[UnitKind::Component],
            Some(UnitKind::Package) => &[UnitKind::Package],
            None => &[UnitKind::Component, UnitKind::Package],
        }
    }

    fn from_raw(raw: RawInclude) -> Result<Self> {
        match raw {
            RawInclude::Reference(reference) => {
                let (kind, requirement) = parse_reference(&reference, None)?;
                Ok(Self {
                    kind,
                    requirement,
                    fallback: None,
                })
            }
            RawInclude::Detailed { id, fallback, kind } => {
                let (kind, requirement) = parse_reference(&id, kind)?;
                let fallback = match fallback {
                    Some(f) if !f.trim().is_empty() => Some(relative_string(&f)?),
                    _ => None,
                };
                Ok(Self {
                    kind,
                    requirement,
                    fallback,
                })
            }
            RawInclude::Other(value) => Err(Error::InvalidManifest(format!(
                "Unrecognized include entry {}",
                value
            ))),
        }
    }
}

impl fmt::Display for Include {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reference())?;
        if let Some(fallback) = &self.fallback {
            write!(f, " (fallback {})", fallback)?;
        }
        Ok(())
    }
}

/// Package manifest as parsed, before validation
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PackageManifest {
    #[serde(rename = "type", default)]
    pub kind: Option<UnitKind>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub includes: Vec<RawInclude>,
}

/// A normalized package record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    pub id: String,
    pub name: String,
    pub description: String,
    pub version: Version,
    /// Declared includes, normalized
    pub includes: Vec<Include>,
    /// Units the includes were bound to at install time
    #[serde(default)]
    pub resolved: BTreeSet<NodeKey>,
}

impl PackageManifest {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// Validate and normalize; malformed includes are dropped with a warning
    pub fn validate(self) -> Result<Package> {
        if let Some(kind) = self.kind
            && kind != UnitKind::Package
        {
            return Err(Error::InvalidManifest(format!(
                "Expected a package manifest, found type '{}'",
                kind
            )));
        }

        let id = required_text(self.id, "id")?;
        let name = required_text(self.name, "name")?;
        let version = parse_version(self.version, "version")?;

        if self.includes.is_empty() {
            return Err(Error::InvalidManifest(format!(
                "Package {} includes nothing",
                id
            )));
        }

        let mut includes = Vec::with_capacity(self.includes.len());
        for raw in self.includes {
            match Include::from_raw(raw) {
                Ok(include) => {
                    if include.kind == Some(UnitKind::Package) && include.requirement.name == id {
                        return Err(Error::CircularDependency(format!(
                            "Package {} includes itself",
                            id
                        )));
                    }
                    includes.push(include);
                }
                Err(e) => warn!("Dropping malformed include in package {}: {}", id, e),
            }
        }

        if includes.is_empty() {
            return Err(Error::InvalidManifest(format!(
                "Package {} has no usable includes",
                id
            )));
        }

        Ok(Package {
            id,
            name,
            description: self.description.unwrap_or_default(),
            version,
            includes,
            resolved: BTreeSet::new(),
        })
    }
}

impl Package {
    pub fn combined_id(&self) -> String {
        combine(&self.id, &self.version)
    }

    pub fn node_key(&self) -> NodeKey {
        NodeKey::package(self.combined_id())
    }

    /// Serialize as an install manifest (`type` included, `resolved` left out)
    pub fn to_manifest_json(&self) -> Result<Vec<u8>> {
        let manifest = PackageManifestOut {
            kind: UnitKind::Package,
            id: &self.id,
            name: &self.name,
            description: &self.description,
            version: &self.version,
            includes: &self.includes,
        };
        Ok(serde_json::to_vec_pretty(&manifest)?)
    }
}

#[derive(Serialize)]
struct PackageManifestOut<'a> {
    #[serde(rename = "type")]
    kind: UnitKind,
    id: &'a str,
    name: &'a str,
    description: &'a str,
    version: &'a Version,
    includes: &'a [Include],
}
