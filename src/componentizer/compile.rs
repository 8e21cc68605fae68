// src/componentizer/compile.rs

//! Compiling installed components back into archives

use super::install::collect_files;
use super::{Componentizer, InstalledComponent};
use crate::error::{Error, Result};
use crate::filesystem::archive::{ArchiveWriter, MANIFEST_NAME, archive_file_name};
use crate::graph::UnitKind;
use crate::version::Requirement;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Where a compiled archive goes
#[derive(Debug, Clone, Copy)]
pub enum CompileTarget<'a> {
    /// Return the bytes to the caller
    Buffer,
    /// Write `<id>@<version>.zip` into this directory
    Directory(&'a Path),
}

/// A compiled archive
#[derive(Debug)]
pub enum Compiled {
    Buffer(Vec<u8>),
    Written(PathBuf),
}

/// Comment stored in every archive blockyard writes
pub(crate) fn archive_comment(combined_id: &str, kind: UnitKind) -> String {
    format!(
        "{} ({}) blockyard {}",
        combined_id,
        kind,
        env!("CARGO_PKG_VERSION")
    )
}

/// Hand archive bytes to the requested target
pub(crate) fn emit(bytes: Vec<u8>, combined_id: &str, target: CompileTarget<'_>) -> Result<Compiled> {
    match target {
        CompileTarget::Buffer => Ok(Compiled::Buffer(bytes)),
        CompileTarget::Directory(dir) => {
            fs::create_dir_all(dir)?;
            let path = dir.join(archive_file_name(combined_id));
            fs::write(&path, bytes)?;
            info!("Wrote {}", path.display());
            Ok(Compiled::Written(path))
        }
    }
}

impl Componentizer {
    /// Pack the highest version matching `query` into an archive
    pub fn compile_component(&self, query: &str, target: CompileTarget<'_>) -> Result<Compiled> {
        let query = Requirement::parse(query)?;
        let record = self
            .best_match(&query)
            .ok_or_else(|| Error::NotFound(format!("No component matches {}", query)))?;
        let bytes = self.archive_component(record)?;
        emit(bytes, &record.combined_id(), target)
    }

    /// Build the archive of one installed component
    pub(crate) fn archive_component(&self, record: &InstalledComponent) -> Result<Vec<u8>> {
        let dir = self.storage.path_of(&record.location)?;
        let combined = record.combined_id();

        let mut writer = ArchiveWriter::new();
        writer.add_bytes(MANIFEST_NAME, &record.component.to_manifest_json()?)?;
        for file in collect_files(&dir, &record.component.files)? {
            let name = file.to_string_lossy().replace('\\', "/");
            writer.add_file(&name, &dir.join(&file))?;
        }
        writer.finish(&archive_comment(&combined, UnitKind::Component))
    }
}
