// src/packager/compile.rs

//! Compiling installed packages into self-contained archives
//!
//! A compiled package flattens its include tree: every component it reaches,
//! directly or through other packages, is compiled into a nested archive and
//! the manifest's includes are rewritten to pin each component exactly with
//! that archive as fallback.

use super::{Packager, pinned};
use crate::componentizer::{CompileTarget, Compiled, archive_comment, emit};
use crate::error::{Error, Result};
use crate::filesystem::archive::{ArchiveWriter, MANIFEST_NAME, archive_file_name};
use crate::graph::UnitKind;
use crate::manifest::{Include, Package};
use crate::version::Requirement;
use std::collections::BTreeSet;
use tracing::debug;

impl Packager {
    /// Pack the highest version matching `query`, with its components, into an archive
    pub fn compile_package(&self, query: &str, target: CompileTarget<'_>) -> Result<Compiled> {
        let query = Requirement::parse(query)?;
        let package = self
            .best_match(&query)
            .ok_or_else(|| Error::NotFound(format!("No package matches {}", query)))?;
        let combined = package.combined_id();

        let mut writer = ArchiveWriter::new();
        let mut includes = Vec::new();
        for key in self.graph().transitive_dependencies(&package.node_key()) {
            if key.kind != UnitKind::Component {
                continue;
            }
            let record = self.componentizer.get(&key.id).ok_or_else(|| {
                Error::Consistency(format!("{} is in the graph but not installed", key))
            })?;
            let file_name = archive_file_name(&key.id);
            writer.add_bytes(&file_name, &self.componentizer.archive_component(record)?)?;
            debug!("Packed {} into {}", key.id, combined);

            includes.push(Include {
                kind: Some(UnitKind::Component),
                requirement: pinned(&record.component.id, &record.component.version),
                fallback: Some(file_name),
            });
        }

        let manifest = Package {
            includes,
            resolved: BTreeSet::new(),
            ..package.clone()
        };
        writer.add_bytes(MANIFEST_NAME, &manifest.to_manifest_json()?)?;
        let bytes = writer.finish(&archive_comment(&combined, UnitKind::Package))?;
        emit(bytes, &combined, target)
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{component_source, package_source, packager};
    use super::*;
    use crate::filesystem::archive::{entry_names, read_comment};
    use crate::graph::NodeKey;
    use tempfile::TempDir;

    #[test]
    fn test_compile_package_flattens_components() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        let mut p = packager(&temp.path().join("store"));
        let b = component_source(&src.join("b"), "B", "1.0.0");
        p.componentizer_mut().add_component(&b, false).unwrap();
        p.add_package(&package_source(&src, "Q", "1.0.0", r#"["B"]"#), false)
            .unwrap();
        let a = component_source(&src.join("a"), "A", "2.1.0");
        p.componentizer_mut().add_component(&a, false).unwrap();
        p.add_package(&package_source(&src, "P", "1.0.0", r#"["A@^2", "package/Q"]"#), false)
            .unwrap();

        let Compiled::Buffer(bytes) = p.compile_package("P", CompileTarget::Buffer).unwrap() else {
            panic!("expected a buffer");
        };
        let mut names = entry_names(&bytes).unwrap();
        names.sort();
        assert_eq!(names, vec!["A@2.1.0.zip", "B@1.0.0.zip", "manifest.json"]);
        assert!(read_comment(&bytes).unwrap().starts_with("P@1.0.0 (package) blockyard "));
    }

    #[test]
    fn test_compiled_package_installs_into_empty_store() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        let mut first = packager(&temp.path().join("store-a"));
        let a = component_source(&src.join("a"), "A", "1.0.0");
        first.componentizer_mut().add_component(&a, false).unwrap();
        first
            .add_package(&package_source(&src, "P", "1.0.0", r#"["A"]"#), false)
            .unwrap();

        let out = temp.path().join("out");
        let Compiled::Written(archive) = first
            .compile_package("P", CompileTarget::Directory(&out))
            .unwrap()
        else {
            panic!("expected a written archive");
        };

        let mut second = packager(&temp.path().join("store-b"));
        assert_eq!(second.add(&archive, false).unwrap().as_deref(), Some("P@1.0.0"));
        assert!(second.componentizer().has_component("A@1.0.0").unwrap());
        assert_eq!(
            second.get_includes("P", false).unwrap(),
            vec![NodeKey::component("A@1.0.0")]
        );
        // Extraction directories are gone
        let tmp = second.config().tmp_dir();
        assert_eq!(std::fs::read_dir(tmp).unwrap().count(), 0);
    }
}
