//! Storing and restoring the resolved build graph.
//!
//! The on-disk artifact is self-describing: a magic token, the producing
//! version string and a format version precede the payload. Any mismatch
//! yields the incompatible-file-format error and restore is refused; the
//! caller then requests a full resolve.

use std::io::{Read, Write};

use serde::{Deserialize, Serialize};
use tracing::debug;

use keel_diagnostic::{ErrorInfo, Result};

use crate::model::TopLevelProject;

const MAGIC: &[u8; 8] = b"keelbgf\0";
const FORMAT_VERSION: u32 = 3;

#[derive(Serialize, Deserialize)]
struct Header {
    version_string: String,
    format_version: u32,
}

/// The file name of the build-graph artifact inside a build directory.
pub fn build_graph_file_path(build_directory: &str) -> String {
    format!("{build_directory}/keel.bg")
}

/// Writes the resolved project to its build-graph file.
pub fn store(project: &TopLevelProject, file_path: &str) -> Result<()> {
    debug!(file = file_path, "storing build graph");
    if let Some(parent) = std::path::Path::new(file_path).parent() {
        std::fs::create_dir_all(parent).map_err(|error| {
            ErrorInfo::resolve(
                format!("Cannot create build directory '{}': {error}.", parent.display()),
                keel_ir::CodeLocation::unknown(),
            )
        })?;
    }
    let header = Header {
        version_string: env!("CARGO_PKG_VERSION").to_string(),
        format_version: FORMAT_VERSION,
    };
    let mut buffer = Vec::new();
    buffer.extend_from_slice(MAGIC);
    let header_bytes = bincode::serialize(&header)
        .map_err(|error| ErrorInfo::internal(format!("cannot serialize header: {error}")))?;
    let payload = bincode::serialize(project)
        .map_err(|error| ErrorInfo::internal(format!("cannot serialize build graph: {error}")))?;
    buffer.extend_from_slice(&(header_bytes.len() as u64).to_le_bytes());
    buffer.extend_from_slice(&header_bytes);
    buffer.extend_from_slice(&payload);

    let mut file = std::fs::File::create(file_path).map_err(|error| {
        ErrorInfo::resolve(
            format!("Cannot open build graph file '{file_path}' for writing: {error}."),
            keel_ir::CodeLocation::unknown(),
        )
    })?;
    file.write_all(&buffer).map_err(|error| {
        ErrorInfo::resolve(
            format!("Cannot write build graph file '{file_path}': {error}."),
            keel_ir::CodeLocation::unknown(),
        )
    })?;
    Ok(())
}

/// Reads the build graph back. `NotFound` when there is no stored file;
/// a `Resolve` error naming the incompatibility otherwise.
pub fn restore(file_path: &str) -> Result<TopLevelProject> {
    debug!(file = file_path, "restoring build graph");
    let mut file = match std::fs::File::open(file_path) {
        Ok(file) => file,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            return Err(ErrorInfo::not_found(format!(
                "No stored build graph at '{file_path}'."
            )));
        }
        Err(error) => {
            return Err(ErrorInfo::resolve(
                format!("Cannot open build graph file '{file_path}': {error}."),
                keel_ir::CodeLocation::unknown(),
            ));
        }
    };
    let mut contents = Vec::new();
    file.read_to_end(&mut contents).map_err(|error| {
        ErrorInfo::resolve(
            format!("Cannot read build graph file '{file_path}': {error}."),
            keel_ir::CodeLocation::unknown(),
        )
    })?;

    let incompatible = || {
        ErrorInfo::resolve(
            format!("Build graph file '{file_path}' has an incompatible file format."),
            keel_ir::CodeLocation::unknown(),
        )
    };
    if contents.len() < MAGIC.len() + 8 || &contents[..MAGIC.len()] != MAGIC {
        return Err(incompatible());
    }
    let mut offset = MAGIC.len();
    let mut length_bytes = [0u8; 8];
    length_bytes.copy_from_slice(&contents[offset..offset + 8]);
    let header_len = u64::from_le_bytes(length_bytes) as usize;
    offset += 8;
    if contents.len() < offset + header_len {
        return Err(incompatible());
    }
    let header: Header =
        bincode::deserialize(&contents[offset..offset + header_len]).map_err(|_| incompatible())?;
    if header.version_string != env!("CARGO_PKG_VERSION")
        || header.format_version != FORMAT_VERSION
    {
        return Err(incompatible());
    }
    offset += header_len;
    bincode::deserialize(&contents[offset..]).map_err(|_| incompatible())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ResolvedProduct, ResolvedProject};

    fn sample_project() -> TopLevelProject {
        TopLevelProject {
            project: ResolvedProject {
                name: "demo".to_string(),
                enabled: true,
                products: vec![ResolvedProduct {
                    name: "app".to_string(),
                    enabled: true,
                    ..ResolvedProduct::default()
                }],
                ..ResolvedProject::default()
            },
            build_directory: "/b/default".to_string(),
            ..TopLevelProject::default()
        }
    }

    #[test]
    fn store_restore_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir
            .path()
            .join("keel.bg")
            .to_string_lossy()
            .replace('\\', "/");
        let project = sample_project();
        store(&project, &path).unwrap();
        let restored = restore(&path).unwrap();
        assert_eq!(restored, project);
    }

    #[test]
    fn missing_file_is_not_found() {
        let error = restore("/definitely/not/here/keel.bg").unwrap_err();
        assert_eq!(error.kind, keel_diagnostic::ErrorKind::NotFound);
    }

    #[test]
    fn wrong_magic_is_incompatible() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir
            .path()
            .join("keel.bg")
            .to_string_lossy()
            .replace('\\', "/");
        std::fs::write(&path, b"NOTKEEL\0morebytesfollow").unwrap();
        let error = restore(&path).unwrap_err();
        assert!(error.to_string().contains("incompatible file format"));
    }

    #[test]
    fn truncated_file_is_incompatible() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir
            .path()
            .join("keel.bg")
            .to_string_lossy()
            .replace('\\', "/");
        store(&sample_project(), &path).unwrap();
        let full = std::fs::read(&path).unwrap();
        std::fs::write(&path, &full[..12]).unwrap();
        let error = restore(&path).unwrap_err();
        assert!(error.to_string().contains("incompatible file format"));
    }
}
