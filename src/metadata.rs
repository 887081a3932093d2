//! Build manifest decoding.
//!
//! The manifest lists the Dockerfiles contributed by buildpack extensions:
//!
//! ```toml
//! [[dockerfiles]]
//! extension_id = "samples/curl"
//! path = "/layers/samples_curl/Dockerfile"
//! build = true
//!
//! [[dockerfiles.args.build]]
//! name = "base_image"
//! value = "ubuntu"
//! ```
//!
//! Other top-level tables (such as `[[buildpacks]]`) are accepted and ignored.

use crate::config::{EnvConfig, DOCKERFILE_NAME_ENV};
use crate::error::{ExtenderError, Result};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Component, Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UnitArg {
    pub name: String,
    pub value: String,
}

impl UnitArg {
    pub fn new(name: &str, value: &str) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UnitArgs {
    #[serde(default)]
    pub build: Vec<UnitArg>,
    #[serde(default)]
    pub run: Vec<UnitArg>,
}

/// One Dockerfile build request
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DockerfileUnit {
    pub extension_id: String,
    /// Dockerfile location relative to the workspace
    pub path: String,
    #[serde(default)]
    pub build: bool,
    #[serde(default)]
    pub run: bool,
    #[serde(default)]
    pub args: UnitArgs,
}

impl DockerfileUnit {
    /// The unit used when no manifest is configured
    pub fn implicit(dockerfile_name: &str) -> Self {
        Self {
            extension_id: dockerfile_name.to_string(),
            path: dockerfile_name.to_string(),
            build: true,
            run: false,
            args: UnitArgs::default(),
        }
    }

    /// `workspace/path` resolved lexically; a leading `/` on `path` stays inside the workspace
    pub fn resolve_path(&self, workspace_dir: &Path) -> PathBuf {
        let mut resolved = workspace_dir.to_path_buf();
        let mut depth: usize = 0;
        for component in Path::new(&self.path).components() {
            match component {
                Component::Normal(part) => {
                    resolved.push(part);
                    depth += 1;
                }
                // Never climbs above the workspace; `parse` rejects such paths
                Component::ParentDir if depth > 0 => {
                    resolved.pop();
                    depth -= 1;
                }
                _ => {}
            }
        }
        resolved
    }

    /// Build-time arguments flattened with last-write-wins
    pub fn flattened_build_args(&self) -> Vec<(String, String)> {
        flatten_args(&self.args.build)
    }

    pub fn flattened_run_args(&self) -> Vec<(String, String)> {
        flatten_args(&self.args.run)
    }
}

/// Ordered build units, read-only once loaded
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildManifest {
    pub units: Vec<DockerfileUnit>,
}

#[derive(Debug, Deserialize)]
struct MetadataToml {
    #[serde(default)]
    dockerfiles: Vec<DockerfileUnit>,
}

impl BuildManifest {
    /// The configured manifest, or a single implicit unit when none is configured
    pub fn for_config(config: &EnvConfig) -> Result<Self> {
        match config.metadata_path() {
            Some(path) => load(&path),
            None => {
                let name = &config.dockerfile_name;
                if name.trim().is_empty() || escapes_root(Path::new(name)) {
                    return Err(ExtenderError::config(
                        DOCKERFILE_NAME_ENV,
                        format!("'{}' is not a path inside the workspace", name),
                    ));
                }
                Ok(Self {
                    units: vec![DockerfileUnit::implicit(name)],
                })
            }
        }
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

/// Load and validate the manifest at `path`
pub fn load(path: &Path) -> Result<BuildManifest> {
    let content = fs::read_to_string(path)
        .map_err(|e| ExtenderError::manifest(path, format!("reading manifest: {}", e)))?;
    let manifest = parse(&content, path)?;
    tracing::info!(
        path = %path.display(),
        units = manifest.len(),
        "Build manifest loaded"
    );
    Ok(manifest)
}

/// Decode manifest text; `origin` is only used in error messages
pub fn parse(content: &str, origin: &Path) -> Result<BuildManifest> {
    let parsed: MetadataToml =
        toml::from_str(content).map_err(|e| ExtenderError::manifest(origin, e.to_string()))?;

    let mut seen = HashSet::new();
    for unit in &parsed.dockerfiles {
        if !seen.insert(unit.extension_id.as_str()) {
            return Err(ExtenderError::manifest(
                origin,
                format!("duplicate extension_id '{}'", unit.extension_id),
            ));
        }
        if unit.path.trim().is_empty() {
            return Err(ExtenderError::manifest(
                origin,
                format!("extension '{}' has an empty path", unit.extension_id),
            ));
        }
        if escapes_root(Path::new(&unit.path)) {
            return Err(ExtenderError::manifest(
                origin,
                format!(
                    "path '{}' of extension '{}' escapes the workspace",
                    unit.path, unit.extension_id
                ),
            ));
        }
    }

    Ok(BuildManifest {
        units: parsed.dockerfiles,
    })
}

/// Flatten ordered pairs into a mapping: later values win, keys keep their first position
pub fn flatten_args(args: &[UnitArg]) -> Vec<(String, String)> {
    let mut positions: HashMap<&str, usize> = HashMap::new();
    let mut flat: Vec<(String, String)> = Vec::new();
    for arg in args {
        match positions.get(arg.name.as_str()) {
            Some(&idx) => flat[idx].1 = arg.value.clone(),
            None => {
                positions.insert(arg.name.as_str(), flat.len());
                flat.push((arg.name.clone(), arg.value.clone()));
            }
        }
    }
    flat
}

fn escapes_root(path: &Path) -> bool {
    let mut depth: usize = 0;
    for component in path.components() {
        match component {
            Component::Normal(_) => depth += 1,
            Component::ParentDir => match depth.checked_sub(1) {
                Some(d) => depth = d,
                None => return true,
            },
            _ => {}
        }
    }
    false
}
