use crate::builder::BuilderKind;
use crate::constants::*;
use crate::error::{ExtenderError, Result};
use crate::ignore::IgnorePathSet;
use crate::layers::unpack::ExistingFiles;
use crate::logging::{LogFormat, LogSettings};
use crate::oci::Digest;
use std::collections::BTreeMap;
use std::path::PathBuf;

pub const WORKSPACE_DIR_ENV: &str = "WORKSPACE_DIR";
pub const CACHE_DIR_ENV: &str = "CACHE_DIR";
pub const BUILD_DIR_ENV: &str = "BUILD_DIR";
pub const BUILDER_HOME_ENV: &str = "BUILDER_HOME";
pub const TARGET_ROOT_ENV: &str = "TARGET_ROOT";
pub const DOCKERFILE_NAME_ENV: &str = "DOCKERFILE_NAME";
pub const LEGACY_DOCKERFILE_NAME_ENV: &str = "DOCKER_FILE_NAME";
pub const METADATA_FILE_NAME_ENV: &str = "METADATA_FILE_NAME";
pub const IGNORE_PATHS_ENV: &str = "IGNORE_PATHS";
pub const EXTRACT_LAYERS_ENV: &str = "EXTRACT_LAYERS";
pub const FILES_TO_SEARCH_ENV: &str = "FILES_TO_SEARCH";
pub const BUILD_ARG_PREFIX_ENV: &str = "BUILD_ARG_PREFIX";
pub const KNOWN_BASE_DIGEST_ENV: &str = "KNOWN_BASE_DIGEST";
pub const EXISTING_FILES_ENV: &str = "EXISTING_FILES";
pub const REAP_ORPHANS_ENV: &str = "REAP_ORPHANS";
pub const BUILDER_ENV: &str = "BUILDER";
pub const BUILDER_BINARY_ENV: &str = "BUILDER_BINARY";
pub const SNAPSHOT_MODE_ENV: &str = "SNAPSHOT_MODE";
pub const GRAPH_DRIVER_ENV: &str = "GRAPH_DRIVER";
pub const STORAGE_ROOT_ENV: &str = "STORAGE_ROOT_PATH";
pub const STORAGE_RUN_ROOT_ENV: &str = "STORAGE_RUN_ROOT_PATH";
pub const LOGGING_LEVEL_ENV: &str = "LOGGING_LEVEL";
pub const LOGGING_FORMAT_ENV: &str = "LOGGING_FORMAT";
pub const LOGGING_TIMESTAMP_ENV: &str = "LOGGING_TIMESTAMP";

/// Container storage settings used by the buildah flavour
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageSettings {
    pub graph_driver: String,
    pub root: PathBuf,
    pub run_root: PathBuf,
}

/// Typed configuration, read once at startup and passed by reference.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub workspace_dir: PathBuf,
    pub cache_dir: PathBuf,
    /// Receives `<digest>.tgz` archives and `config.json`
    pub build_dir: PathBuf,
    /// Working directory while the builder runs
    pub builder_home: PathBuf,
    pub target_root: PathBuf,
    pub dockerfile_name: String,
    pub metadata_file_name: Option<String>,
    pub ignore_paths: IgnorePathSet,
    pub extract_layers: bool,
    pub files_to_search: Vec<String>,
    pub build_arg_prefix: String,
    /// `KEY=VALUE` pairs derived from prefixed environment variables, sorted by key
    pub global_build_args: Vec<String>,
    pub known_base_digest: Option<Digest>,
    pub existing_files: ExistingFiles,
    pub reap_orphans: bool,
    pub builder: BuilderKind,
    pub builder_binary: Option<PathBuf>,
    pub snapshot_mode: String,
    pub storage: StorageSettings,
    pub logging: LogSettings,
}

impl EnvConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_vars(std::env::vars())
    }

    /// Build the configuration from an explicit set of variables
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars: BTreeMap<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        let get = |key: &str| lookup(&vars, key);

        let workspace_dir = PathBuf::from(get(WORKSPACE_DIR_ENV).unwrap_or(DEFAULT_WORKSPACE_DIR));
        let cache_dir = PathBuf::from(get(CACHE_DIR_ENV).unwrap_or(DEFAULT_CACHE_DIR));
        let build_dir = PathBuf::from(get(BUILD_DIR_ENV).unwrap_or(DEFAULT_BUILD_DIR));
        let builder_home = get(BUILDER_HOME_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| build_dir.clone());
        let target_root = PathBuf::from(get(TARGET_ROOT_ENV).unwrap_or(DEFAULT_TARGET_ROOT));

        let dockerfile_name = get(DOCKERFILE_NAME_ENV)
            .or_else(|| get(LEGACY_DOCKERFILE_NAME_ENV))
            .unwrap_or(DEFAULT_DOCKERFILE_NAME)
            .to_string();
        let metadata_file_name = get(METADATA_FILE_NAME_ENV).map(str::to_string);

        let ignore_paths = IgnorePathSet::parse_list(get(IGNORE_PATHS_ENV).unwrap_or_default());
        let extract_layers = parse_bool(EXTRACT_LAYERS_ENV, get(EXTRACT_LAYERS_ENV), false)?;
        let files_to_search = split_list(get(FILES_TO_SEARCH_ENV).unwrap_or_default());

        // An explicitly empty prefix disables forwarding
        let build_arg_prefix = vars
            .get(BUILD_ARG_PREFIX_ENV)
            .map(|v| v.trim().to_string())
            .unwrap_or_else(|| DEFAULT_BUILD_ARG_PREFIX.to_string());
        let global_build_args = if build_arg_prefix.is_empty() {
            Vec::new()
        } else {
            vars.iter()
                .filter(|(k, _)| k.starts_with(&build_arg_prefix))
                .map(|(k, v)| format!("{}={}", k, v))
                .collect()
        };

        let known_base_digest = get(KNOWN_BASE_DIGEST_ENV)
            .map(|v| Digest::parse(v).map_err(|e| ExtenderError::config(KNOWN_BASE_DIGEST_ENV, e)))
            .transpose()?;

        let existing_files = get(EXISTING_FILES_ENV)
            .map(|v| {
                v.parse::<ExistingFiles>()
                    .map_err(|e| ExtenderError::config(EXISTING_FILES_ENV, e))
            })
            .transpose()?
            .unwrap_or_default();

        let reap_orphans = parse_bool(REAP_ORPHANS_ENV, get(REAP_ORPHANS_ENV), true)?;

        let builder = get(BUILDER_ENV)
            .map(|v| {
                v.parse::<BuilderKind>()
                    .map_err(|e| ExtenderError::config(BUILDER_ENV, e))
            })
            .transpose()?
            .unwrap_or_default();
        let builder_binary = get(BUILDER_BINARY_ENV).map(PathBuf::from);
        let snapshot_mode = get(SNAPSHOT_MODE_ENV)
            .unwrap_or(DEFAULT_SNAPSHOT_MODE)
            .to_string();

        let storage = StorageSettings {
            graph_driver: get(GRAPH_DRIVER_ENV)
                .unwrap_or(DEFAULT_GRAPH_DRIVER)
                .to_string(),
            root: PathBuf::from(get(STORAGE_ROOT_ENV).unwrap_or(DEFAULT_STORAGE_ROOT)),
            run_root: PathBuf::from(get(STORAGE_RUN_ROOT_ENV).unwrap_or(DEFAULT_STORAGE_RUN_ROOT)),
        };

        let logging = LogSettings {
            level: get(LOGGING_LEVEL_ENV).unwrap_or("info").to_string(),
            format: get(LOGGING_FORMAT_ENV)
                .map(|v| {
                    v.parse::<LogFormat>()
                        .map_err(|e| ExtenderError::config(LOGGING_FORMAT_ENV, e))
                })
                .transpose()?
                .unwrap_or_default(),
            timestamp: parse_bool(LOGGING_TIMESTAMP_ENV, get(LOGGING_TIMESTAMP_ENV), false)?,
        };

        Ok(Self {
            workspace_dir,
            cache_dir,
            build_dir,
            builder_home,
            target_root,
            dockerfile_name,
            metadata_file_name,
            ignore_paths,
            extract_layers,
            files_to_search,
            build_arg_prefix,
            global_build_args,
            known_base_digest,
            existing_files,
            reap_orphans,
            builder,
            builder_binary,
            snapshot_mode,
            storage,
            logging,
        })
    }

    /// `<workspace>/layers/<METADATA_FILE_NAME>` when a manifest is configured
    pub fn metadata_path(&self) -> Option<PathBuf> {
        self.metadata_file_name
            .as_ref()
            .map(|name| self.workspace_dir.join(METADATA_DIR).join(name))
    }
}

fn lookup<'a>(vars: &'a BTreeMap<String, String>, key: &str) -> Option<&'a str> {
    vars.get(key).map(|v| v.trim()).filter(|v| !v.is_empty())
}

fn parse_bool(var: &str, value: Option<&str>, default: bool) -> Result<bool> {
    match value.map(str::to_ascii_lowercase).as_deref() {
        None => Ok(default),
        Some("true" | "1" | "yes") => Ok(true),
        Some("false" | "0" | "no") => Ok(false),
        Some(other) => Err(ExtenderError::config(
            var,
            format!("'{}' is not a boolean", other),
        )),
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<EnvConfig> {
        EnvConfig::from_vars(vars.iter().map(|(k, v)| (k.to_string(), v.to_string())))
    }

    #[test]
    fn test_defaults() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg.workspace_dir, PathBuf::from("/workspace"));
        assert_eq!(cfg.cache_dir, PathBuf::from("/cache"));
        assert_eq!(cfg.build_dir, PathBuf::from("/kaniko"));
        assert_eq!(cfg.builder_home, cfg.build_dir);
        assert_eq!(cfg.target_root, PathBuf::from("/"));
        assert_eq!(cfg.dockerfile_name, "Dockerfile");
        assert!(cfg.metadata_path().is_none());
        assert!(!cfg.extract_layers);
        assert!(cfg.reap_orphans);
        assert_eq!(cfg.existing_files, ExistingFiles::Skip);
        assert_eq!(cfg.builder, BuilderKind::Kaniko);
        assert!(cfg.global_build_args.is_empty());
    }

    #[test]
    fn test_lists_and_flags() {
        let cfg = config(&[
            ("EXTRACT_LAYERS", "TRUE"),
            ("FILES_TO_SEARCH", "curl, hello.txt,"),
            ("IGNORE_PATHS", "/var/run,/proc"),
            ("METADATA_FILE_NAME", "metadata.toml"),
            ("WORKSPACE_DIR", "/ws"),
        ])
        .unwrap();
        assert!(cfg.extract_layers);
        assert_eq!(cfg.files_to_search, vec!["curl", "hello.txt"]);
        assert_eq!(cfg.ignore_paths.entries().len(), 2);
        assert_eq!(
            cfg.metadata_path(),
            Some(PathBuf::from("/ws/layers/metadata.toml"))
        );
    }

    #[test]
    fn test_prefixed_vars_become_sorted_build_args() {
        let cfg = config(&[
            ("CNB_STACK_ID", "io.buildpacks.stacks.bionic"),
            ("PATH", "/usr/bin"),
            ("CNB_APP_DIR", "/workspace"),
        ])
        .unwrap();
        assert_eq!(
            cfg.global_build_args,
            vec![
                "CNB_APP_DIR=/workspace".to_string(),
                "CNB_STACK_ID=io.buildpacks.stacks.bionic".to_string(),
            ]
        );
    }

    #[test]
    fn test_empty_prefix_disables_forwarding() {
        let cfg = config(&[("BUILD_ARG_PREFIX", ""), ("CNB_FOO", "bar")]).unwrap();
        assert!(cfg.global_build_args.is_empty());
    }

    #[test]
    fn test_legacy_dockerfile_variable() {
        let cfg = config(&[("DOCKER_FILE_NAME", "Containerfile")]).unwrap();
        assert_eq!(cfg.dockerfile_name, "Containerfile");
    }

    #[test]
    fn test_invalid_values_are_config_errors() {
        let err = config(&[("EXTRACT_LAYERS", "maybe")]).unwrap_err();
        assert!(matches!(err, ExtenderError::Config { ref var, .. } if var == "EXTRACT_LAYERS"));

        assert!(config(&[("KNOWN_BASE_DIGEST", "sha256:nothex")]).is_err());
        assert!(config(&[("BUILDER", "docker")]).is_err());
        assert!(config(&[("EXISTING_FILES", "merge")]).is_err());
    }
}
