// Centralized defaults for layer-extender to avoid magic strings

/// Default workspace holding the build context and the `layers/` metadata directory
pub const DEFAULT_WORKSPACE_DIR: &str = "/workspace";

/// Default durable cache directory
pub const DEFAULT_CACHE_DIR: &str = "/cache";

/// Default directory receiving layer archives and the image config
pub const DEFAULT_BUILD_DIR: &str = "/kaniko";

/// Default filesystem root the new layers are unpacked onto
pub const DEFAULT_TARGET_ROOT: &str = "/";

pub const DEFAULT_DOCKERFILE_NAME: &str = "Dockerfile";

/// Sub-directory of the workspace holding the build manifest
pub const METADATA_DIR: &str = "layers";

/// Environment variables carrying this prefix are forwarded as build args
pub const DEFAULT_BUILD_ARG_PREFIX: &str = "CNB_";

pub const DEFAULT_SNAPSHOT_MODE: &str = "full";

pub const DEFAULT_GRAPH_DRIVER: &str = "vfs";
pub const DEFAULT_STORAGE_ROOT: &str = "/var/lib/containers/storage";
pub const DEFAULT_STORAGE_RUN_ROOT: &str = "/var/run/containers/storage";

pub const DEFAULT_KANIKO_EXECUTOR: &str = "/kaniko/executor";
pub const DEFAULT_BUILDAH_BINARY: &str = "buildah";

/// Mode used for directories created while unpacking layers
pub const EXTRACTED_DIR_MODE: u32 = 0o755;

/// Mode used for the persisted raw manifest
pub const MANIFEST_FILE_MODE: u32 = 0o644;

/// Image config written next to the layer archives
pub const CONFIG_FILE_NAME: &str = "config.json";

/// Raw image manifest written into the cache directory
pub const MANIFEST_FILE_NAME: &str = "manifest.json";

/// Extension of persisted layer archives
pub const LAYER_ARCHIVE_EXT: &str = "tgz";

/// Prefix of OCI whiteout entries inside a layer
pub const WHITEOUT_PREFIX: &str = ".wh.";

/// Repository used to tag images produced by a run
pub const IMAGE_REPOSITORY: &str = "extender-build";
