use crate::oci::digest::Digest;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const MEDIA_TYPE_OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
pub const MEDIA_TYPE_DOCKER_MANIFEST: &str =
    "application/vnd.docker.distribution.manifest.v2+json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OCIManifest {
    #[serde(rename = "schemaVersion")]
    pub schema_version: u32,
    #[serde(rename = "mediaType", default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    pub config: OCIDescriptor,
    #[serde(default)]
    pub layers: Vec<OCIDescriptor>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OCIDescriptor {
    #[serde(rename = "mediaType")]
    pub media_type: String,
    pub digest: Digest,
    pub size: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OCIIndex {
    #[serde(rename = "schemaVersion")]
    pub schema_version: u32,
    #[serde(default)]
    pub manifests: Vec<OCIDescriptor>,
}

impl OCIIndex {
    /// First descriptor pointing at an image manifest
    pub fn image_manifest(&self) -> Option<&OCIDescriptor> {
        self.manifests.iter().find(|d| {
            d.media_type == MEDIA_TYPE_OCI_MANIFEST || d.media_type == MEDIA_TYPE_DOCKER_MANIFEST
        })
    }
}
