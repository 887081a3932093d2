use crate::oci::digest::Digest;
use crate::oci::image::{ImageHandle, LayerRef};
use crate::oci::manifest::{OCIIndex, OCIManifest};
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Read access to an OCI image layout directory (`index.json`, `blobs/<alg>/<hex>`)
pub struct OciLayout {
    root: PathBuf,
}

impl OciLayout {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn blob_path(&self, digest: &Digest) -> PathBuf {
        self.root
            .join("blobs")
            .join(digest.algorithm())
            .join(digest.hex())
    }

    pub fn read_index(&self) -> Result<OCIIndex> {
        let index_path = self.root.join("index.json");
        let content = fs::read_to_string(&index_path)
            .with_context(|| format!("reading OCI index '{}'", index_path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("parsing OCI index '{}'", index_path.display()))
    }

    /// Loads the first image manifest of the layout into an [`ImageHandle`].
    ///
    /// The image id is the config digest, the image digest is the manifest digest.
    pub fn read_image(&self) -> Result<ImageHandle> {
        let index = self.read_index()?;
        let descriptor = index
            .image_manifest()
            .with_context(|| format!("no image manifest in '{}'", self.root.display()))?;

        let raw_manifest = fs::read(self.blob_path(&descriptor.digest))
            .with_context(|| format!("reading manifest blob {}", descriptor.digest))?;
        let manifest: OCIManifest = serde_json::from_slice(&raw_manifest)
            .with_context(|| format!("parsing manifest blob {}", descriptor.digest))?;

        let config = fs::read(self.blob_path(&manifest.config.digest))
            .with_context(|| format!("reading config blob {}", manifest.config.digest))?;

        let layers = manifest
            .layers
            .iter()
            .map(|l| LayerRef::from_file(l.digest.clone(), self.blob_path(&l.digest)))
            .collect();

        Ok(ImageHandle {
            id: manifest.config.digest.hex().to_string(),
            digest: descriptor.digest.clone(),
            layers,
            raw_manifest,
            config,
        })
    }

    /// Layer digests of the first image manifest, without opening any layer
    pub fn layer_digests(&self) -> Result<Vec<Digest>> {
        Ok(self.read_image()?.layers.into_iter().map(|l| l.digest).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oci::manifest::{OCIDescriptor, MEDIA_TYPE_OCI_MANIFEST};
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn write_blob(root: &Path, data: &[u8]) -> Digest {
        let digest = Digest::sha256_of(data);
        let dir = root.join("blobs").join("sha256");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(digest.hex()), data).unwrap();
        digest
    }

    fn descriptor(media_type: &str, digest: Digest, size: usize) -> OCIDescriptor {
        OCIDescriptor {
            media_type: media_type.to_string(),
            digest,
            size: size as u64,
            annotations: BTreeMap::new(),
        }
    }

    #[test]
    fn test_read_image_from_layout() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();

        let layer_a = write_blob(root, b"layer-a");
        let layer_b = write_blob(root, b"layer-b");
        let config = br#"{"architecture":"amd64","os":"linux"}"#;
        let config_digest = write_blob(root, config);

        let manifest = OCIManifest {
            schema_version: 2,
            media_type: Some(MEDIA_TYPE_OCI_MANIFEST.to_string()),
            config: descriptor(
                "application/vnd.oci.image.config.v1+json",
                config_digest.clone(),
                config.len(),
            ),
            layers: vec![
                descriptor("application/vnd.oci.image.layer.v1.tar+gzip", layer_a.clone(), 7),
                descriptor("application/vnd.oci.image.layer.v1.tar+gzip", layer_b.clone(), 7),
            ],
        };
        let manifest_json = serde_json::to_vec(&manifest).unwrap();
        let manifest_digest = write_blob(root, &manifest_json);

        let index = OCIIndex {
            schema_version: 2,
            manifests: vec![descriptor(
                MEDIA_TYPE_OCI_MANIFEST,
                manifest_digest.clone(),
                manifest_json.len(),
            )],
        };
        fs::write(root.join("index.json"), serde_json::to_vec(&index).unwrap()).unwrap();

        let layout = OciLayout::new(root);
        let image = layout.read_image().unwrap();
        assert_eq!(image.digest, manifest_digest);
        assert_eq!(image.id, config_digest.hex());
        assert_eq!(image.config, config.to_vec());
        assert_eq!(
            image.layer_digests().cloned().collect::<Vec<_>>(),
            vec![layer_a, layer_b]
        );
    }

    #[test]
    fn test_missing_index_is_an_error() {
        let dir = TempDir::new().unwrap();
        let err = OciLayout::new(dir.path()).read_image().unwrap_err();
        assert!(err.to_string().contains("reading OCI index"));
    }
}
