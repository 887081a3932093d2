use crate::oci::digest::Digest;
use std::fs::File;
use std::io::{self, BufReader, Cursor, Read};
use std::path::PathBuf;
use std::sync::Arc;

/// Where the compressed bytes of a layer live
#[derive(Debug, Clone)]
pub enum LayerBlob {
    /// Blob file inside an image layout or store
    File(PathBuf),
    /// Blob held in memory
    Bytes(Arc<[u8]>),
}

/// One compressed filesystem layer of a built image
#[derive(Debug, Clone)]
pub struct LayerRef {
    pub digest: Digest,
    pub blob: LayerBlob,
}

impl LayerRef {
    pub fn from_file(digest: Digest, path: impl Into<PathBuf>) -> Self {
        Self {
            digest,
            blob: LayerBlob::File(path.into()),
        }
    }

    pub fn from_bytes(digest: Digest, data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            digest,
            blob: LayerBlob::Bytes(data.into()),
        }
    }

    /// Opens the compressed (gzip) byte stream of the layer
    pub fn open_compressed(&self) -> io::Result<Box<dyn Read + '_>> {
        match &self.blob {
            LayerBlob::File(path) => Ok(Box::new(BufReader::new(File::open(path)?))),
            LayerBlob::Bytes(data) => Ok(Box::new(Cursor::new(&data[..]))),
        }
    }
}

/// Result of a successful build
#[derive(Debug, Clone)]
pub struct ImageHandle {
    pub id: String,
    pub digest: Digest,
    /// Bottom-to-top, as returned by the builder
    pub layers: Vec<LayerRef>,
    pub raw_manifest: Vec<u8>,
    pub config: Vec<u8>,
}

impl ImageHandle {
    pub fn layer_digests(&self) -> impl Iterator<Item = &Digest> {
        self.layers.iter().map(|l| &l.digest)
    }
}

/// The image a Dockerfile's final stage is built `FROM`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageImage {
    pub name: String,
    pub layers: Vec<Digest>,
}

impl StageImage {
    pub fn top_layer(&self) -> Option<&Digest> {
        self.layers.last()
    }
}
