use crate::config::EnvConfig;
use crate::constants::{CONFIG_FILE_NAME, LAYER_ARCHIVE_EXT, MANIFEST_FILE_MODE, MANIFEST_FILE_NAME};
use crate::error::{ExtenderError, Result};
use crate::ignore::IgnorePathSet;
use crate::layers::unpack::{ExistingFiles, Unpacker};
use crate::layers::{ExclusionSet, ExtractionReport, TarFileRecord};
use crate::log_layer_saved;
use crate::oci::digest::HashingWriter;
use crate::oci::{ImageHandle, LayerRef};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

/// Persists the layers of a built image and unpacks the new ones
#[derive(Debug, Clone)]
pub struct LayerExtractor {
    build_dir: PathBuf,
    cache_dir: PathBuf,
    ignore: IgnorePathSet,
    existing: ExistingFiles,
    enabled: bool,
}

impl LayerExtractor {
    pub fn new(build_dir: PathBuf, cache_dir: PathBuf) -> Self {
        Self {
            build_dir,
            cache_dir,
            ignore: IgnorePathSet::empty(),
            existing: ExistingFiles::default(),
            enabled: true,
        }
    }

    pub fn from_config(config: &EnvConfig) -> Self {
        Self::new(config.build_dir.clone(), config.cache_dir.clone())
            .with_ignore_paths(config.ignore_paths.clone())
            .with_existing_files(config.existing_files)
            .with_extraction(config.extract_layers)
    }

    pub fn with_ignore_paths(mut self, ignore: IgnorePathSet) -> Self {
        self.ignore = ignore;
        self
    }

    pub fn with_existing_files(mut self, existing: ExistingFiles) -> Self {
        self.existing = existing;
        self
    }

    /// When disabled, layers are persisted but nothing is unpacked
    pub fn with_extraction(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// `<buildDir>/<digest>.tgz`
    pub fn archive_path(&self, layer: &LayerRef) -> PathBuf {
        self.build_dir
            .join(format!("{}.{}", layer.digest, LAYER_ARCHIVE_EXT))
    }

    pub fn extract(
        &self,
        image: &ImageHandle,
        exclusion: &ExclusionSet,
        target_root: &Path,
    ) -> Result<ExtractionReport> {
        let mut report = ExtractionReport::default();

        fs::create_dir_all(&self.build_dir)
            .map_err(|e| ExtenderError::extraction(&self.build_dir, e))?;
        for layer in &image.layers {
            report.records.push(self.persist_layer(layer)?);
        }
        self.persist_image_metadata(image, &mut report)?;

        if !self.enabled {
            tracing::info!(
                layers = report.records.len(),
                "Layer extraction disabled, archives persisted only"
            );
            return Ok(report);
        }

        let unpacker = Unpacker::new(target_root, &self.ignore, self.existing);
        for record in &report.records {
            if exclusion.contains(&record.digest) {
                tracing::info!(digest = %record.digest.short(), "Base layer excluded from extraction");
                report.excluded.push(record.digest.clone());
                continue;
            }

            tracing::info!(
                digest = %record.digest.short(),
                target = %target_root.display(),
                "Unpacking layer"
            );
            let file =
                File::open(&record.path).map_err(|e| ExtenderError::extraction(&record.path, e))?;
            let stats = unpacker.unpack(BufReader::new(file), &record.path)?;
            tracing::debug!(
                digest = %record.digest.short(),
                files = stats.files_written,
                dirs = stats.dirs_created,
                existing = stats.existing_skipped,
                skipped = stats.entries_skipped,
                "Layer unpacked"
            );
            report.stats.merge(&stats);
            report.unpacked.push(record.digest.clone());
        }

        Ok(report)
    }

    /// Write the compressed stream of `layer` to its archive path, verifying sha256 digests
    pub fn persist_layer(&self, layer: &LayerRef) -> Result<TarFileRecord> {
        let path = self.archive_path(layer);
        let io_err = |e: io::Error| ExtenderError::extraction(&path, e);

        let mut source = layer.open_compressed().map_err(io_err)?;
        let file = File::create(&path).map_err(io_err)?;
        let mut writer = HashingWriter::new(BufWriter::new(file));
        io::copy(&mut source, &mut writer).map_err(io_err)?;
        let (mut inner, actual, size) = writer.finish();
        inner.flush().map_err(io_err)?;

        if layer.digest.algorithm() == "sha256" && actual != layer.digest {
            // Leave no archive behind under a name its bytes do not match
            let _ = fs::remove_file(&path);
            return Err(ExtenderError::LayerIntegrity {
                expected: layer.digest.to_string(),
                actual: actual.to_string(),
            });
        }

        log_layer_saved!(layer.digest, path, size);
        Ok(TarFileRecord {
            digest: layer.digest.clone(),
            path,
            size,
        })
    }

    fn persist_image_metadata(
        &self,
        image: &ImageHandle,
        report: &mut ExtractionReport,
    ) -> Result<()> {
        if !image.config.is_empty() {
            let path = self.build_dir.join(CONFIG_FILE_NAME);
            fs::write(&path, &image.config).map_err(|e| ExtenderError::extraction(&path, e))?;
            report.config_path = Some(path);
        }

        if !image.raw_manifest.is_empty() {
            fs::create_dir_all(&self.cache_dir)
                .map_err(|e| ExtenderError::extraction(&self.cache_dir, e))?;
            let path = self.cache_dir.join(MANIFEST_FILE_NAME);
            OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(MANIFEST_FILE_MODE)
                .open(&path)
                .and_then(|mut f| f.write_all(&image.raw_manifest))
                .map_err(|e| ExtenderError::extraction(&path, e))?;
            report.manifest_path = Some(path);
        }
        Ok(())
    }
}
