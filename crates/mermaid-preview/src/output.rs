//! Persisting captured images.

use std::path::{Path, PathBuf};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use futures::FutureExt;
use futures::future::BoxFuture;

use crate::config::GenerateSection;
use crate::protocol::ImageType;

#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    #[error("captured image is not valid base64: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Destination for decoded capture results.
pub trait ImageSink: Send + Sync {
    /// Writes `data` (base64) for the document `file_name` located in `current_dir`. Returns
    /// where the image went.
    fn write_image(
        &self,
        data: &str,
        image_type: ImageType,
        file_name: &str,
        current_dir: &str,
    ) -> BoxFuture<'static, Result<PathBuf, OutputError>>;
}

/// Writes `<dir>/<stem>.<ext>`, where `dir` is the configured output directory or the
/// document's own directory.
#[derive(Debug, Clone, Default)]
pub struct FileImageSink {
    output_dir: Option<PathBuf>,
    file: Option<PathBuf>,
}

impl FileImageSink {
    pub fn new(output_dir: Option<PathBuf>) -> Self {
        Self {
            output_dir,
            file: None,
        }
    }

    /// Output directory from the generate settings: the document's directory when
    /// `useCurrentPath` is set, else `outputPath` under `workspace_root`, else `workspace_root`.
    pub fn from_settings(generate: &GenerateSection, workspace_root: &Path) -> Self {
        if generate.use_current_path {
            return Self::new(None);
        }
        let dir = match generate.output_path.as_deref().map(str::trim) {
            Some(path) if !path.is_empty() => workspace_root.join(path),
            _ => workspace_root.to_path_buf(),
        };
        Self::new(Some(dir))
    }

    /// Always writes to `path`, whatever the document or image type.
    pub fn to_file(path: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: None,
            file: Some(path.into()),
        }
    }

    pub fn output_path(&self, file_name: &str, current_dir: &str, image_type: ImageType) -> PathBuf {
        if let Some(file) = &self.file {
            return file.clone();
        }
        let dir = self
            .output_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(current_dir));
        dir.join(format!("{}.{}", file_stem(file_name), image_type.extension()))
    }
}

/// Base name with a trailing `.mmd` removed.
fn file_stem(file_name: &str) -> String {
    let base = Path::new(file_name)
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| file_name.to_string());
    match base.strip_suffix(".mmd") {
        Some(stem) if !stem.is_empty() => stem.to_string(),
        _ => base,
    }
}

impl ImageSink for FileImageSink {
    fn write_image(
        &self,
        data: &str,
        image_type: ImageType,
        file_name: &str,
        current_dir: &str,
    ) -> BoxFuture<'static, Result<PathBuf, OutputError>> {
        let path = self.output_path(file_name, current_dir, image_type);
        let decoded = STANDARD.decode(data);
        async move {
            let bytes = decoded?;
            tokio::fs::write(&path, bytes)
                .await
                .map_err(|source| OutputError::Write {
                    path: path.clone(),
                    source,
                })?;
            tracing::debug!(path = %path.display(), "image written");
            Ok(path)
        }
        .boxed()
    }
}
