//! Intrinsic size detection for uploaded payloads.
//!
//! A zero dimension is a successful "unknown" answer; only unreadable
//! payloads produce [`ProbeError::Decode`].

use crate::geometry::Dimensions;
use crate::media::{MediaKind, SelectedFile};
use async_trait::async_trait;
use image::{ImageError, ImageReader};
use serde::Deserialize;
use std::io::Cursor;
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;

#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("Could not decode {file}: {message}")]
    Decode { file: String, message: String },
    #[error("Prober unavailable: {0}")]
    Unavailable(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait SizeProber: Send + Sync {
    async fn probe(&self, kind: MediaKind, file: &SelectedFile) -> Result<Dimensions, ProbeError>;
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    width: Option<u32>,
    height: Option<u32>,
}

/// Reads image headers in-process and asks ffprobe about everything else.
#[derive(Debug, Clone)]
pub struct MediaProber {
    program: String,
    base_args: Vec<String>,
}

impl MediaProber {
    pub fn new(ffprobe: impl Into<String>) -> Self {
        Self::with_base_args(ffprobe, Vec::new())
    }

    pub fn with_base_args(ffprobe: impl Into<String>, base_args: Vec<String>) -> Self {
        Self {
            program: ffprobe.into(),
            base_args,
        }
    }

    /// Header-only read; the pixel data is never decoded.
    pub fn image_dimensions(data: &[u8]) -> Result<Dimensions, ImageError> {
        let (width, height) = ImageReader::new(Cursor::new(data))
            .with_guessed_format()
            .map_err(ImageError::IoError)?
            .into_dimensions()?;
        Ok(Dimensions::new(width, height))
    }

    async fn ffprobe_dimensions(&self, file: &SelectedFile) -> Result<Dimensions, ProbeError> {
        let suffix = file
            .extension()
            .map(|ext| format!(".{}", ext))
            .unwrap_or_default();
        let temp = tempfile::Builder::new()
            .prefix("mediaconv-probe-")
            .suffix(&suffix)
            .tempfile()?;
        tokio::fs::write(temp.path(), &file.data).await?;

        let output = Command::new(&self.program)
            .args(&self.base_args)
            .args(["-v", "error", "-select_streams", "v:0"])
            .args(["-show_entries", "stream=width,height", "-of", "json"])
            .arg(temp.path())
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    ProbeError::Unavailable(self.program.clone())
                } else {
                    ProbeError::Io(e)
                }
            })?;

        if !output.status.success() {
            return Err(ProbeError::Decode {
                file: file.name.clone(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let parsed: FfprobeOutput =
            serde_json::from_slice(&output.stdout).map_err(|e| ProbeError::Decode {
                file: file.name.clone(),
                message: format!("unreadable ffprobe output: {}", e),
            })?;

        // Headers not parsed yet show up as missing fields: report zero.
        let dimensions = parsed
            .streams
            .first()
            .map(|s| Dimensions::new(s.width.unwrap_or(0), s.height.unwrap_or(0)))
            .unwrap_or(Dimensions::new(0, 0));
        Ok(dimensions)
    }
}

impl Default for MediaProber {
    fn default() -> Self {
        Self::new(crate::constants::DEFAULT_FFPROBE_BINARY)
    }
}

#[async_trait]
impl SizeProber for MediaProber {
    async fn probe(&self, kind: MediaKind, file: &SelectedFile) -> Result<Dimensions, ProbeError> {
        match kind {
            MediaKind::Image => match Self::image_dimensions(&file.data) {
                Ok(dimensions) => Ok(dimensions),
                Err(ImageError::Unsupported(reason)) => {
                    tracing::debug!("Probing {} with ffprobe: {}", file.name, reason);
                    self.ffprobe_dimensions(file).await
                }
                Err(e) => Err(ProbeError::Decode {
                    file: file.name.clone(),
                    message: e.to_string(),
                }),
            },
            MediaKind::Video => self.ffprobe_dimensions(file).await,
        }
    }
}
