use crate::geometry::{Dimensions, Resolution};
use crate::media::{MediaKind, SelectedFile};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

pub mod engine;
pub mod progress;
pub mod raster;
pub mod video;

pub use engine::{Engine, EngineError};
pub use raster::ImageConverter;
pub use progress::ProgressParser;
pub use video::VideoConverter;

/// One human-readable progress line. The percentage is best effort.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConversionProgress {
    pub message: String,
    pub percent: Option<f32>,
}

impl ConversionProgress {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            percent: None,
        }
    }

    pub fn with_percent(message: impl Into<String>, percent: f32) -> Self {
        Self {
            message: message.into(),
            percent: Some(percent),
        }
    }
}

pub type ProgressSender = mpsc::UnboundedSender<ConversionProgress>;
pub type ProgressReceiver = mpsc::UnboundedReceiver<ConversionProgress>;

pub fn create_progress_channel() -> (ProgressSender, ProgressReceiver) {
    mpsc::unbounded_channel()
}

/// Report progress; a closed receiver only means nobody is watching.
pub fn report(sender: &ProgressSender, progress: ConversionProgress) {
    let _ = sender.send(progress);
}

#[derive(Error, Debug)]
pub enum ConversionError {
    #[error("Conversion engine unavailable: {0}")]
    EngineUnavailable(String),
    #[error("Could not decode {file}: {message}")]
    Decode { file: String, message: String },
    #[error("Could not allocate a {width}x{height} drawing surface")]
    Surface { width: u32, height: u32 },
    #[error("Could not encode output as {format}: {message}")]
    Encode { format: String, message: String },
    #[error("Unsupported output format for {kind}: {format}")]
    UnsupportedFormat { kind: MediaKind, format: String },
    #[error("Original dimensions of {file} are unknown")]
    UnknownDimensions { file: String },
}

/// Output formats the pipeline can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Jpeg,
    Png,
    Gif,
    Avif,
    Webp,
    Bmp,
    Jp2,
    Mp4,
}

impl OutputFormat {
    pub const IMAGE_FORMATS: &'static [OutputFormat] = &[
        OutputFormat::Jpeg,
        OutputFormat::Png,
        OutputFormat::Gif,
        OutputFormat::Avif,
        OutputFormat::Webp,
        OutputFormat::Bmp,
        OutputFormat::Jp2,
    ];

    /// Image formats by extension; video output is never chosen by name.
    pub fn from_image_extension(extension: &str) -> Option<Self> {
        let format = match extension.to_lowercase().as_str() {
            "jpg" | "jpeg" => Self::Jpeg,
            "png" => Self::Png,
            "gif" => Self::Gif,
            "avif" => Self::Avif,
            "webp" => Self::Webp,
            "bmp" => Self::Bmp,
            "jp2" => Self::Jp2,
            _ => return None,
        };
        Some(format)
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
            Self::Gif => "gif",
            Self::Avif => "avif",
            Self::Webp => "webp",
            Self::Bmp => "bmp",
            Self::Jp2 => "jp2",
            Self::Mp4 => "mp4",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Gif => "image/gif",
            Self::Avif => "image/avif",
            Self::Webp => "image/webp",
            Self::Bmp => "image/bmp",
            Self::Jp2 => "image/jp2",
            Self::Mp4 => "video/mp4",
        }
    }

    pub fn is_image(&self) -> bool {
        !matches!(self, Self::Mp4)
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_image_extension(s).ok_or_else(|| {
            let known: Vec<&str> = Self::IMAGE_FORMATS.iter().map(|f| f.extension()).collect();
            format!("unknown format '{}', expected one of: {}", s, known.join(", "))
        })
    }
}

/// Everything a converter needs for one item.
#[derive(Debug, Clone)]
pub struct ConversionJob {
    pub id: Uuid,
    pub kind: MediaKind,
    pub source: SelectedFile,
    pub original: Dimensions,
    pub resolution: Resolution,
    pub fps: Option<u32>,
    pub format: OutputFormat,
}

impl ConversionJob {
    /// True when the output would be byte-identical to the input.
    pub fn is_passthrough(&self) -> bool {
        let same_format = self
            .source
            .extension()
            .and_then(|ext| OutputFormat::from_image_extension(&ext))
            .map(|source| source == self.format)
            .unwrap_or(false);
        match self.kind {
            MediaKind::Image => self.resolution.is_unchanged() && same_format,
            MediaKind::Video => self.resolution.is_unchanged() && self.fps.is_none(),
        }
    }
}

/// Turns a source payload into an output payload.
///
/// `Ok(None)` is a definitive engine failure that has already been logged;
/// the caller turns it into a user-facing error.
#[async_trait]
pub trait Converter: Send + Sync {
    async fn convert(
        &self,
        job: &ConversionJob,
        progress: ProgressSender,
    ) -> Result<Option<Bytes>, ConversionError>;
}
