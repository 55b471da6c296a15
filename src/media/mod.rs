use crate::constants::{IMAGE_EXTENSIONS, MAX_IMAGE_FILES, MAX_VIDEO_FILES, VIDEO_EXTENSIONS};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// The two upload domains. Each has its own allow-list and selection ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    pub fn allowed_extensions(&self) -> &'static [&'static str] {
        match self {
            Self::Image => IMAGE_EXTENSIONS,
            Self::Video => VIDEO_EXTENSIONS,
        }
    }

    pub fn max_files(&self) -> usize {
        match self {
            Self::Image => MAX_IMAGE_FILES,
            Self::Video => MAX_VIDEO_FILES,
        }
    }

    /// Video encoders want both sides divisible by two.
    pub fn requires_even_dimensions(&self) -> bool {
        matches!(self, Self::Video)
    }

    pub fn accepts_extension(&self, extension: &str) -> bool {
        let lower = extension.to_lowercase();
        self.allowed_extensions().contains(&lower.as_str())
    }

    /// MIME prefix of content sniffed for this kind.
    pub fn mime_prefix(&self) -> &'static str {
        match self {
            Self::Image => "image/",
            Self::Video => "video/",
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Image => write!(f, "image"),
            Self::Video => write!(f, "video"),
        }
    }
}

/// A file picked by the user, held in memory for the whole run.
#[derive(Debug, Clone)]
pub struct SelectedFile {
    pub name: String,
    pub data: Bytes,
    pub mime: Option<String>,
}

impl SelectedFile {
    pub fn new(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        let data = data.into();
        let mime = infer::get(&data).map(|kind| kind.mime_type().to_string());
        Self {
            name: name.into(),
            data,
            mime,
        }
    }

    /// Lowercased extension of the file name, if any.
    pub fn extension(&self) -> Option<String> {
        Path::new(&self.name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_lowercase())
    }

    pub fn stem(&self) -> String {
        Path::new(&self.name)
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .filter(|stem| !stem.is_empty())
            .unwrap_or_else(|| "output".to_string())
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_allow_lists() {
        assert!(MediaKind::Image.accepts_extension("JPG"));
        assert!(MediaKind::Image.accepts_extension("avif"));
        assert!(!MediaKind::Image.accepts_extension("mp4"));
        assert!(MediaKind::Video.accepts_extension("mov"));
        assert!(!MediaKind::Video.accepts_extension("mkv"));
    }

    #[test]
    fn test_selected_file_naming() {
        let file = SelectedFile::new("Holiday.Photo.PNG", vec![1u8, 2, 3]);
        assert_eq!(file.extension().as_deref(), Some("png"));
        assert_eq!(file.stem(), "Holiday.Photo");
        assert_eq!(file.mime, None);

        let bare = SelectedFile::new(".png", Vec::<u8>::new());
        assert_eq!(bare.stem(), ".png");
    }

    #[test]
    fn test_selected_file_sniffs_png() {
        let png = vec![0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];
        let file = SelectedFile::new("x.png", png);
        assert_eq!(file.mime.as_deref(), Some("image/png"));
    }
}
