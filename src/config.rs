use crate::constants::{
    APP_NAME, DEFAULT_FFMPEG_BINARY, DEFAULT_FFPROBE_BINARY, DEFAULT_JPEG_QUALITY,
    DEFAULT_VIDEO_CRF, DEFAULT_VIDEO_PRESET,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub output_dir: Option<PathBuf>,
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    pub video_crf: u8,
    pub video_preset: String,
    pub jpeg_quality: u8,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            output_dir: None,
            ffmpeg_path: DEFAULT_FFMPEG_BINARY.to_string(),
            ffprobe_path: DEFAULT_FFPROBE_BINARY.to_string(),
            video_crf: DEFAULT_VIDEO_CRF,
            video_preset: DEFAULT_VIDEO_PRESET.to_string(),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

impl AppConfig {
    /// `<config_dir>/mediaconv/config.json`, if the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_NAME).join("config.json"))
    }

    /// Directory outputs are written to when none is given on the command line.
    pub fn output_dir_or_current(&self) -> PathBuf {
        self.output_dir.clone().unwrap_or_else(|| PathBuf::from("."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_falls_back_to_defaults() {
        let config: AppConfig = serde_json::from_str(r#"{"video_crf": 30}"#).unwrap();
        assert_eq!(config.video_crf, 30);
        assert_eq!(config.ffmpeg_path, "ffmpeg");
        assert_eq!(config.jpeg_quality, DEFAULT_JPEG_QUALITY);
        assert_eq!(config.output_dir_or_current(), PathBuf::from("."));
    }
}
