// App Constants
pub const APP_NAME: &str = "mediaconv";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

// File handling
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "avif"];
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "webm"];

// Selection limits
pub const MAX_IMAGE_FILES: usize = 5;
pub const MAX_VIDEO_FILES: usize = 3;

// Output naming
pub const RESIZED_SUFFIX: &str = "_resized";
pub const CONVERTED_SUFFIX: &str = "_converted";
pub const DECODED_FILE_STEM: &str = "decoded";

// Video output is always re-encoded into this container/codec pair
pub const VIDEO_OUTPUT_EXTENSION: &str = "mp4";
pub const VIDEO_OUTPUT_MIME: &str = "video/mp4";
pub const VIDEO_CODEC: &str = "libx264";
pub const VIDEO_AUDIO_CODEC: &str = "aac";
pub const VIDEO_PIXEL_FORMAT: &str = "yuv420p";
pub const DEFAULT_VIDEO_CRF: u8 = 23;
pub const DEFAULT_VIDEO_PRESET: &str = "veryfast";

// Image encoding
pub const DEFAULT_JPEG_QUALITY: u8 = 90;
pub const MAX_SURFACE_PIXELS: u64 = 16384 * 16384;

// Engine
pub const DEFAULT_FFMPEG_BINARY: &str = "ffmpeg";
pub const DEFAULT_FFPROBE_BINARY: &str = "ffprobe";
pub const ENGINE_STDERR_TAIL_LINES: usize = 20;
pub const MAX_LOG_LINES: usize = 1000;

// Handles
pub const HANDLE_URL_SCHEME: &str = "blob:mediaconv";
