use crate::media::SelectedFile;
use crate::services::{Service, ServiceResult};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FileError {
    #[error("File not found: {path}")]
    NotFound { path: String },
    #[error("Not a regular file: {path}")]
    NotAFile { path: String },
    #[error("Could not pick a free output name for {path}")]
    NoFreeName { path: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Moves payloads between the filesystem and memory.
#[derive(Clone, Default)]
pub struct FileService;

impl FileService {
    pub fn new() -> Self {
        Self
    }

    pub async fn load_file(&self, path: &Path) -> Result<SelectedFile, FileError> {
        let metadata = match tokio::fs::metadata(path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(FileError::NotFound {
                    path: path.display().to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };
        if !metadata.is_file() {
            return Err(FileError::NotAFile {
                path: path.display().to_string(),
            });
        }

        let data = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        tracing::debug!("Loaded {} ({})", name, size_human_readable(data.len() as u64));
        Ok(SelectedFile::new(name, data))
    }

    pub async fn load_files(&self, paths: &[PathBuf]) -> Result<Vec<SelectedFile>, FileError> {
        let mut files = Vec::with_capacity(paths.len());
        for path in paths {
            files.push(self.load_file(path).await?);
        }
        Ok(files)
    }

    /// `<stem><suffix>.<extension>`, safe to use as a single path component.
    pub fn output_file_name(&self, stem: &str, suffix: &str, extension: &str) -> String {
        sanitize_filename(&format!("{}{}.{}", stem, suffix, extension))
    }

    /// First of `name`, `stem_1.ext`, `stem_2.ext`, ... that does not exist yet.
    pub async fn ensure_unique_output_path(&self, path: PathBuf) -> Result<PathBuf, FileError> {
        if !tokio::fs::try_exists(&path).await? {
            return Ok(path);
        }

        let parent = path.parent().unwrap_or(Path::new(".")).to_path_buf();
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("output");
        let extension = path.extension().and_then(|s| s.to_str()).unwrap_or("");

        for counter in 1..=1000 {
            let new_name = if extension.is_empty() {
                format!("{}_{}", stem, counter)
            } else {
                format!("{}_{}.{}", stem, counter, extension)
            };
            let new_path = parent.join(new_name);
            if !tokio::fs::try_exists(&new_path).await? {
                return Ok(new_path);
            }
        }

        Err(FileError::NoFreeName {
            path: path.display().to_string(),
        })
    }

    /// Write `data` as `file_name` inside `dir`, never overwriting.
    pub async fn write_output(&self, dir: &Path, file_name: &str, data: &[u8]) -> Result<PathBuf, FileError> {
        tokio::fs::create_dir_all(dir).await?;
        let path = self
            .ensure_unique_output_path(dir.join(sanitize_filename(file_name)))
            .await?;
        tokio::fs::write(&path, data).await?;
        tracing::info!("Wrote {} ({})", path.display(), size_human_readable(data.len() as u64));
        Ok(path)
    }
}

#[async_trait::async_trait]
impl Service for FileService {
    async fn initialize(&self) -> ServiceResult {
        tracing::info!("File service initialized");
        Ok(())
    }

    async fn shutdown(&self) -> ServiceResult {
        tracing::info!("File service shutdown");
        Ok(())
    }
}

pub fn sanitize_filename(filename: &str) -> String {
    let mut sanitized: String = filename
        .chars()
        .map(|c| match c {
            '/' | '\\' | '<' | '>' | ':' | '"' | '|' | '?' | '*' | '\0' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    sanitized = sanitized.trim().trim_matches('.').to_string();
    if sanitized.is_empty() {
        sanitized = "unnamed".to_string();
    }

    if sanitized.len() > 255 {
        let mut cut = 255;
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized.truncate(cut);
    }
    sanitized
}

pub fn size_human_readable(size: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];

    let mut size = size as f64;
    let mut unit_index = 0;
    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", size as u64, UNITS[unit_index])
    } else {
        format!("{:.1} {}", size, UNITS[unit_index])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_file_name() {
        let service = FileService::new();
        assert_eq!(service.output_file_name("photo", "_resized", "jpg"), "photo_resized.jpg");
        assert_eq!(
            service.output_file_name("../evil", "_converted", "png"),
            "_evil_converted.png"
        );
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("a/b\\c:d.png"), "a_b_c_d.png");
        assert_eq!(sanitize_filename("  ..  "), "unnamed");
        assert_eq!(sanitize_filename(&"é".repeat(200)).len(), 254);
    }

    #[test]
    fn test_size_human_readable() {
        assert_eq!(size_human_readable(512), "512 B");
        assert_eq!(size_human_readable(1536), "1.5 KB");
        assert_eq!(size_human_readable(5 * 1024 * 1024), "5.0 MB");
    }

    #[tokio::test]
    async fn test_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.MP4");
        tokio::fs::write(&path, b"payload").await.unwrap();

        let service = FileService::new();
        let file = service.load_file(&path).await.unwrap();
        assert_eq!(file.name, "clip.MP4");
        assert_eq!(&file.data[..], b"payload");

        assert!(matches!(
            service.load_file(&dir.path().join("missing.mp4")).await,
            Err(FileError::NotFound { .. })
        ));
        assert!(matches!(
            service.load_file(dir.path()).await,
            Err(FileError::NotAFile { .. })
        ));
    }

    #[tokio::test]
    async fn test_write_output_never_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let service = FileService::new();

        let first = service.write_output(&out, "a_resized.png", b"one").await.unwrap();
        let second = service.write_output(&out, "a_resized.png", b"two").await.unwrap();

        assert_eq!(first, out.join("a_resized.png"));
        assert_eq!(second, out.join("a_resized_1.png"));
        assert_eq!(tokio::fs::read(&first).await.unwrap(), b"one");
        assert_eq!(tokio::fs::read(&second).await.unwrap(), b"two");
    }
}
