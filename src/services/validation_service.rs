use crate::media::{MediaKind, SelectedFile};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why one file was left out of a selection. Never blocks the accepted rest.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SelectionRejection {
    #[error("{file_name}: unsupported file type (allowed: {allowed})")]
    UnsupportedExtension { file_name: String, allowed: String },
    #[error("{file_name}: content looks like {detected}, not {kind}")]
    ContentMismatch {
        file_name: String,
        detected: String,
        kind: MediaKind,
    },
    #[error("{file_name}: file is empty")]
    Empty { file_name: String },
    #[error("{file_name}: at most {max} {kind} files can be selected")]
    TooManyFiles {
        file_name: String,
        max: usize,
        kind: MediaKind,
    },
}

impl SelectionRejection {
    pub fn file_name(&self) -> &str {
        match self {
            Self::UnsupportedExtension { file_name, .. }
            | Self::ContentMismatch { file_name, .. }
            | Self::Empty { file_name }
            | Self::TooManyFiles { file_name, .. } => file_name,
        }
    }
}

/// Errors that block a run before any item starts.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParameterError {
    #[error("Specify at least one of {expected}")]
    NothingRequested { expected: &'static str },
    #[error("{field} must be a positive number, got {value}")]
    NonPositive { field: &'static str, value: i64 },
    #[error("{field} is too large: {value}")]
    OutOfRange { field: &'static str, value: i64 },
    #[error("Specify either width or height for images, not both")]
    BothSidesForImage,
    #[error("Frame rate only applies to videos")]
    FpsForImage,
}

/// Raw, unvalidated form values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterInput {
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub fps: Option<i64>,
}

/// Validated resize request: at least one field, every field positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResizeParameters {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fps: Option<u32>,
}

#[derive(Clone, Default)]
pub struct ValidationService;

impl ValidationService {
    pub fn new() -> Self {
        Self
    }

    /// Split `files` into the accepted subset and one rejection per refused file.
    pub fn screen_selection(
        &self,
        kind: MediaKind,
        files: Vec<SelectedFile>,
    ) -> (Vec<SelectedFile>, Vec<SelectionRejection>) {
        let mut accepted = Vec::new();
        let mut rejections = Vec::new();

        for file in files {
            match self.screen_file(kind, &file) {
                Err(rejection) => rejections.push(rejection),
                Ok(()) if accepted.len() >= kind.max_files() => {
                    rejections.push(SelectionRejection::TooManyFiles {
                        file_name: file.name.clone(),
                        max: kind.max_files(),
                        kind,
                    });
                }
                Ok(()) => accepted.push(file),
            }
        }

        for rejection in &rejections {
            tracing::warn!("Rejected file {}", rejection);
        }
        (accepted, rejections)
    }

    pub fn screen_file(&self, kind: MediaKind, file: &SelectedFile) -> Result<(), SelectionRejection> {
        let extension_ok = file
            .extension()
            .map(|ext| kind.accepts_extension(&ext))
            .unwrap_or(false);
        if !extension_ok {
            return Err(SelectionRejection::UnsupportedExtension {
                file_name: file.name.clone(),
                allowed: kind.allowed_extensions().join(", "),
            });
        }

        if file.data.is_empty() {
            return Err(SelectionRejection::Empty {
                file_name: file.name.clone(),
            });
        }

        // Unrecognised content is trusted on its extension.
        if let Some(mime) = &file.mime {
            if !mime.starts_with(kind.mime_prefix()) {
                return Err(SelectionRejection::ContentMismatch {
                    file_name: file.name.clone(),
                    detected: mime.clone(),
                    kind,
                });
            }
        }
        Ok(())
    }

    pub fn validate_parameters(
        &self,
        kind: MediaKind,
        input: &ParameterInput,
    ) -> Result<ResizeParameters, ParameterError> {
        match kind {
            MediaKind::Image => {
                if input.fps.is_some() {
                    return Err(ParameterError::FpsForImage);
                }
                if input.width.is_none() && input.height.is_none() {
                    return Err(ParameterError::NothingRequested {
                        expected: "width or height",
                    });
                }
            }
            MediaKind::Video => {
                if input.width.is_none() && input.height.is_none() && input.fps.is_none() {
                    return Err(ParameterError::NothingRequested {
                        expected: "width, height or fps",
                    });
                }
            }
        }

        let params = ResizeParameters {
            width: positive("width", input.width)?,
            height: positive("height", input.height)?,
            fps: positive("fps", input.fps)?,
        };

        if kind == MediaKind::Image && params.width.is_some() && params.height.is_some() {
            return Err(ParameterError::BothSidesForImage);
        }
        Ok(params)
    }
}

fn positive(field: &'static str, value: Option<i64>) -> Result<Option<u32>, ParameterError> {
    match value {
        None => Ok(None),
        Some(v) if v <= 0 => Err(ParameterError::NonPositive { field, value: v }),
        Some(v) => u32::try_from(v)
            .map(Some)
            .map_err(|_| ParameterError::OutOfRange { field, value: v }),
    }
}
