//! The external FFmpeg engine.
//!
//! One `Engine` value is shared by every converter in the process. It is
//! initialised lazily on first use, owns a private working directory for the
//! synthetic input/output files of each job, and runs one job at a time.

use super::progress::{parse_duration, ProgressParser};
use super::{report, ProgressSender};
use crate::constants::ENGINE_STDERR_TAIL_LINES;
use bytes::Bytes;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;
use tempfile::TempDir;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{watch, Mutex, OnceCell};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("FFmpeg not found or not accessible: {0}")]
    NotFound(String),
    #[error("Invalid working file name: {0}")]
    InvalidName(String),
    #[error("Working file not found: {0}")]
    MissingFile(String),
    #[error("FFmpeg exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug)]
struct EngineRuntime {
    version: String,
    workdir: TempDir,
}

#[derive(Debug)]
pub struct Engine {
    program: String,
    base_args: Vec<String>,
    runtime: OnceCell<EngineRuntime>,
    exec_lock: Mutex<()>,
}

impl Engine {
    pub fn new(program: impl Into<String>) -> Self {
        Self::with_base_args(program, Vec::new())
    }

    /// Run the engine through a wrapper, e.g. `nice -n 10 ffmpeg`.
    pub fn with_base_args(program: impl Into<String>, base_args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            base_args,
            runtime: OnceCell::new(),
            exec_lock: Mutex::new(()),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.runtime.initialized()
    }

    /// Idempotent; the first successful call is memoised for the process.
    pub async fn ensure_initialized(&self) -> Result<(), EngineError> {
        self.runtime().await.map(|_| ())
    }

    pub async fn version(&self) -> Result<String, EngineError> {
        Ok(self.runtime().await?.version.clone())
    }

    async fn runtime(&self) -> Result<&EngineRuntime, EngineError> {
        self.runtime
            .get_or_try_init(|| async {
                let version = self.probe_version().await?;
                let workdir = tempfile::Builder::new()
                    .prefix("mediaconv-engine-")
                    .tempdir()?;
                tracing::info!(
                    "FFmpeg engine initialized (version {}, workdir {:?})",
                    version,
                    workdir.path()
                );
                Ok::<_, EngineError>(EngineRuntime { version, workdir })
            })
            .await
    }

    async fn probe_version(&self) -> Result<String, EngineError> {
        let output = Command::new(&self.program)
            .args(&self.base_args)
            .arg("-version")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| EngineError::NotFound(format!("{}: {}", self.program, e)))?;

        if !output.status.success() {
            return Err(EngineError::NotFound(format!(
                "{} -version exited with {}",
                self.program, output.status
            )));
        }

        // First line looks like "ffmpeg version 6.1.1-3ubuntu5 Copyright ..."
        let stdout = String::from_utf8_lossy(&output.stdout);
        let version = stdout
            .lines()
            .next()
            .and_then(|line| line.split_whitespace().nth(2))
            .unwrap_or("unknown")
            .to_string();
        Ok(version)
    }

    async fn path_for(&self, name: &str) -> Result<PathBuf, EngineError> {
        validate_name(name)?;
        Ok(self.runtime().await?.workdir.path().join(name))
    }

    pub async fn write_file(&self, name: &str, data: &[u8]) -> Result<(), EngineError> {
        let path = self.path_for(name).await?;
        tokio::fs::write(&path, data).await?;
        Ok(())
    }

    pub async fn read_file(&self, name: &str) -> Result<Bytes, EngineError> {
        let path = self.path_for(name).await?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(EngineError::MissingFile(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Returns whether a file was actually removed.
    pub async fn delete_file(&self, name: &str) -> Result<bool, EngineError> {
        let path = self.path_for(name).await?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn file_exists(&self, name: &str) -> Result<bool, EngineError> {
        let path = self.path_for(name).await?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    /// Run one transform inside the working directory.
    ///
    /// Progress blocks from stdout are forwarded as they arrive; the tail of
    /// stderr is kept for the error message.
    pub async fn exec(&self, args: &[String], progress: &ProgressSender) -> Result<(), EngineError> {
        let workdir = self.runtime().await?.workdir.path().to_path_buf();
        let _guard = self.exec_lock.lock().await;

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.base_args)
            .arg("-nostdin")
            .arg("-y")
            .arg("-hide_banner")
            .arg("-loglevel")
            .arg("info")
            .arg("-progress")
            .arg("pipe:1")
            .arg("-nostats")
            .args(args)
            .current_dir(&workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::debug!("Running {} {}", self.program, args.join(" "));

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                EngineError::NotFound(self.program.clone())
            } else {
                EngineError::Io(e)
            }
        })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (duration_tx, duration_rx) = watch::channel(None::<f64>);

        let stderr_task = async move {
            let mut tail = VecDeque::with_capacity(ENGINE_STDERR_TAIL_LINES);
            if let Some(stderr) = stderr {
                let mut segments = BufReader::new(stderr).split(b'\n');
                while let Ok(Some(segment)) = segments.next_segment().await {
                    let line = lossy_line(&segment);
                    if let Some(duration) = parse_duration(&line) {
                        let _ = duration_tx.send(Some(duration));
                    }
                    tracing::trace!("ffmpeg: {}", line);
                    if tail.len() == ENGINE_STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
            }
            tail
        };

        let stdout_task = async {
            let mut parser = ProgressParser::new(None);
            if let Some(stdout) = stdout {
                let mut segments = BufReader::new(stdout).split(b'\n');
                while let Ok(Some(segment)) = segments.next_segment().await {
                    let line = lossy_line(&segment);
                    parser.set_duration(*duration_rx.borrow());
                    if let Some(update) = parser.feed(&line) {
                        report(progress, update);
                    }
                }
            }
        };

        let (tail, ()) = tokio::join!(stderr_task, stdout_task);
        let status = child.wait().await?;

        if status.success() {
            Ok(())
        } else {
            Err(EngineError::Failed {
                status: status.to_string(),
                stderr: tail.into_iter().collect::<Vec<_>>().join("\n"),
            })
        }
    }
}

/// Engine output is not guaranteed to be UTF-8 (metadata echoes file tags).
fn lossy_line(segment: &[u8]) -> String {
    let segment = segment.strip_suffix(b"\r").unwrap_or(segment);
    String::from_utf8_lossy(segment).into_owned()
}

fn validate_name(name: &str) -> Result<(), EngineError> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if valid {
        Ok(())
    } else {
        Err(EngineError::InvalidName(name.to_string()))
    }
}
