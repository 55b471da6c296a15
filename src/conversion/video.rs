use super::engine::{Engine, EngineError};
use super::{report, ConversionError, ConversionJob, ConversionProgress, Converter, ProgressSender};
use crate::constants::{
    DEFAULT_VIDEO_CRF, DEFAULT_VIDEO_PRESET, VIDEO_AUDIO_CODEC, VIDEO_CODEC,
    VIDEO_OUTPUT_EXTENSION, VIDEO_PIXEL_FORMAT,
};
use crate::geometry::Resolution;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

/// Re-encodes videos to H.264/MP4 through the shared engine.
#[derive(Debug, Clone)]
pub struct VideoConverter {
    engine: Arc<Engine>,
    crf: u8,
    preset: String,
}

impl VideoConverter {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            crf: DEFAULT_VIDEO_CRF,
            preset: DEFAULT_VIDEO_PRESET.to_string(),
        }
    }

    pub fn with_quality(mut self, crf: u8, preset: impl Into<String>) -> Self {
        self.crf = crf;
        self.preset = preset.into();
        self
    }

    pub fn build_args(&self, job: &ConversionJob, input_name: &str, output_name: &str) -> Vec<String> {
        let mut args = vec!["-i".to_string(), input_name.to_string()];

        let mut filters = Vec::new();
        match job.resolution {
            Resolution::Unchanged if job.original.is_known() && job.original.has_odd_side() => {
                // libx264 with 4:2:0 chroma rejects odd frame sizes.
                filters.push(format!(
                    "scale={}:{}",
                    job.original.width + job.original.width % 2,
                    job.original.height + job.original.height % 2
                ));
            }
            Resolution::Unchanged => {}
            Resolution::Resize(target) => {
                filters.push(format!("scale={}:{}", target.width, target.height));
            }
            Resolution::EngineScaled { width, height } => {
                filters.push(format!(
                    "scale={}:{}",
                    width.map_or_else(|| "-2".to_string(), |w| w.to_string()),
                    height.map_or_else(|| "-2".to_string(), |h| h.to_string()),
                ));
            }
        }
        if let Some(fps) = job.fps {
            filters.push(format!("fps={}", fps));
        }
        if !filters.is_empty() {
            args.push("-vf".to_string());
            args.push(filters.join(","));
        }

        if job.original.is_known() && job.original.has_odd_side() {
            args.push("-pix_fmt".to_string());
            args.push(VIDEO_PIXEL_FORMAT.to_string());
        }

        let crf = self.crf.to_string();
        args.extend(
            [
                "-c:v",
                VIDEO_CODEC,
                "-preset",
                self.preset.as_str(),
                "-crf",
                crf.as_str(),
                "-c:a",
                VIDEO_AUDIO_CODEC,
                "-movflags",
                "+faststart",
                output_name,
            ]
            .iter()
            .map(|s| s.to_string()),
        );
        args
    }

    async fn transform(
        &self,
        job: &ConversionJob,
        input_name: &str,
        output_name: &str,
        progress: &ProgressSender,
    ) -> Result<Bytes, EngineError> {
        report(progress, ConversionProgress::message("Writing input to engine"));
        self.engine.write_file(input_name, &job.source.data).await?;

        let args = self.build_args(job, input_name, output_name);
        report(progress, ConversionProgress::message("Transcoding"));
        self.engine.exec(&args, progress).await?;

        report(progress, ConversionProgress::message("Reading output from engine"));
        self.engine.read_file(output_name).await
    }

    async fn cleanup(&self, names: &[&str]) {
        for name in names {
            if let Err(e) = self.engine.delete_file(name).await {
                tracing::warn!("Failed to remove engine file {}: {}", name, e);
            }
        }
    }
}

#[async_trait]
impl Converter for VideoConverter {
    async fn convert(
        &self,
        job: &ConversionJob,
        progress: ProgressSender,
    ) -> Result<Option<Bytes>, ConversionError> {
        if job.is_passthrough() {
            report(
                &progress,
                ConversionProgress::with_percent("Dimensions unchanged, keeping original", 100.0),
            );
            return Ok(Some(job.source.data.clone()));
        }

        report(&progress, ConversionProgress::message("Loading engine"));
        self.engine
            .ensure_initialized()
            .await
            .map_err(|e| ConversionError::EngineUnavailable(e.to_string()))?;

        let input_ext = job.source.extension().unwrap_or_else(|| "mp4".to_string());
        let input_name = format!("{}-input.{}", job.id, input_ext);
        let output_name = format!("{}-output.{}", job.id, VIDEO_OUTPUT_EXTENSION);

        let result = self.transform(job, &input_name, &output_name, &progress).await;
        self.cleanup(&[&input_name, &output_name]).await;

        match result {
            Ok(data) => {
                report(&progress, ConversionProgress::with_percent("Done", 100.0));
                Ok(Some(data))
            }
            Err(e) => {
                tracing::error!("Video conversion of {} failed: {}", job.source.name, e);
                report(&progress, ConversionProgress::message(format!("Engine error: {}", e)));
                Ok(None)
            }
        }
    }
}
