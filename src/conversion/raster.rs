//! Still-image resizing and format conversion.
//!
//! Decoding, Lanczos3 resampling and encoding happen in-process with the
//! `image` crate. Formats it cannot handle (JPEG 2000 output, AVIF input)
//! are routed through the shared FFmpeg engine when one is configured.

use super::engine::{Engine, EngineError};
use super::{report, ConversionError, ConversionJob, ConversionProgress, Converter, OutputFormat, ProgressSender};
use crate::constants::{DEFAULT_JPEG_QUALITY, MAX_SURFACE_PIXELS};
use crate::geometry::Resolution;
use crate::media::MediaKind;
use async_trait::async_trait;
use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageError, ImageFormat};
use std::io::Cursor;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ImageConverter {
    engine: Option<Arc<Engine>>,
    jpeg_quality: u8,
}

impl Default for ImageConverter {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageConverter {
    pub fn new() -> Self {
        Self {
            engine: None,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }

    pub fn with_engine(mut self, engine: Arc<Engine>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality.clamp(1, 100);
        self
    }

    async fn decode(
        &self,
        job: &ConversionJob,
        progress: &ProgressSender,
    ) -> Result<Option<DynamicImage>, ConversionError> {
        match image::load_from_memory(&job.source.data) {
            Ok(img) => Ok(Some(img)),
            Err(ImageError::Unsupported(reason)) if self.engine.is_some() => {
                tracing::debug!(
                    "{} not decodable in-process ({}), using engine",
                    job.source.name,
                    reason
                );
                let ext = job.source.extension().unwrap_or_else(|| "bin".to_string());
                let Some(png) = self
                    .engine_transcode(job.id, &job.source.data, &ext, "png", progress)
                    .await?
                else {
                    return Ok(None);
                };
                image::load_from_memory_with_format(&png, ImageFormat::Png)
                    .map(Some)
                    .map_err(|e| decode_error(job, e))
            }
            Err(e) => Err(decode_error(job, e)),
        }
    }

    fn resize(&self, job: &ConversionJob, img: DynamicImage) -> Result<DynamicImage, ConversionError> {
        match job.resolution {
            Resolution::Unchanged => Ok(img),
            Resolution::Resize(target) => {
                let pixels = u64::from(target.width) * u64::from(target.height);
                if pixels == 0 || pixels > MAX_SURFACE_PIXELS {
                    return Err(ConversionError::Surface {
                        width: target.width,
                        height: target.height,
                    });
                }
                Ok(img.resize_exact(target.width, target.height, FilterType::Lanczos3))
            }
            Resolution::EngineScaled { .. } => Err(ConversionError::UnknownDimensions {
                file: job.source.name.clone(),
            }),
        }
    }

    fn encode(&self, img: &DynamicImage, format: OutputFormat) -> Result<Vec<u8>, ConversionError> {
        let mut buf = Cursor::new(Vec::new());
        let result = match format {
            OutputFormat::Jpeg => {
                // JPEG has no alpha channel.
                let rgb = img.to_rgb8();
                JpegEncoder::new_with_quality(&mut buf, self.jpeg_quality).encode_image(&rgb)
            }
            OutputFormat::Png => img.write_to(&mut buf, ImageFormat::Png),
            OutputFormat::Gif => DynamicImage::ImageRgba8(img.to_rgba8()).write_to(&mut buf, ImageFormat::Gif),
            OutputFormat::Webp => DynamicImage::ImageRgba8(img.to_rgba8()).write_to(&mut buf, ImageFormat::WebP),
            OutputFormat::Bmp => DynamicImage::ImageRgba8(img.to_rgba8()).write_to(&mut buf, ImageFormat::Bmp),
            OutputFormat::Avif => DynamicImage::ImageRgba8(img.to_rgba8()).write_to(&mut buf, ImageFormat::Avif),
            OutputFormat::Jp2 | OutputFormat::Mp4 => {
                return Err(ConversionError::UnsupportedFormat {
                    kind: MediaKind::Image,
                    format: format.to_string(),
                })
            }
        };
        result.map_err(|e| ConversionError::Encode {
            format: format.to_string(),
            message: e.to_string(),
        })?;
        Ok(buf.into_inner())
    }

    /// Single-frame transcode through the engine. `Ok(None)` on engine failure.
    async fn engine_transcode(
        &self,
        job_id: Uuid,
        input: &[u8],
        input_ext: &str,
        output_ext: &str,
        progress: &ProgressSender,
    ) -> Result<Option<Bytes>, ConversionError> {
        let engine = self.engine.as_ref().ok_or_else(|| {
            ConversionError::EngineUnavailable(format!("no engine configured for .{} images", output_ext))
        })?;
        report(progress, ConversionProgress::message("Loading engine"));
        engine
            .ensure_initialized()
            .await
            .map_err(|e| ConversionError::EngineUnavailable(e.to_string()))?;

        let input_name = format!("{}-source.{}", job_id, input_ext);
        let output_name = format!("{}-target.{}", job_id, output_ext);
        let result = run_single_frame(engine, &input_name, &output_name, input, progress).await;

        for name in [&input_name, &output_name] {
            if let Err(e) = engine.delete_file(name).await {
                tracing::warn!("Failed to remove engine file {}: {}", name, e);
            }
        }

        match result {
            Ok(data) => Ok(Some(data)),
            Err(e) => {
                tracing::error!("Engine image transcode to .{} failed: {}", output_ext, e);
                report(progress, ConversionProgress::message(format!("Engine error: {}", e)));
                Ok(None)
            }
        }
    }
}

async fn run_single_frame(
    engine: &Engine,
    input_name: &str,
    output_name: &str,
    input: &[u8],
    progress: &ProgressSender,
) -> Result<Bytes, EngineError> {
    engine.write_file(input_name, input).await?;
    let args: Vec<String> = ["-i", input_name, "-frames:v", "1", output_name]
        .iter()
        .map(|s| s.to_string())
        .collect();
    engine.exec(&args, progress).await?;
    engine.read_file(output_name).await
}

fn decode_error(job: &ConversionJob, e: ImageError) -> ConversionError {
    ConversionError::Decode {
        file: job.source.name.clone(),
        message: e.to_string(),
    }
}

#[async_trait]
impl Converter for ImageConverter {
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

        report(&progress, ConversionProgress::message(format!("Decoding {}", job.source.name)));
        let Some(img) = self.decode(job, &progress).await? else {
            return Ok(None);
        };

        let img = self.resize(job, img)?;
        if let Resolution::Resize(target) = job.resolution {
            report(
                &progress,
                ConversionProgress::with_percent(format!("Resized to {}", target), 50.0),
            );
        }

        let encoded = match job.format {
            OutputFormat::Jp2 => {
                let png = self.encode(&img, OutputFormat::Png)?;
                match self
                    .engine_transcode(job.id, &png, "png", OutputFormat::Jp2.extension(), &progress)
                    .await?
                {
                    Some(data) => data,
                    None => return Ok(None),
                }
            }
            format => Bytes::from(self.encode(&img, format)?),
        };

        report(
            &progress,
            ConversionProgress::with_percent(format!("Encoded {} bytes as {}", encoded.len(), job.format), 100.0),
        );
        Ok(Some(encoded))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversion::create_progress_channel;
    use crate::geometry::{Dimensions, TargetGeometry};
    use crate::media::SelectedFile;

    fn png_fixture(width: u32, height: u32) -> Vec<u8> {
        let mut img = image::RgbaImage::new(width, height);
        for (x, _, pixel) in img.enumerate_pixels_mut() {
            *pixel = image::Rgba([(x * 5) as u8, 0, 200, 128]);
        }
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(img)
            .write_to(&mut buf, ImageFormat::Png)
            .unwrap();
        buf.into_inner()
    }

    fn job(name: &str, data: Vec<u8>, resolution: Resolution, format: OutputFormat) -> ConversionJob {
        ConversionJob {
            id: Uuid::new_v4(),
            kind: MediaKind::Image,
            source: SelectedFile::new(name, data),
            original: Dimensions::new(40, 20),
            resolution,
            fps: None,
            format,
        }
    }

    #[tokio::test]
    async fn test_resize_png() {
        let converter = ImageConverter::new();
        let (tx, _rx) = create_progress_channel();
        let job = job(
            "wide.png",
            png_fixture(40, 20),
            Resolution::Resize(TargetGeometry { width: 20, height: 10 }),
            OutputFormat::Png,
        );

        let output = converter.convert(&job, tx).await.unwrap().unwrap();
        let decoded = image::load_from_memory(&output).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (20, 10));
    }

    #[tokio::test]
    async fn test_convert_alpha_png_to_jpeg() {
        let converter = ImageConverter::new().with_jpeg_quality(80);
        let (tx, _rx) = create_progress_channel();
        let job = job("alpha.png", png_fixture(40, 20), Resolution::Unchanged, OutputFormat::Jpeg);

        let output = converter.convert(&job, tx).await.unwrap().unwrap();
        assert_eq!(infer::get(&output).map(|k| k.mime_type()), Some("image/jpeg"));
    }

    #[tokio::test]
    async fn test_convert_to_bmp_and_gif() {
        let converter = ImageConverter::new();
        for format in [OutputFormat::Bmp, OutputFormat::Gif, OutputFormat::Webp] {
            let (tx, _rx) = create_progress_channel();
            let job = job("a.png", png_fixture(8, 8), Resolution::Unchanged, format);
            let output = converter.convert(&job, tx).await.unwrap().unwrap();
            assert_eq!(infer::get(&output).map(|k| k.mime_type()), Some(format.mime_type()));
        }
    }

    #[tokio::test]
    async fn test_passthrough_returns_original_bytes() {
        let data = png_fixture(40, 20);
        let converter = ImageConverter::new();
        let (tx, _rx) = create_progress_channel();
        let job = job("same.png", data.clone(), Resolution::Unchanged, OutputFormat::Png);

        let output = converter.convert(&job, tx).await.unwrap().unwrap();
        assert_eq!(&output[..], &data[..]);
    }

    #[tokio::test]
    async fn test_undecodable_input_is_an_error() {
        let converter = ImageConverter::new();
        let (tx, _rx) = create_progress_channel();
        let job = job(
            "broken.png",
            b"not an image at all".to_vec(),
            Resolution::Resize(TargetGeometry { width: 2, height: 2 }),
            OutputFormat::Png,
        );
        let result = converter.convert(&job, tx).await;
        assert!(matches!(result, Err(ConversionError::Decode { .. })));
    }

    #[tokio::test]
    async fn test_zero_surface_is_an_error() {
        let converter = ImageConverter::new();
        let (tx, _rx) = create_progress_channel();
        let job = job(
            "a.png",
            png_fixture(4, 4),
            Resolution::Resize(TargetGeometry { width: 0, height: 4 }),
            OutputFormat::Png,
        );
        let result = converter.convert(&job, tx).await;
        assert!(matches!(result, Err(ConversionError::Surface { .. })));
    }

    #[tokio::test]
    async fn test_unknown_dimensions_are_an_error() {
        let converter = ImageConverter::new();
        let (tx, _rx) = create_progress_channel();
        let job = job(
            "a.png",
            png_fixture(4, 4),
            Resolution::EngineScaled { width: Some(2), height: None },
            OutputFormat::Png,
        );
        let result = converter.convert(&job, tx).await;
        assert!(matches!(result, Err(ConversionError::UnknownDimensions { .. })));
    }

    #[tokio::test]
    async fn test_jp2_without_engine_is_an_error() {
        let converter = ImageConverter::new();
        let (tx, _rx) = create_progress_channel();
        let job = job("a.png", png_fixture(4, 4), Resolution::Unchanged, OutputFormat::Jp2);
        let result = converter.convert(&job, tx).await;
        assert!(matches!(result, Err(ConversionError::EngineUnavailable(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_jp2_goes_through_engine() {
        use crate::conversion::engine::tests::{fake_engine, FAKE_FFMPEG};

        let engine = Arc::new(fake_engine(FAKE_FFMPEG));
        let converter = ImageConverter::new().with_engine(engine);
        let (tx, _rx) = create_progress_channel();
        let job = job("a.png", png_fixture(4, 4), Resolution::Unchanged, OutputFormat::Jp2);

        let output = converter.convert(&job, tx).await.unwrap();
        assert_eq!(output.as_deref(), Some(&b"converted"[..]));
    }
}
