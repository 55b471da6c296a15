use crate::config::AppConfig;
use crate::conversion::{Engine, ImageConverter, VideoConverter};
use crate::events::EventSender;
use crate::handles::HandleRegistry;
use crate::probe::MediaProber;
use std::sync::Arc;

pub mod batch_service;
pub mod config_service;
pub mod file_service;
pub mod validation_service;

pub use batch_service::{BatchError, BatchRequest, BatchService, BatchSummary, SelectionReport};
pub use config_service::ConfigService;
pub use file_service::FileService;
pub use validation_service::{ParameterInput, ValidationService};

pub type ServiceResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

#[derive(Clone)]
pub struct ServiceManager {
    pub batch: BatchService,
    pub file: FileService,
    pub config: ConfigService,
    pub engine: Arc<Engine>,
    pub prober: Arc<MediaProber>,
}

impl ServiceManager {
    /// Wire the pipeline from an already loaded configuration.
    ///
    /// One engine is shared by the image and video paths; the prober is
    /// shared with callers that only need sizes.
    pub fn new(config: ConfigService, app_config: &AppConfig, event_sender: EventSender) -> Self {
        let engine = Arc::new(Engine::new(app_config.ffmpeg_path.clone()));
        let image_converter = ImageConverter::new()
            .with_engine(engine.clone())
            .with_jpeg_quality(app_config.jpeg_quality);
        let video_converter = VideoConverter::new(engine.clone())
            .with_quality(app_config.video_crf, app_config.video_preset.clone());
        let prober = Arc::new(MediaProber::new(app_config.ffprobe_path.clone()));

        Self {
            batch: BatchService::new(
                Arc::new(image_converter),
                Arc::new(video_converter),
                prober.clone(),
                HandleRegistry::new(),
                event_sender,
            ),
            file: FileService::new(),
            config,
            engine,
            prober,
        }
    }

    pub async fn initialize(&self) -> ServiceResult {
        self.file.initialize().await?;
        self.batch.initialize().await?;
        Ok(())
    }

    /// Releases every outstanding output handle.
    pub async fn shutdown(&self) -> ServiceResult {
        self.batch.shutdown().await?;
        self.file.shutdown().await?;
        self.config.shutdown().await?;
        Ok(())
    }
}

#[async_trait::async_trait]
pub trait Service {
    async fn initialize(&self) -> ServiceResult;
    async fn shutdown(&self) -> ServiceResult;
}
