//! The batch orchestrator.
//!
//! Items are processed strictly one after another by a single worker that
//! drains an explicit queue. A failure, or a panic, inside one item is
//! recorded on that item and the worker moves on to the next.

use crate::constants::{CONVERTED_SUFFIX, RESIZED_SUFFIX};
use crate::conversion::{
    create_progress_channel, ConversionError, ConversionJob, ConversionProgress, Converter,
    OutputFormat,
};
use crate::events::{emit, BatchEvent, EventSender};
use crate::geometry::{self, Resolution};
use crate::handles::{HandleRegistry, ObjectHandle};
use crate::media::{MediaKind, SelectedFile};
use crate::probe::{ProbeError, SizeProber};
use crate::services::file_service::FileService;
use crate::services::validation_service::{
    ParameterError, ParameterInput, ResizeParameters, SelectionRejection, ValidationService,
};
use crate::services::{Service, ServiceResult};
use crate::state::{BatchState, ItemStatus};
use bytes::Bytes;
use futures_util::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum BatchError {
    #[error("A batch is already running")]
    Busy,
    #[error("The batch service has shut down")]
    Closed,
    #[error("No files selected")]
    EmptySelection,
    #[error(transparent)]
    Parameters(#[from] ParameterError),
    #[error("Format conversion is only available for images")]
    ConvertRequiresImages,
    #[error("Batch worker stopped unexpectedly: {0}")]
    WorkerFailed(String),
}

/// Per-item failures; they end that item only.
#[derive(Error, Debug)]
pub enum ItemError {
    #[error(transparent)]
    Probe(#[from] ProbeError),
    #[error(transparent)]
    Conversion(#[from] ConversionError),
    #[error("Cannot resize {file}: its dimensions could not be read")]
    UnknownDimensions { file: String },
    #[error("Conversion failed, see the log for details")]
    NoOutput,
    #[error("Conversion panicked: {0}")]
    Panicked(String),
}

/// What the user asked for, before validation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BatchRequest {
    Resize(ParameterInput),
    Convert(OutputFormat),
}

/// A validated request, fixed for the whole run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Operation {
    Resize(ResizeParameters),
    Convert(OutputFormat),
}

impl Operation {
    pub fn suffix(&self) -> &'static str {
        match self {
            Operation::Resize(_) => RESIZED_SUFFIX,
            Operation::Convert(_) => CONVERTED_SUFFIX,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SelectionReport {
    pub accepted: usize,
    pub rejections: Vec<SelectionRejection>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub run_id: Uuid,
    pub succeeded: usize,
    pub failed: usize,
}

struct WorkItem {
    index: usize,
    file: SelectedFile,
}

struct ItemOutput {
    data: Bytes,
    mime: String,
    file_name: String,
}

#[derive(Clone)]
pub struct BatchService {
    image_converter: Arc<dyn Converter>,
    video_converter: Arc<dyn Converter>,
    prober: Arc<dyn SizeProber>,
    handles: HandleRegistry,
    validation: ValidationService,
    files: FileService,
    state: Arc<RwLock<BatchState>>,
    event_sender: EventSender,
}

impl BatchService {
    pub fn new(
        image_converter: Arc<dyn Converter>,
        video_converter: Arc<dyn Converter>,
        prober: Arc<dyn SizeProber>,
        handles: HandleRegistry,
        event_sender: EventSender,
    ) -> Self {
        Self {
            image_converter,
            video_converter,
            prober,
            handles,
            validation: ValidationService::new(),
            files: FileService::new(),
            state: Arc::new(RwLock::new(BatchState::new())),
            event_sender,
        }
    }

    pub fn handles(&self) -> &HandleRegistry {
        &self.handles
    }

    pub async fn snapshot(&self) -> BatchState {
        self.state.read().await.clone()
    }

    /// Replace the current selection with the acceptable subset of `files`.
    ///
    /// Handles minted for the previous selection are revoked.
    pub async fn select(
        &self,
        kind: MediaKind,
        files: Vec<SelectedFile>,
    ) -> Result<SelectionReport, BatchError> {
        let (released, report) = {
            let mut state = self.state.write().await;
            if state.closed {
                return Err(BatchError::Closed);
            }
            if state.running {
                return Err(BatchError::Busy);
            }
            let (accepted, rejections) = self.validation.screen_selection(kind, files);
            let report = SelectionReport {
                accepted: accepted.len(),
                rejections,
            };
            (state.replace_selection(kind, accepted), report)
        };

        self.release(released);
        for rejection in &report.rejections {
            emit(
                &self.event_sender,
                BatchEvent::FileRejected {
                    file_name: rejection.file_name().to_string(),
                    reason: rejection.to_string(),
                },
            );
        }
        emit(
            &self.event_sender,
            BatchEvent::SelectionReplaced {
                kind,
                accepted: report.accepted,
            },
        );
        tracing::info!(
            "Selected {} {} file(s), rejected {}",
            report.accepted,
            kind,
            report.rejections.len()
        );
        Ok(report)
    }

    /// Drop the selection and revoke its handles.
    pub async fn clear(&self) -> Result<(), BatchError> {
        let released = {
            let mut state = self.state.write().await;
            if state.running {
                return Err(BatchError::Busy);
            }
            state.clear()
        };
        self.release(released);
        Ok(())
    }

    /// Process every selected item in order.
    ///
    /// Preconditions are checked up front; when they fail no item leaves
    /// `Pending`. Per-item failures do not fail the run.
    pub async fn run(&self, request: BatchRequest) -> Result<BatchSummary, BatchError> {
        let (run_id, kind, operation, files, released) = {
            let mut state = self.state.write().await;
            if state.closed {
                return Err(BatchError::Closed);
            }
            if state.running {
                return Err(BatchError::Busy);
            }
            let kind = match state.kind {
                Some(kind) if !state.items.is_empty() => kind,
                _ => return Err(BatchError::EmptySelection),
            };
            let operation = self.operation_for(kind, request)?;

            let released = state.reset_items();
            let run_id = Uuid::new_v4();
            state.running = true;
            state.run_id = Some(run_id);
            let files: Vec<SelectedFile> = state.items.iter().map(|item| item.file.clone()).collect();
            (run_id, kind, operation, files, released)
        };
        self.release(released);

        tracing::info!("Starting batch {} over {} {} file(s)", run_id, files.len(), kind);
        emit(
            &self.event_sender,
            BatchEvent::BatchStarted {
                run_id,
                items: files.len(),
            },
        );

        // The run lives in its own task so that dropping the caller cannot
        // leave the batch marked as running.
        let driver = {
            let service = self.clone();
            tokio::spawn(async move { service.drive(run_id, kind, operation, files).await })
        };
        driver
            .await
            .map_err(|e| BatchError::WorkerFailed(e.to_string()))?
    }

    async fn drive(
        &self,
        run_id: Uuid,
        kind: MediaKind,
        operation: Operation,
        files: Vec<SelectedFile>,
    ) -> Result<BatchSummary, BatchError> {
        let (queue, mut work) = mpsc::unbounded_channel();
        for (index, file) in files.into_iter().enumerate() {
            let _ = queue.send(WorkItem { index, file });
        }
        drop(queue);

        let worker = {
            let service = self.clone();
            tokio::spawn(async move {
                while let Some(item) = work.recv().await {
                    if service.state.read().await.closed {
                        service.skip_item(item.index).await;
                        continue;
                    }
                    service.process_item(kind, operation, item).await;
                }
            })
        };
        let joined = worker.await;

        let summary = {
            let mut state = self.state.write().await;
            state.running = false;
            BatchSummary {
                run_id,
                succeeded: state.count(ItemStatus::Success),
                failed: state.count(ItemStatus::Error),
            }
        };

        if let Err(e) = joined {
            tracing::error!("Batch worker for {} stopped: {}", run_id, e);
            return Err(BatchError::WorkerFailed(e.to_string()));
        }

        tracing::info!(
            "Batch {} finished: {} succeeded, {} failed",
            run_id,
            summary.succeeded,
            summary.failed
        );
        emit(
            &self.event_sender,
            BatchEvent::BatchCompleted {
                run_id,
                succeeded: summary.succeeded,
                failed: summary.failed,
            },
        );
        Ok(summary)
    }

    async fn skip_item(&self, index: usize) {
        let error = BatchError::Closed.to_string();
        if let Some(item) = self.state.write().await.item_mut(index) {
            item.fail(error.clone());
        }
        emit(&self.event_sender, BatchEvent::ItemFailed { index, error });
    }

    fn operation_for(&self, kind: MediaKind, request: BatchRequest) -> Result<Operation, BatchError> {
        match request {
            BatchRequest::Resize(input) => Ok(Operation::Resize(
                self.validation.validate_parameters(kind, &input)?,
            )),
            BatchRequest::Convert(format) if kind == MediaKind::Image && format.is_image() => {
                Ok(Operation::Convert(format))
            }
            BatchRequest::Convert(_) => Err(BatchError::ConvertRequiresImages),
        }
    }

    async fn process_item(&self, kind: MediaKind, operation: Operation, work: WorkItem) {
        let WorkItem { index, file } = work;
        if let Some(item) = self.state.write().await.item_mut(index) {
            item.start_processing();
        }
        emit(
            &self.event_sender,
            BatchEvent::ItemStarted {
                index,
                file_name: file.name.clone(),
            },
        );

        let outcome = AssertUnwindSafe(self.convert_item(index, kind, operation, &file))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(ItemError::Panicked(panic_message(panic))));

        match outcome {
            Ok(output) => {
                // Minting happens under the state lock so shutdown either
                // sees the handle or stops it from being minted.
                let handle = {
                    let mut state = self.state.write().await;
                    if state.closed {
                        None
                    } else {
                        let handle = self.handles.mint(
                            output.data.clone(),
                            output.mime,
                            output.file_name.clone(),
                        );
                        if let Some(item) = state.item_mut(index) {
                            item.complete(output.data, output.file_name, handle.clone());
                        }
                        Some(handle)
                    }
                };
                match handle {
                    Some(handle) => {
                        emit(&self.event_sender, BatchEvent::ItemSucceeded { index, handle })
                    }
                    None => self.skip_item(index).await,
                }
            }
            Err(e) => {
                tracing::warn!("Item {} ({}) failed: {}", index, file.name, e);
                if let Some(item) = self.state.write().await.item_mut(index) {
                    item.fail(e.to_string());
                }
                emit(
                    &self.event_sender,
                    BatchEvent::ItemFailed {
                        index,
                        error: e.to_string(),
                    },
                );
            }
        }
    }

    async fn convert_item(
        &self,
        index: usize,
        kind: MediaKind,
        operation: Operation,
        file: &SelectedFile,
    ) -> Result<ItemOutput, ItemError> {
        let original = self.prober.probe(kind, file).await?;
        if let Some(item) = self.state.write().await.item_mut(index) {
            item.set_original(original);
        }

        let (resolution, fps, format) = match operation {
            Operation::Resize(params) => {
                if kind == MediaKind::Image && !original.is_known() {
                    return Err(ItemError::UnknownDimensions {
                        file: file.name.clone(),
                    });
                }
                let resolution = geometry::resolve(
                    original,
                    params.width,
                    params.height,
                    kind.requires_even_dimensions(),
                );
                let format = match kind {
                    MediaKind::Image => file
                        .extension()
                        .and_then(|ext| OutputFormat::from_image_extension(&ext))
                        .unwrap_or(OutputFormat::Png),
                    MediaKind::Video => OutputFormat::Mp4,
                };
                (resolution, params.fps, format)
            }
            Operation::Convert(format) => (Resolution::Unchanged, None, format),
        };

        let job = ConversionJob {
            id: Uuid::new_v4(),
            kind,
            source: file.clone(),
            original,
            resolution,
            fps,
            format,
        };
        self.record_progress(index, ConversionProgress::message(describe(&job)))
            .await;

        let converter = match kind {
            MediaKind::Image => &self.image_converter,
            MediaKind::Video => &self.video_converter,
        };
        let (progress_tx, mut progress_rx) = create_progress_channel();
        let conversion = converter.convert(&job, progress_tx);
        tokio::pin!(conversion);

        let result = loop {
            tokio::select! {
                biased;
                Some(progress) = progress_rx.recv() => self.record_progress(index, progress).await,
                result = &mut conversion => break result,
            }
        };
        while let Ok(progress) = progress_rx.try_recv() {
            self.record_progress(index, progress).await;
        }

        let data = result?.ok_or(ItemError::NoOutput)?;

        // A video that was passed through keeps its own container.
        let (extension, mime) = if kind == MediaKind::Video && job.is_passthrough() {
            (
                file.extension().unwrap_or_else(|| format.extension().to_string()),
                file.mime.clone().unwrap_or_else(|| format.mime_type().to_string()),
            )
        } else {
            (format.extension().to_string(), format.mime_type().to_string())
        };
        let file_name = self
            .files
            .output_file_name(&file.stem(), operation.suffix(), &extension);

        Ok(ItemOutput {
            data,
            mime,
            file_name,
        })
    }

    async fn record_progress(&self, index: usize, progress: ConversionProgress) {
        if let Some(item) = self.state.write().await.item_mut(index) {
            item.update_progress(&progress);
        }
        emit(&self.event_sender, BatchEvent::ItemProgress { index, progress });
    }

    fn release(&self, handles: Vec<ObjectHandle>) {
        let revoked = handles.iter().filter(|h| self.handles.revoke(h)).count();
        if revoked > 0 {
            tracing::debug!("Revoked {} output handle(s)", revoked);
            emit(&self.event_sender, BatchEvent::HandlesRevoked(revoked));
        }
    }
}

fn describe(job: &ConversionJob) -> String {
    match job.resolution {
        Resolution::Unchanged => match job.fps {
            Some(fps) => format!("Keeping {} at {} fps", job.original, fps),
            None => format!("Keeping {} as {}", job.original, job.format),
        },
        Resolution::Resize(target) => format!("Resizing {} to {}", job.original, target),
        Resolution::EngineScaled { width, height } => format!(
            "Resizing to {}x{} (missing side derived by the engine)",
            width.map_or_else(|| "auto".to_string(), |w| w.to_string()),
            height.map_or_else(|| "auto".to_string(), |h| h.to_string()),
        ),
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[async_trait::async_trait]
impl Service for BatchService {
    async fn initialize(&self) -> ServiceResult {
        tracing::info!("Batch service initialized");
        Ok(())
    }

    /// Revokes every outstanding handle. A run still in flight finishes
    /// without minting any more.
    async fn shutdown(&self) -> ServiceResult {
        let released = {
            let mut state = self.state.write().await;
            state.closed = true;
            state.take_handles()
        };
        self.release(released);
        tracing::info!("Batch service shutdown, {} handle(s) still live", self.handles.live_count());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversion::{report, ProgressSender};
    use crate::events::{create_event_channel, EventReceiver};
    use crate::geometry::Dimensions;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tokio::sync::Notify;

    const PNG_MAGIC: &[u8] = &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];

    struct FakeProber {
        dimensions: Dimensions,
    }

    #[async_trait]
    impl SizeProber for FakeProber {
        async fn probe(&self, _kind: MediaKind, file: &SelectedFile) -> Result<Dimensions, ProbeError> {
            if file.name.contains("corrupt") {
                return Err(ProbeError::Decode {
                    file: file.name.clone(),
                    message: "bad header".to_string(),
                });
            }
            Ok(self.dimensions)
        }
    }

    /// Behaves according to the file name: `fail` yields no output, `panic`
    /// panics, `error` is a definitive error, anything else succeeds.
    #[derive(Default)]
    struct FakeConverter {
        calls: Mutex<Vec<String>>,
        jobs: Mutex<Vec<ConversionJob>>,
    }

    #[async_trait]
    impl Converter for FakeConverter {
        async fn convert(
            &self,
            job: &ConversionJob,
            progress: ProgressSender,
        ) -> Result<Option<Bytes>, ConversionError> {
            self.calls.lock().unwrap().push(job.source.name.clone());
            self.jobs.lock().unwrap().push(job.clone());
            report(&progress, ConversionProgress::with_percent("working", 50.0));
            tokio::task::yield_now().await;

            let name = &job.source.name;
            if name.contains("panic") {
                panic!("converter exploded on {}", name);
            }
            if name.contains("error") {
                return Err(ConversionError::Decode {
                    file: name.clone(),
                    message: "garbage".to_string(),
                });
            }
            if name.contains("fail") {
                return Ok(None);
            }
            Ok(Some(Bytes::from(format!("out:{}", name))))
        }
    }

    /// Signals when it starts and waits for permission to finish.
    struct GatedConverter {
        started: Arc<Notify>,
        release: Arc<Notify>,
    }

    #[async_trait]
    impl Converter for GatedConverter {
        async fn convert(
            &self,
            _job: &ConversionJob,
            _progress: ProgressSender,
        ) -> Result<Option<Bytes>, ConversionError> {
            self.started.notify_one();
            self.release.notified().await;
            Ok(Some(Bytes::from_static(b"done")))
        }
    }

    struct Harness {
        service: BatchService,
        converter: Arc<FakeConverter>,
        events: EventReceiver,
    }

    fn harness(dimensions: Dimensions) -> Harness {
        let converter = Arc::new(FakeConverter::default());
        let (tx, events) = create_event_channel();
        let service = BatchService::new(
            converter.clone(),
            converter.clone(),
            Arc::new(FakeProber { dimensions }),
            HandleRegistry::new(),
            tx,
        );
        Harness {
            service,
            converter,
            events,
        }
    }

    fn images(names: &[&str]) -> Vec<SelectedFile> {
        names
            .iter()
            .map(|name| SelectedFile::new(*name, PNG_MAGIC.to_vec()))
            .collect()
    }

    fn videos(names: &[&str]) -> Vec<SelectedFile> {
        names
            .iter()
            .map(|name| SelectedFile::new(*name, b"not-sniffable".to_vec()))
            .collect()
    }

    fn width(width: i64) -> BatchRequest {
        BatchRequest::Resize(ParameterInput {
            width: Some(width),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_failing_item_does_not_stop_the_batch() {
        let h = harness(Dimensions::new(800, 600));
        h.service
            .select(MediaKind::Image, images(&["a.png", "b-fail.png", "c.png"]))
            .await
            .unwrap();

        let summary = h.service.run(width(400)).await.unwrap();
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 1);

        let state = h.service.snapshot().await;
        let statuses: Vec<_> = state.items.iter().map(|i| i.status).collect();
        assert_eq!(
            statuses,
            vec![ItemStatus::Success, ItemStatus::Error, ItemStatus::Success]
        );
        assert!(!state.running);
        assert_eq!(
            *h.converter.calls.lock().unwrap(),
            vec!["a.png", "b-fail.png", "c.png"]
        );
        assert!(state.items[1].error.is_some());
        assert!(state.items[1].handle.is_none());
    }

    #[tokio::test]
    async fn test_success_records_output_and_handle() {
        let h = harness(Dimensions::new(800, 600));
        h.service
            .select(MediaKind::Image, images(&["photo.png"]))
            .await
            .unwrap();
        h.service.run(width(400)).await.unwrap();

        let state = h.service.snapshot().await;
        let item = &state.items[0];
        assert_eq!(item.original, Some(Dimensions::new(800, 600)));
        assert_eq!(item.output_name.as_deref(), Some("photo_resized.png"));
        assert!(item.log.iter().any(|line| line == "working"));
        assert!(item.log.iter().any(|line| line == "Resizing 800x600 to 400x300"));

        let handle = item.handle.clone().unwrap();
        let entry = h.service.handles().entry(&handle).unwrap();
        assert_eq!(&entry.data[..], b"out:photo.png");
        assert_eq!(entry.mime, "image/png");

        let jobs = h.converter.jobs.lock().unwrap();
        assert_eq!(
            jobs[0].resolution,
            Resolution::Resize(crate::geometry::TargetGeometry {
                width: 400,
                height: 300
            })
        );
    }

    #[tokio::test]
    async fn test_panicking_converter_becomes_item_error() {
        let h = harness(Dimensions::new(800, 600));
        h.service
            .select(MediaKind::Image, images(&["x-panic.png", "y.png"]))
            .await
            .unwrap();

        let summary = h.service.run(width(100)).await.unwrap();
        assert_eq!((summary.succeeded, summary.failed), (1, 1));

        let state = h.service.snapshot().await;
        assert_eq!(state.items[0].status, ItemStatus::Error);
        assert!(state.items[0]
            .error
            .as_deref()
            .unwrap()
            .contains("converter exploded"));
        assert_eq!(state.items[1].status, ItemStatus::Success);
    }

    #[tokio::test]
    async fn test_definitive_errors_and_probe_failures() {
        let h = harness(Dimensions::new(800, 600));
        h.service
            .select(MediaKind::Image, images(&["a-error.png", "b-corrupt.png"]))
            .await
            .unwrap();
        h.service.run(width(100)).await.unwrap();

        let state = h.service.snapshot().await;
        assert!(state.items.iter().all(|i| i.status == ItemStatus::Error));
        assert!(state.items[1].error.as_deref().unwrap().contains("bad header"));
        // The corrupt file never reached the converter.
        assert_eq!(*h.converter.calls.lock().unwrap(), vec!["a-error.png"]);
    }

    #[tokio::test]
    async fn test_empty_parameters_block_the_run() {
        let h = harness(Dimensions::new(800, 600));
        h.service
            .select(MediaKind::Video, videos(&["a.mp4", "b.mov"]))
            .await
            .unwrap();

        let result = h
            .service
            .run(BatchRequest::Resize(ParameterInput::default()))
            .await;
        assert!(matches!(result, Err(BatchError::Parameters(_))));

        let state = h.service.snapshot().await;
        assert!(state.items.iter().all(|i| i.status == ItemStatus::Pending));
        assert!(!state.running);
        assert!(h.converter.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_run_without_selection() {
        let h = harness(Dimensions::new(800, 600));
        assert!(matches!(
            h.service.run(width(100)).await,
            Err(BatchError::EmptySelection)
        ));
    }

    #[tokio::test]
    async fn test_selection_ceiling_reports_each_excess_file() {
        let mut h = harness(Dimensions::new(800, 600));
        let names: Vec<String> = (0..7).map(|i| format!("{}.png", i)).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();

        let report = h.service.select(MediaKind::Image, images(&refs)).await.unwrap();
        assert_eq!(report.accepted, 5);
        assert_eq!(report.rejections.len(), 2);
        assert_eq!(h.service.snapshot().await.items.len(), 5);

        let mut rejected = 0;
        while let Ok(event) = h.events.try_recv() {
            if matches!(event, BatchEvent::FileRejected { .. }) {
                rejected += 1;
            }
        }
        assert_eq!(rejected, 2);
    }

    #[tokio::test]
    async fn test_new_selection_revokes_previous_handles() {
        let h = harness(Dimensions::new(800, 600));
        h.service
            .select(MediaKind::Image, images(&["a.png"]))
            .await
            .unwrap();
        h.service.run(width(400)).await.unwrap();

        let handle = h.service.snapshot().await.items[0].handle.clone().unwrap();
        let kept = h.service.handles().resolve(&handle).unwrap();
        assert!(h.service.handles().is_live(&handle));

        h.service
            .select(MediaKind::Image, images(&["b.png"]))
            .await
            .unwrap();
        assert!(!h.service.handles().is_live(&handle));
        assert!(h.service.handles().resolve(&handle).is_none());
        assert_eq!(&kept[..], b"out:a.png");
        assert_eq!(h.service.handles().live_count(), 0);
    }

    #[tokio::test]
    async fn test_rerun_and_shutdown_release_handles() {
        let h = harness(Dimensions::new(800, 600));
        h.service
            .select(MediaKind::Image, images(&["a.png"]))
            .await
            .unwrap();
        h.service.run(width(400)).await.unwrap();
        let first = h.service.snapshot().await.items[0].handle.clone().unwrap();

        h.service.run(width(200)).await.unwrap();
        assert!(!h.service.handles().is_live(&first));
        assert_eq!(h.service.handles().live_count(), 1);

        h.service.shutdown().await.unwrap();
        assert_eq!(h.service.handles().live_count(), 0);
    }

    #[tokio::test]
    async fn test_video_resize_forces_even_and_mp4_output() {
        let h = harness(Dimensions::new(1920, 1080));
        h.service
            .select(MediaKind::Video, videos(&["clip.webm"]))
            .await
            .unwrap();
        h.service
            .run(BatchRequest::Resize(ParameterInput {
                height: Some(501),
                fps: Some(24),
                ..Default::default()
            }))
            .await
            .unwrap();

        let jobs = h.converter.jobs.lock().unwrap();
        assert_eq!(jobs[0].format, OutputFormat::Mp4);
        assert_eq!(jobs[0].fps, Some(24));
        assert_eq!(
            jobs[0].resolution,
            Resolution::Resize(crate::geometry::TargetGeometry {
                width: 890,
                height: 502
            })
        );
        let state = h.service.snapshot().await;
        assert_eq!(state.items[0].output_name.as_deref(), Some("clip_resized.mp4"));
    }

    #[tokio::test]
    async fn test_unknown_video_size_is_engine_scaled() {
        let h = harness(Dimensions::new(0, 0));
        h.service
            .select(MediaKind::Video, videos(&["clip.mov"]))
            .await
            .unwrap();
        h.service.run(width(641)).await.unwrap();

        let jobs = h.converter.jobs.lock().unwrap();
        assert_eq!(
            jobs[0].resolution,
            Resolution::EngineScaled {
                width: Some(642),
                height: None
            }
        );
    }

    #[tokio::test]
    async fn test_unknown_image_size_is_item_error() {
        let h = harness(Dimensions::new(0, 0));
        h.service
            .select(MediaKind::Image, images(&["a.png"]))
            .await
            .unwrap();
        h.service.run(width(100)).await.unwrap();

        let state = h.service.snapshot().await;
        assert_eq!(state.items[0].status, ItemStatus::Error);
        assert!(h.converter.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_convert_images_only() {
        let h = harness(Dimensions::new(10, 10));
        h.service
            .select(MediaKind::Image, images(&["a.png"]))
            .await
            .unwrap();
        h.service
            .run(BatchRequest::Convert(OutputFormat::Webp))
            .await
            .unwrap();
        let state = h.service.snapshot().await;
        assert_eq!(state.items[0].output_name.as_deref(), Some("a_converted.webp"));

        h.service
            .select(MediaKind::Video, videos(&["a.mp4"]))
            .await
            .unwrap();
        assert!(matches!(
            h.service.run(BatchRequest::Convert(OutputFormat::Png)).await,
            Err(BatchError::ConvertRequiresImages)
        ));
    }

    fn gated_service() -> (BatchService, Arc<Notify>, Arc<Notify>) {
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let gated = Arc::new(GatedConverter {
            started: started.clone(),
            release: release.clone(),
        });
        let (tx, _events) = create_event_channel();
        let service = BatchService::new(
            gated.clone(),
            gated,
            Arc::new(FakeProber {
                dimensions: Dimensions::new(100, 100),
            }),
            HandleRegistry::new(),
            tx,
        );
        (service, started, release)
    }

    async fn wait_until_idle(service: &BatchService) {
        for _ in 0..1000 {
            if !service.snapshot().await.running {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("batch never finished");
    }

    #[tokio::test]
    async fn test_selection_refused_while_running() {
        let (service, started, release) = gated_service();
        service
            .select(MediaKind::Image, images(&["a.png"]))
            .await
            .unwrap();

        let runner = {
            let service = service.clone();
            tokio::spawn(async move { service.run(width(50)).await })
        };
        started.notified().await;

        let state = service.snapshot().await;
        assert!(state.running);
        assert_eq!(state.items[0].status, ItemStatus::Processing);
        assert!(matches!(
            service.select(MediaKind::Image, images(&["b.png"])).await,
            Err(BatchError::Busy)
        ));
        assert!(matches!(service.run(width(10)).await, Err(BatchError::Busy)));

        release.notify_one();
        let summary = runner.await.unwrap().unwrap();
        assert_eq!(summary.succeeded, 1);
        assert!(!service.snapshot().await.running);
    }

    #[tokio::test]
    async fn test_dropped_caller_does_not_wedge_the_service() {
        let (service, started, release) = gated_service();
        service
            .select(MediaKind::Image, images(&["a.png"]))
            .await
            .unwrap();

        let runner = {
            let service = service.clone();
            tokio::spawn(async move { service.run(width(50)).await })
        };
        started.notified().await;
        runner.abort();
        assert!(runner.await.unwrap_err().is_cancelled());

        release.notify_one();
        wait_until_idle(&service).await;

        let state = service.snapshot().await;
        assert_eq!(state.items[0].status, ItemStatus::Success);
        assert!(service
            .select(MediaKind::Image, images(&["b.png"]))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_shutdown_mid_run_leaves_no_live_handles() {
        let (service, started, release) = gated_service();
        service
            .select(MediaKind::Image, images(&["a.png", "b.png"]))
            .await
            .unwrap();

        let runner = {
            let service = service.clone();
            tokio::spawn(async move { service.run(width(50)).await })
        };
        started.notified().await;
        service.shutdown().await.unwrap();
        release.notify_one();

        let summary = runner.await.unwrap().unwrap();
        assert_eq!((summary.succeeded, summary.failed), (0, 2));
        assert_eq!(service.handles().live_count(), 0);

        let state = service.snapshot().await;
        assert!(state.items.iter().all(|i| i.handle.is_none()));
        assert!(matches!(
            service.select(MediaKind::Image, images(&["c.png"])).await,
            Err(BatchError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_events_follow_item_order() {
        let mut h = harness(Dimensions::new(800, 600));
        h.service
            .select(MediaKind::Image, images(&["a.png", "b-fail.png"]))
            .await
            .unwrap();
        h.service.run(width(100)).await.unwrap();

        let mut trail = Vec::new();
        while let Ok(event) = h.events.try_recv() {
            match event {
                BatchEvent::ItemStarted { index, .. } => trail.push(format!("start {}", index)),
                BatchEvent::ItemSucceeded { index, .. } => trail.push(format!("ok {}", index)),
                BatchEvent::ItemFailed { index, .. } => trail.push(format!("fail {}", index)),
                BatchEvent::BatchCompleted { succeeded, failed, .. } => {
                    trail.push(format!("done {}/{}", succeeded, failed))
                }
                _ => {}
            }
        }
        assert_eq!(trail, vec!["start 0", "ok 0", "start 1", "fail 1", "done 1/1"]);
    }
}
