use crate::constants::MAX_LOG_LINES;
use crate::conversion::ConversionProgress;
use crate::geometry::Dimensions;
use crate::handles::ObjectHandle;
use crate::media::{MediaKind, SelectedFile};
use bytes::Bytes;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ItemStatus {
    #[default]
    Pending,
    Processing,
    Success,
    Error,
}

impl ItemStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ItemStatus::Success | ItemStatus::Error)
    }
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ItemStatus::Pending => "pending",
            ItemStatus::Processing => "processing",
            ItemStatus::Success => "success",
            ItemStatus::Error => "error",
        };
        f.write_str(label)
    }
}

/// One selected file and everything the run learned about it.
#[derive(Debug, Clone)]
pub struct UploadItem {
    pub file: SelectedFile,
    pub original: Option<Dimensions>,
    pub status: ItemStatus,
    pub log: VecDeque<String>,
    pub percent: Option<f32>,
    pub output: Option<Bytes>,
    pub output_name: Option<String>,
    pub handle: Option<ObjectHandle>,
    pub error: Option<String>,
    started_at: Option<Instant>,
    pub elapsed: Option<Duration>,
}

impl UploadItem {
    pub fn new(file: SelectedFile) -> Self {
        Self {
            file,
            original: None,
            status: ItemStatus::Pending,
            log: VecDeque::new(),
            percent: None,
            output: None,
            output_name: None,
            handle: None,
            error: None,
            started_at: None,
            elapsed: None,
        }
    }

    pub fn push_log(&mut self, line: impl Into<String>) {
        if self.log.len() == MAX_LOG_LINES {
            self.log.pop_front();
        }
        self.log.push_back(line.into());
    }

    pub fn start_processing(&mut self) {
        if self.status == ItemStatus::Pending {
            self.status = ItemStatus::Processing;
            self.started_at = Some(Instant::now());
        }
    }

    pub fn set_original(&mut self, original: Dimensions) {
        self.original = Some(original);
        self.push_log(format!("Original size: {}", original));
    }

    pub fn update_progress(&mut self, progress: &ConversionProgress) {
        if self.status != ItemStatus::Processing {
            return;
        }
        if progress.percent.is_some() {
            self.percent = progress.percent;
        }
        self.push_log(progress.message.clone());
    }

    pub fn complete(&mut self, output: Bytes, output_name: String, handle: ObjectHandle) {
        if self.status != ItemStatus::Processing {
            return;
        }
        self.status = ItemStatus::Success;
        self.percent = Some(100.0);
        self.push_log(format!("Ready: {}", output_name));
        self.output = Some(output);
        self.output_name = Some(output_name);
        self.handle = Some(handle);
        self.elapsed = self.started_at.map(|t| t.elapsed());
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        if self.status.is_terminal() {
            return;
        }
        let error = error.into();
        self.status = ItemStatus::Error;
        self.push_log(format!("Error: {}", error));
        self.error = Some(error);
        self.elapsed = self.started_at.map(|t| t.elapsed());
    }

    /// Hands out the handle at most once, so it is revoked at most once.
    pub fn take_handle(&mut self) -> Option<ObjectHandle> {
        self.handle.take()
    }
}

/// Shared view of the current selection and run.
#[derive(Debug, Clone, Default)]
pub struct BatchState {
    pub kind: Option<MediaKind>,
    pub items: Vec<UploadItem>,
    pub running: bool,
    pub run_id: Option<Uuid>,
    /// Set once at teardown; no handle is minted afterwards.
    pub closed: bool,
}

impl BatchState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the selection, returning the handles of the discarded items.
    pub fn replace_selection(&mut self, kind: MediaKind, files: Vec<SelectedFile>) -> Vec<ObjectHandle> {
        let handles = self.take_handles();
        self.kind = Some(kind);
        self.items = files.into_iter().map(UploadItem::new).collect();
        self.run_id = None;
        handles
    }

    pub fn clear(&mut self) -> Vec<ObjectHandle> {
        let handles = self.take_handles();
        self.kind = None;
        self.items.clear();
        self.run_id = None;
        handles
    }

    /// Put every item back to pending for another run over the same files.
    pub fn reset_items(&mut self) -> Vec<ObjectHandle> {
        let handles = self.take_handles();
        for item in &mut self.items {
            *item = UploadItem::new(item.file.clone());
        }
        handles
    }

    pub fn take_handles(&mut self) -> Vec<ObjectHandle> {
        self.items.iter_mut().filter_map(UploadItem::take_handle).collect()
    }

    pub fn item_mut(&mut self, index: usize) -> Option<&mut UploadItem> {
        self.items.get_mut(index)
    }

    pub fn count(&self, status: ItemStatus) -> usize {
        self.items.iter().filter(|item| item.status == status).count()
    }

    pub fn is_finished(&self) -> bool {
        !self.items.is_empty() && self.items.iter().all(|item| item.status.is_terminal())
    }
}
