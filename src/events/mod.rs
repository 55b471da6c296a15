use crate::conversion::ConversionProgress;
use crate::handles::ObjectHandle;
use crate::media::MediaKind;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub enum BatchEvent {
    // Selection events
    SelectionReplaced {
        kind: MediaKind,
        accepted: usize,
    },
    FileRejected {
        file_name: String,
        reason: String,
    },

    // Run events
    BatchStarted {
        run_id: Uuid,
        items: usize,
    },
    ItemStarted {
        index: usize,
        file_name: String,
    },
    ItemProgress {
        index: usize,
        progress: ConversionProgress,
    },
    ItemSucceeded {
        index: usize,
        handle: ObjectHandle,
    },
    ItemFailed {
        index: usize,
        error: String,
    },
    BatchCompleted {
        run_id: Uuid,
        succeeded: usize,
        failed: usize,
    },

    // Lifecycle events
    HandlesRevoked(usize),
    ConfigLoaded,
    ConfigSaved,
}

pub type EventSender = tokio::sync::mpsc::UnboundedSender<BatchEvent>;
pub type EventReceiver = tokio::sync::mpsc::UnboundedReceiver<BatchEvent>;

pub fn create_event_channel() -> (EventSender, EventReceiver) {
    tokio::sync::mpsc::unbounded_channel()
}

/// Send an event, logging instead of failing when nobody is listening.
pub fn emit(sender: &EventSender, event: BatchEvent) {
    if let Err(e) = sender.send(event) {
        tracing::debug!("Dropped batch event, receiver closed: {:?}", e.0);
    }
}
