use std::sync::Arc;

use parking_lot::Mutex;

use crate::{AnyResult, LifecycleEvent, LifecycleEventType, LifecycleListener};

/// Shared event log used by lifecycle tests.
#[derive(Clone, Default)]
pub(crate) struct Recorder(Arc<Mutex<Vec<(String, LifecycleEventType)>>>);

impl Recorder {
    pub(crate) fn take(&self) -> Vec<(String, LifecycleEventType)> {
        std::mem::take(&mut *self.0.lock())
    }

    pub(crate) fn kinds(&self) -> Vec<LifecycleEventType> {
        self.take().into_iter().map(|(_, k)| k).collect()
    }

    pub(crate) fn sources(&self) -> Vec<(String, LifecycleEventType)> {
        self.0.lock().clone()
    }
}

pub(crate) struct RecordingListener {
    tag: String,
    recorder: Recorder,
}

impl RecordingListener {
    pub(crate) fn new(tag: &str, recorder: &Recorder) -> Self {
        Self {
            tag: tag.to_string(),
            recorder: recorder.clone(),
        }
    }
}

impl LifecycleListener for RecordingListener {
    fn lifecycle_event(&self, event: &LifecycleEvent<'_>) -> AnyResult<()> {
        let tag = if self.tag.is_empty() {
            event.source().component_name()
        } else {
            self.tag.clone()
        };
        self.recorder.0.lock().push((tag, event.kind()));
        Ok(())
    }
}
