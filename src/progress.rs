//! Fire-and-forget progress reporting and cooperative cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;

use crate::error::PipelineError;

pub trait ProgressSink {
    fn status(&self, message: &str);
}

impl<F> ProgressSink for F
where
    F: Fn(&str),
{
    fn status(&self, message: &str) {
        self(message)
    }
}

impl ProgressSink for Sender<String> {
    fn status(&self, message: &str) {
        // A dropped receiver just means nobody is listening.
        let _ = self.send(message.to_string());
    }
}

#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    inner: Arc<AtomicBool>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Copy, Default)]
pub struct RunHooks<'a> {
    pub progress: Option<&'a dyn ProgressSink>,
    pub cancel: Option<&'a CancelFlag>,
}

impl<'a> RunHooks<'a> {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_progress(progress: &'a dyn ProgressSink) -> Self {
        Self {
            progress: Some(progress),
            cancel: None,
        }
    }

    pub fn cancellable(mut self, cancel: &'a CancelFlag) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub(crate) fn report(&self, message: &str) {
        if let Some(progress) = self.progress {
            progress.status(message);
        }
    }

    pub(crate) fn checkpoint(&self, stage: &'static str) -> Result<(), PipelineError> {
        match self.cancel {
            Some(flag) if flag.is_cancelled() => Err(PipelineError::Cancelled { stage }),
            _ => Ok(()),
        }
    }
}
