//! Data models for a replacement run.

use crate::error::{ErrorKind, ImageError};
use crate::markup::NodeHandle;
use serde::Serialize;

/// One remote image reference scheduled for download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplaceTask {
    /// Position in document order among the scheduled tasks.
    pub index: usize,
    /// The remote URL as found in the markup.
    pub source: String,
    pub node: NodeHandle,
}

/// Outcome of one task, produced by a worker.
#[derive(Debug, Clone)]
pub struct DownloadResult {
    pub task: ReplaceTask,
    pub outcome: Result<String, ImageError>,
}

impl DownloadResult {
    pub fn new(task: ReplaceTask, outcome: Result<String, ImageError>) -> Self {
        Self { task, outcome }
    }

    pub fn cancelled(task: ReplaceTask) -> Self {
        Self::new(task, Err(ImageError::Cancelled))
    }

    pub fn new_location(&self) -> Option<&str> {
        self.outcome.as_deref().ok()
    }

    pub fn error(&self) -> Option<&ImageError> {
        self.outcome.as_ref().err()
    }
}

/// A task that left its reference untouched.
#[derive(Debug, Clone, Serialize)]
pub struct TaskFailure {
    pub index: usize,
    pub source: String,
    pub kind: ErrorKind,
    pub attempts: u32,
    pub message: String,
    #[serde(skip)]
    pub error: ImageError,
}

impl TaskFailure {
    pub fn new(task: &ReplaceTask, error: ImageError) -> Self {
        Self {
            index: task.index,
            source: task.source.clone(),
            kind: error.kind(),
            attempts: error.attempts(),
            message: error.to_string(),
            error,
        }
    }
}

/// Summary of one replacement run.
#[derive(Debug, Clone, Serialize)]
pub struct ReplaceReport {
    pub markup: String,
    /// Remote references found.
    pub total: usize,
    /// References rewritten to a new location.
    pub succeeded: usize,
    /// Failures in document order.
    pub failures: Vec<TaskFailure>,
}

impl ReplaceReport {
    pub fn unchanged(markup: String) -> Self {
        Self {
            markup,
            total: 0,
            succeeded: 0,
            failures: Vec::new(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
