// Copyright 2025 pfw-rs Project
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::error::Error;
use std::fmt::{self, Display};

pub type Result<T> = std::result::Result<T, TraceError>;

/// Typed errors returned by index, reader, and pipeline operations.
#[derive(Debug)]
pub enum TraceError {
    /// Malformed range, inverted interval, non-positive chunk size.
    InvalidArgument(String),
    /// Requested range reaches past the end of the archive.
    OutOfRange(String),
    /// Missing archive or index.
    NotFound(String),
    /// Index fingerprint disagrees with the archive; caller decides
    /// rebuild vs. abort.
    Stale(String),
    /// zlib data error, truncated stream, or sidecar schema mismatch.
    Corrupt(String),
    /// Underlying I/O failure.
    Io(std::io::Error),
    /// A worker task failed; wraps the underlying cause.
    TaskFailed(String, Box<TraceError>),
    /// The pipeline was shut down before this task ran.
    Cancelled,
}

impl Display for TraceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceError::InvalidArgument(s) => write!(f, "invalid argument: {}", s),
            TraceError::OutOfRange(s) => write!(f, "out of range: {}", s),
            TraceError::NotFound(s) => write!(f, "not found: {}", s),
            TraceError::Stale(s) => write!(f, "stale index: {}", s),
            TraceError::Corrupt(s) => write!(f, "corrupt data: {}", s),
            TraceError::Io(e) => write!(f, "io error: {}", e),
            TraceError::TaskFailed(task, cause) => write!(f, "task {} failed: {}", task, cause),
            TraceError::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl Error for TraceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            TraceError::Io(e) => Some(e),
            TraceError::TaskFailed(_, cause) => Some(cause.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for TraceError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::NotFound {
            TraceError::NotFound(e.to_string())
        } else {
            TraceError::Io(e)
        }
    }
}

impl TraceError {
    pub fn in_task(self, task: impl Into<String>) -> TraceError {
        TraceError::TaskFailed(task.into(), Box::new(self))
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, TraceError::Stale(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, TraceError::NotFound(_))
    }
}
