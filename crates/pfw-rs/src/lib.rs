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

//! Random access into gzipped DFTracer `.pfw` trace archives, and the
//! pipeline that splits them into size-bounded chunks.
//!
//! The three load-bearing pieces:
//! - [`index`]: a persistent sidecar mapping uncompressed offsets and line
//!   numbers to resumable inflate states, built in one scan.
//! - [`reader`]: byte / line-aligned / parsed-line streams over arbitrary
//!   byte or line ranges of an indexed archive.
//! - [`split`]: the metadata → manifest → extract → verify task graph.

pub mod error;
pub mod gzip;
pub mod index;
pub mod inflate;
pub mod json;
pub mod reader;
pub mod split;

pub use crate::error::{Result, TraceError};
pub use crate::index::{ArchiveFingerprint, Checkpoint, Indexer, LineAnchor, TraceIndex};
pub use crate::json::EventId;
pub use crate::reader::{
    LineIter, RangeKind, StreamConfig, StreamKind, TraceReader, TraceStream,
};
pub use crate::split::{
    run_split, ChunkManifest, ChunkResult, ChunkSpec, FileMetadata, SplitConfig, SplitReport,
};

#[doc(hidden)]
pub mod test_helpers;
