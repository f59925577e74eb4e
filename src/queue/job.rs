// src/queue/job.rs

//! Jobs and the source data they carry.

use std::fmt;
use std::path::{Path, PathBuf};

use bytes::Bytes;

/// Where the bytes of a source live.
#[derive(Clone, PartialEq, Eq)]
pub enum BlobContents {
    /// Bytes already held in memory.
    Memory(Bytes),
    /// A file on the host filesystem, read by the engine at mount time.
    File(PathBuf),
}

impl fmt::Debug for BlobContents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlobContents::Memory(bytes) => write!(f, "Memory({} bytes)", bytes.len()),
            BlobContents::File(path) => f.debug_tuple("File").field(path).finish(),
        }
    }
}

/// Opaque input handed to the engine: a file name plus its contents.
///
/// The name is what the engine sees inside the mounted input directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceBlob {
    name: String,
    contents: BlobContents,
}

impl SourceBlob {
    pub fn from_bytes(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            contents: BlobContents::Memory(data.into()),
        }
    }

    /// Reference a host file. The name defaults to the path's file name.
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "input".to_string());
        Self {
            name,
            contents: BlobContents::File(path.to_path_buf()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn contents(&self) -> &BlobContents {
        &self.contents
    }
}

/// One queued unit of work: a source plus the engine arguments placed between
/// the input and the output file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    source: SourceBlob,
    id: Option<String>,
    args: Vec<String>,
}

impl Job {
    pub fn new(source: SourceBlob, id: Option<String>, args: Vec<String>) -> Self {
        Self { source, id, args }
    }

    pub fn source(&self) -> &SourceBlob {
        &self.source
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Label used in log lines: the id if present, otherwise the source name.
    pub fn label(&self) -> &str {
        self.id().unwrap_or_else(|| self.source.name())
    }
}
