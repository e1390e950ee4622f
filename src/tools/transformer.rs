//! The transformation contract every tool runs through.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::kind::ToolKind;
use crate::error::ToolError;

/// One transformation to perform.
#[derive(Debug, Clone)]
pub struct TransformRequest {
    pub kind: ToolKind,
    /// Input paths in caller-declared order.
    pub inputs: Vec<PathBuf>,
    /// Where a single-file result must be written.
    pub output: PathBuf,
    /// Empty scratch directory for per-page results.
    pub work_dir: PathBuf,
}

/// What a transformation produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransformOutput {
    /// A single file (normally `request.output`).
    File(PathBuf),
    /// Per-page files, in page order, to be bundled into an archive.
    Pages(Vec<PathBuf>),
}

impl TransformOutput {
    /// Verify every produced file exists and is non-empty.
    pub async fn verify(&self, kind: ToolKind) -> Result<(), ToolError> {
        let paths: &[PathBuf] = match self {
            Self::File(path) => std::slice::from_ref(path),
            Self::Pages(paths) if paths.is_empty() => {
                return Err(ToolError::MissingOutput {
                    tool: kind.to_string(),
                    path: PathBuf::new(),
                });
            }
            Self::Pages(paths) => paths,
        };
        for path in paths {
            if !is_non_empty_file(path).await {
                return Err(ToolError::MissingOutput {
                    tool: kind.to_string(),
                    path: path.clone(),
                });
            }
        }
        Ok(())
    }
}

/// Performs a named transformation.
///
/// Implementations may spawn processes or work in-process; the call may be
/// long-running and is awaited from a background job.
#[async_trait]
pub trait Transformer: Send + Sync {
    async fn transform(&self, request: &TransformRequest) -> Result<TransformOutput, ToolError>;
}

async fn is_non_empty_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}
