//! The closed set of transformation tools.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ToolError;

/// A named transformation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolKind {
    /// Concatenate PDFs in the given order.
    Merge,
    /// Recompress a PDF for screen resolution.
    Compress,
    /// Convert a PDF to archival PDF/A-2.
    Pdfa,
    /// Render each page of a PDF as a JPEG.
    Rasterize,
    /// Combine images into one PDF, one image per page.
    ImagesToPdf,
    /// Convert a word-processor document to PDF.
    DocxToPdf,
    /// One PDF per page.
    Split,
}

/// How many inputs a tool accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    One,
    Many,
}

impl ToolKind {
    pub const ALL: [ToolKind; 7] = [
        Self::Merge,
        Self::Compress,
        Self::Pdfa,
        Self::Rasterize,
        Self::ImagesToPdf,
        Self::DocxToPdf,
        Self::Split,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Merge => "merge",
            Self::Compress => "compress",
            Self::Pdfa => "pdfa",
            Self::Rasterize => "rasterize",
            Self::ImagesToPdf => "images-to-pdf",
            Self::DocxToPdf => "docx-to-pdf",
            Self::Split => "split",
        }
    }

    pub fn arity(&self) -> Arity {
        match self {
            Self::Merge | Self::ImagesToPdf => Arity::Many,
            _ => Arity::One,
        }
    }

    /// Tools that emit one file per page and are bundled into an archive.
    pub fn produces_archive(&self) -> bool {
        matches!(self, Self::Rasterize | Self::Split)
    }

    /// Check the number of inputs against the tool's arity.
    pub fn check_inputs(&self, count: usize) -> Result<(), ToolError> {
        let ok = match self.arity() {
            Arity::One => count == 1,
            Arity::Many => count >= 1,
        };
        if ok {
            Ok(())
        } else {
            Err(ToolError::InputCount {
                tool: self.to_string(),
                expected: match self.arity() {
                    Arity::One => "exactly one",
                    Arity::Many => "at least one",
                },
                got: count,
            })
        }
    }

    /// Deterministic artifact name for a session.
    ///
    /// `first_input` is the original name of the first uploaded input; the
    /// session id is always embedded so names never collide across sessions.
    pub fn output_name(&self, first_input: &str, session_id: Uuid) -> String {
        let stem = sanitize_stem(first_input);
        match self {
            Self::Merge => format!("merged_{session_id}.pdf"),
            Self::ImagesToPdf => format!("converted_{session_id}.pdf"),
            Self::Compress => format!("{stem}_compressed_{session_id}.pdf"),
            Self::Pdfa => format!("{stem}_pdfa_{session_id}.pdf"),
            Self::DocxToPdf => format!("{stem}_{session_id}.pdf"),
            Self::Rasterize => format!("{stem}_jpg_{session_id}.zip"),
            Self::Split => format!("{stem}_split_{session_id}.zip"),
        }
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolKind {
    type Err = ToolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == wanted)
            .ok_or_else(|| ToolError::UnknownTool(s.to_string()))
    }
}

/// File stem reduced to `[A-Za-z0-9_-]`, capped at 64 chars.
fn sanitize_stem(name: &str) -> String {
    let stem = match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => name,
    };
    let cleaned: String = stem
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .take(64)
        .collect();
    if cleaned.trim_matches('_').is_empty() {
        "document".to_string()
    } else {
        cleaned
    }
}
