//! Transformer backed by external command-line programs.
//!
//! Programs are spawned directly with argument vectors (no shell), stdin
//! closed, stderr captured for the failure message.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::kind::ToolKind;
use super::transformer::{TransformOutput, TransformRequest, Transformer};
use crate::config::ToolchainConfig;
use crate::error::ToolError;

/// Maximum stderr kept in an error message (4KB).
const MAX_STDERR: usize = 4 * 1024;

/// Runs ghostscript, poppler, ImageMagick and LibreOffice.
#[derive(Debug, Clone, Default)]
pub struct CommandTransformer {
    toolchain: ToolchainConfig,
}

impl CommandTransformer {
    pub fn new(toolchain: ToolchainConfig) -> Self {
        Self { toolchain }
    }

    /// Program and arguments for a single-output tool.
    fn command_for(&self, req: &TransformRequest) -> (String, Vec<OsString>) {
        let out = req.output.as_os_str().to_owned();
        let first = || req.inputs[0].as_os_str().to_owned();
        let tc = &self.toolchain;

        match req.kind {
            ToolKind::Merge => {
                let mut args: Vec<OsString> =
                    req.inputs.iter().map(|p| p.as_os_str().to_owned()).collect();
                args.push(out);
                (tc.pdfunite.clone(), args)
            }
            ToolKind::ImagesToPdf => {
                let mut args: Vec<OsString> =
                    req.inputs.iter().map(|p| p.as_os_str().to_owned()).collect();
                args.push(out);
                (tc.imagemagick.clone(), args)
            }
            ToolKind::Compress => {
                let mut args = os_args(&[
                    "-dSAFER",
                    "-sDEVICE=pdfwrite",
                    "-dCompatibilityLevel=1.4",
                    "-dPDFSETTINGS=/screen",
                    "-dNOPAUSE",
                    "-dQUIET",
                    "-dBATCH",
                ]);
                args.push(output_flag(&req.output));
                args.push(first());
                (tc.ghostscript.clone(), args)
            }
            ToolKind::Pdfa => {
                let mut args = os_args(&[
                    "-dPDFA=2",
                    "-dBATCH",
                    "-dNOPAUSE",
                    "-dQUIET",
                    "-sDEVICE=pdfwrite",
                    "-dPDFACompatibilityPolicy=1",
                    "-sColorConversionStrategy=UseDeviceIndependentColor",
                ]);
                args.push(output_flag(&req.output));
                if let Some(def) = &tc.pdfa_def {
                    args.push(def.as_os_str().to_owned());
                }
                args.push(first());
                (tc.ghostscript.clone(), args)
            }
            ToolKind::DocxToPdf => {
                let mut args = os_args(&["--headless", "--convert-to", "pdf", "--outdir"]);
                args.push(req.work_dir.as_os_str().to_owned());
                args.push(first());
                (tc.soffice.clone(), args)
            }
            ToolKind::Rasterize => {
                let mut args = os_args(&["-jpeg"]);
                args.push(first());
                args.push(req.work_dir.join("page").into_os_string());
                (tc.pdftoppm.clone(), args)
            }
            ToolKind::Split => {
                let mut args = vec![first()];
                args.push(req.work_dir.join("page_%d.pdf").into_os_string());
                (tc.pdfseparate.clone(), args)
            }
        }
    }
}

#[async_trait]
impl Transformer for CommandTransformer {
    async fn transform(&self, request: &TransformRequest) -> Result<TransformOutput, ToolError> {
        request.kind.check_inputs(request.inputs.len())?;

        let (program, args) = self.command_for(request);
        run(&program, &args).await?;

        if request.kind.produces_archive() {
            return Ok(TransformOutput::Pages(list_pages(&request.work_dir).await?));
        }
        match request.kind {
            // LibreOffice names its output after the input stem.
            ToolKind::DocxToPdf => {
                let stem = request.inputs[0]
                    .file_stem()
                    .map(|s| s.to_os_string())
                    .unwrap_or_default();
                let mut produced = request.work_dir.join(stem);
                produced.set_extension("pdf");
                Ok(TransformOutput::File(produced))
            }
            _ => Ok(TransformOutput::File(request.output.clone())),
        }
    }
}

/// Spawn a program and wait for it, mapping failure to `ToolError`.
async fn run(program: &str, args: &[OsString]) -> Result<(), ToolError> {
    debug!(program, args = ?args, "Running transformation command");

    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| ToolError::Spawn {
            program: program.to_string(),
            reason: e.to_string(),
        })?;

    if output.status.success() {
        Ok(())
    } else {
        Err(ToolError::NonZeroExit {
            program: program.to_string(),
            code: output.status.code().unwrap_or(-1),
            stderr: truncate_stderr(&String::from_utf8_lossy(&output.stderr)),
        })
    }
}

/// Files in the scratch directory, ordered by page number.
async fn list_pages(dir: &Path) -> Result<Vec<PathBuf>, ToolError> {
    let mut pages = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            pages.push(entry.path());
        }
    }
    pages.sort_by_key(|p| (page_number(p), p.clone()));
    Ok(pages)
}

/// Trailing number in a file stem (`page-12` → 12, `page_3` → 3).
fn page_number(path: &Path) -> u64 {
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("");
    let digits: String = stem
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    digits.parse().unwrap_or(u64::MAX)
}

fn os_args(args: &[&str]) -> Vec<OsString> {
    args.iter().map(OsString::from).collect()
}

fn output_flag(path: &Path) -> OsString {
    let mut flag = OsString::from("-sOutputFile=");
    flag.push(path.as_os_str());
    flag
}

fn truncate_stderr(s: &str) -> String {
    let s = s.trim();
    if s.len() <= MAX_STDERR {
        return s.to_string();
    }
    let mut end = MAX_STDERR;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}
