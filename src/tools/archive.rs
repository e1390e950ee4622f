//! Bundles per-page outputs into a single zip archive.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::ToolError;

/// Write `files` into a zip at `dest`, stored flat under their file names.
///
/// Runs on the blocking pool; zip writing is synchronous.
pub async fn bundle(files: Vec<PathBuf>, dest: PathBuf) -> Result<(), ToolError> {
    tokio::task::spawn_blocking(move || bundle_sync(&files, &dest))
        .await
        .map_err(|e| ToolError::Archive(format!("archive task failed: {e}")))?
}

fn bundle_sync(files: &[PathBuf], dest: &Path) -> Result<(), ToolError> {
    let mut zip = ZipWriter::new(BufWriter::new(File::create(dest)?));
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    for path in files {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| ToolError::Archive(format!("bad file name: {}", path.display())))?;
        zip.start_file(name, options)
            .map_err(|e| ToolError::Archive(e.to_string()))?;
        let bytes = std::fs::read(path)?;
        zip.write_all(&bytes)?;
    }

    let mut writer = zip.finish().map_err(|e| ToolError::Archive(e.to_string()))?;
    writer.flush()?;
    Ok(())
}
