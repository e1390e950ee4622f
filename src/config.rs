//! Configuration types.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// Service configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Root directory holding one subdirectory per session.
    pub storage_root: PathBuf,
    /// Address the HTTP server binds to.
    pub bind_addr: SocketAddr,
    /// Sessions idle for longer than this are reclaimed by the reaper.
    pub session_ttl: Duration,
    /// How often the reaper sweeps.
    pub sweep_interval: Duration,
    /// Maximum number of transformations running at once.
    pub max_concurrent_jobs: usize,
    /// Request body limit for uploads.
    pub max_upload_bytes: usize,
    /// External programs used by the transformation tools.
    pub toolchain: ToolchainConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            storage_root: PathBuf::from("./data/uploads"),
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            session_ttl: Duration::from_secs(3600), // 1 hour
            sweep_interval: Duration::from_secs(1800), // 30 minutes
            max_concurrent_jobs: 4,
            max_upload_bytes: 100 * 1024 * 1024,
            toolchain: ToolchainConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Build a config from `PDF_SESSIONS_*` environment variables.
    ///
    /// Missing or unparsable values fall back to the defaults. When only the
    /// TTL is given, the sweep runs at half the TTL.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let storage_root = std::env::var("PDF_SESSIONS_STORAGE_ROOT")
            .map(PathBuf::from)
            .unwrap_or(defaults.storage_root);

        let bind_addr = env_parse::<SocketAddr>("PDF_SESSIONS_BIND_ADDR")
            .or_else(|| {
                env_parse::<u16>("PORT").map(|port| SocketAddr::from(([0, 0, 0, 0], port)))
            })
            .unwrap_or(defaults.bind_addr);

        let session_ttl = env_parse::<u64>("PDF_SESSIONS_TTL_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.session_ttl);

        let sweep_interval = env_parse::<u64>("PDF_SESSIONS_SWEEP_SECS")
            .map(Duration::from_secs)
            .unwrap_or(session_ttl / 2);

        Self {
            storage_root,
            bind_addr,
            session_ttl,
            sweep_interval,
            max_concurrent_jobs: env_parse("PDF_SESSIONS_MAX_JOBS")
                .unwrap_or(defaults.max_concurrent_jobs),
            max_upload_bytes: env_parse("PDF_SESSIONS_MAX_UPLOAD_BYTES")
                .unwrap_or(defaults.max_upload_bytes),
            toolchain: ToolchainConfig::from_env(),
        }
    }

    /// Reject values that would stall the worker pool or the reaper.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session_ttl.is_zero() {
            return Err(invalid("session_ttl", "must be greater than zero"));
        }
        if self.sweep_interval.is_zero() {
            return Err(invalid("sweep_interval", "must be greater than zero"));
        }
        if self.max_concurrent_jobs == 0 {
            return Err(invalid("max_concurrent_jobs", "must be at least 1"));
        }
        Ok(())
    }
}

/// Program names (or paths) of the external transformation binaries.
#[derive(Debug, Clone)]
pub struct ToolchainConfig {
    pub ghostscript: String,
    pub pdfunite: String,
    pub pdfseparate: String,
    pub pdftoppm: String,
    pub imagemagick: String,
    pub soffice: String,
    /// `PDFA_def.ps` passed to ghostscript for PDF/A conversion, if available.
    pub pdfa_def: Option<PathBuf>,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            ghostscript: "gs".to_string(),
            pdfunite: "pdfunite".to_string(),
            pdfseparate: "pdfseparate".to_string(),
            pdftoppm: "pdftoppm".to_string(),
            imagemagick: "convert".to_string(),
            soffice: "soffice".to_string(),
            pdfa_def: None,
        }
    }
}

impl ToolchainConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let var = |key: &str, fallback: String| std::env::var(key).unwrap_or(fallback);
        Self {
            ghostscript: var("PDF_SESSIONS_GS", defaults.ghostscript),
            pdfunite: var("PDF_SESSIONS_PDFUNITE", defaults.pdfunite),
            pdfseparate: var("PDF_SESSIONS_PDFSEPARATE", defaults.pdfseparate),
            pdftoppm: var("PDF_SESSIONS_PDFTOPPM", defaults.pdftoppm),
            imagemagick: var("PDF_SESSIONS_IMAGEMAGICK", defaults.imagemagick),
            soffice: var("PDF_SESSIONS_SOFFICE", defaults.soffice),
            pdfa_def: std::env::var("PDF_SESSIONS_PDFA_DEF").ok().map(PathBuf::from),
        }
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

fn invalid(key: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}
