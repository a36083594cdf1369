use std::path::PathBuf;
use thiserror::Error;

/// Rejected submission; no task is created.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("no URL given")]
    NoUrls,

    #[error("no save directory given")]
    NoDestination,
}

#[derive(Debug, Error)]
pub enum CookieError {
    #[error("cookie file missing: {}", .0.display())]
    Missing(PathBuf),

    #[error("cookie file empty: {}", .0.display())]
    Empty(PathBuf),

    #[error("cookie file too small ({size} bytes): {}", .path.display())]
    TooSmall { path: PathBuf, size: u64 },

    #[error("cookie file is not text: {}", .0.display())]
    NotText(PathBuf),

    #[error("cookie file operation failed on {}: {source}", .path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("download engine not found (install yt-dlp or set engine.program)")]
    NotFound,

    #[error("failed to start download engine: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("download engine failed (code={code:?}) {stderr}")]
    Exited { code: Option<i32>, stderr: String },

    #[error("download engine panicked: {0}")]
    Panicked(String),
}

impl EngineError {
    /// Short text suitable for the task's result column.
    pub fn user_message(&self) -> String {
        match self {
            EngineError::Exited { code, stderr } => translate_engine_stderr(stderr, *code),
            other => other.to_string(),
        }
    }
}

fn translate_engine_stderr(stderr: &str, code: Option<i32>) -> String {
    let lower = stderr.to_lowercase();

    let known = if lower.contains("http error 429") {
        Some("Too many requests (429). Try again later.")
    } else if lower.contains("sign in to confirm") || lower.contains("login required") {
        Some("Video requires login. Use browser cookies or a cookie file.")
    } else if lower.contains("could not find") && lower.contains("cookies database") {
        Some("Could not read browser cookies. Close the browser or upload a cookie file.")
    } else if lower.contains("http error 403") || lower.contains("forbidden") {
        Some("Access denied (403). The video may be private or region-restricted.")
    } else if lower.contains("private video") {
        Some("This video is private.")
    } else if lower.contains("geo") && lower.contains("block") {
        Some("Video restricted in your region.")
    } else if lower.contains("video unavailable") {
        Some("Video unavailable or removed.")
    } else if lower.contains("requested format") && lower.contains("not available") {
        Some("Requested quality is not available for this video.")
    } else if lower.contains("timed out") || lower.contains("timeout") {
        Some("Connection timed out. Check your network and try again.")
    } else if lower.contains("ffmpeg") && (lower.contains("not found") || lower.contains("not installed")) {
        Some("FFmpeg not found. Install FFmpeg to merge video and audio.")
    } else if lower.contains("unsupported url") {
        Some("Unsupported URL. Check that the link is correct.")
    } else {
        None
    };
    if let Some(msg) = known {
        return msg.to_string();
    }

    let last_error = stderr
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| l.to_ascii_lowercase().starts_with("error:"))
        .map(|l| l["error:".len()..].trim());

    match last_error {
        Some(msg) if !msg.is_empty() => msg.to_string(),
        _ => {
            let trimmed = stderr.trim();
            if trimmed.is_empty() {
                format!("Download engine exited with code {code:?}")
            } else {
                trimmed.chars().take(300).collect()
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Cookie(#[from] CookieError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, Error>;
