//! Cookie sources: resolving a task's cookie choice and managing the
//! directory of uploaded cookie files.

use std::{
    fs,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::error::CookieError;
use crate::event::{EventSink, NoticeLevel};
use crate::model::CookieChoice;

/// Files at or below this size are treated as empty
pub const MIN_COOKIE_BYTES: u64 = 10;

const COOKIE_EXTENSION: &str = "txt";

/// What the engine should do about cookies for one task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedCookie {
    /// No explicit file; the engine tries to read cookies from a browser
    Browser,
    /// No cookies at all
    None,
    /// A validated cookie file
    File(PathBuf),
}

/// Validate `choice` and describe the decision on `events`.
///
/// Only an explicit file can fail; missing or empty files are reported as an
/// error notice and returned so the caller can abort that task.
pub fn resolve(choice: &CookieChoice, events: &EventSink) -> Result<ResolvedCookie, CookieError> {
    match choice {
        CookieChoice::Auto => {
            events.notice(NoticeLevel::Info, "Using cookies from the installed browser");
            Ok(ResolvedCookie::Browser)
        }
        CookieChoice::None => {
            events.notice(NoticeLevel::Info, "Downloading without cookies");
            Ok(ResolvedCookie::None)
        }
        CookieChoice::File(path) => match validate_cookie_file(path) {
            Ok(()) => {
                events.notice(
                    NoticeLevel::Info,
                    format!("Using cookie file: {}", file_name(path)),
                );
                Ok(ResolvedCookie::File(path.clone()))
            }
            Err(err) => {
                events.notice(NoticeLevel::Error, err.to_string());
                Err(err)
            }
        },
    }
}

fn validate_cookie_file(path: &Path) -> Result<(), CookieError> {
    match fs::metadata(path) {
        Ok(meta) if !meta.is_file() => Err(CookieError::Missing(path.to_path_buf())),
        Ok(meta) if meta.len() <= MIN_COOKIE_BYTES => Err(CookieError::Empty(path.to_path_buf())),
        Ok(_) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            Err(CookieError::Missing(path.to_path_buf()))
        }
        Err(source) => Err(CookieError::Filesystem {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// A cookie file in the managed directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieSource {
    pub name: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub modified_at: DateTime<Local>,
}

impl CookieSource {
    /// Label used by selection lists: `name (N bytes, YYYY-MM-DD)`
    pub fn describe(&self) -> String {
        format!(
            "{} ({} bytes, {})",
            self.name,
            self.size_bytes,
            self.modified_at.format("%Y-%m-%d")
        )
    }
}

#[derive(Debug, Default)]
struct StoreState {
    sources: Vec<CookieSource>,
    active: CookieChoice,
}

/// The managed cookie directory plus the currently selected choice.
///
/// Reads take a snapshot; `select`, `upload` and `delete` hold the state lock
/// for their whole duration so directory rescans never interleave.
pub struct CookieStore {
    dir: PathBuf,
    state: Mutex<StoreState>,
    events: EventSink,
}

impl CookieStore {
    pub fn open(dir: impl Into<PathBuf>, events: EventSink) -> Result<Self, CookieError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| CookieError::Filesystem {
            path: dir.clone(),
            source,
        })?;
        let sources = scan_dir(&dir)?;
        info!(dir = %dir.display(), count = sources.len(), "cookie store opened");
        Ok(Self {
            dir,
            state: Mutex::new(StoreState {
                sources,
                active: CookieChoice::Auto,
            }),
            events,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn sources(&self) -> Vec<CookieSource> {
        self.state.lock().sources.clone()
    }

    pub fn find(&self, name: &str) -> Option<CookieSource> {
        self.state
            .lock()
            .sources
            .iter()
            .find(|s| s.name == name)
            .cloned()
    }

    pub fn active(&self) -> CookieChoice {
        self.state.lock().active.clone()
    }

    pub fn select(&self, choice: CookieChoice) {
        let text = match &choice {
            CookieChoice::Auto => "Selected auto-get browser cookies".to_string(),
            CookieChoice::None => "Selected no cookie".to_string(),
            CookieChoice::File(path) => format!("Selected cookie file: {}", file_name(path)),
        };
        self.state.lock().active = choice;
        self.events.notice(NoticeLevel::Info, text);
    }

    /// Copy `source` into the managed directory without overwriting anything,
    /// rescan, and make the copy the active choice.
    pub fn upload(&self, source: &Path) -> Result<CookieSource, CookieError> {
        let mut state = self.state.lock();
        let copied = self.copy_in(source).and_then(|dest| {
            state.sources = scan_dir(&self.dir)?;
            match state.sources.iter().find(|s| s.path == dest) {
                Some(listed) => Ok((listed.clone(), true)),
                None => describe_path(&dest).map(|copy| (copy, false)),
            }
        });

        match copied {
            Ok((listed, true)) => {
                info!(file = %listed.path.display(), "cookie file uploaded");
                state.active = CookieChoice::File(listed.path.clone());
                self.events.notice(
                    NoticeLevel::Success,
                    format!("Cookie file uploaded successfully: {}", listed.name),
                );
                Ok(listed)
            }
            Ok((unlisted, false)) => {
                // copied, but only .txt files are offered for selection
                info!(file = %unlisted.path.display(), "cookie file uploaded");
                self.events.notice(
                    NoticeLevel::Warning,
                    format!(
                        "Cookie file uploaded but not listed (only .{COOKIE_EXTENSION} files are shown): {}",
                        unlisted.name
                    ),
                );
                Ok(unlisted)
            }
            Err(err) => {
                warn!(file = %source.display(), error = %err, "cookie upload failed");
                let text = match &err {
                    CookieError::Empty(_) => "Cookie file is empty".to_string(),
                    CookieError::TooSmall { size, .. } => {
                        format!("Cookie file is too small to be valid ({size} bytes)")
                    }
                    other => format!("Failed to upload cookie file: {other}"),
                };
                self.events.notice(NoticeLevel::Error, text);
                Err(err)
            }
        }
    }

    fn copy_in(&self, source: &Path) -> Result<PathBuf, CookieError> {
        let content = fs::read(source).map_err(|err| match err.kind() {
            std::io::ErrorKind::NotFound => CookieError::Missing(source.to_path_buf()),
            _ => CookieError::Filesystem {
                path: source.to_path_buf(),
                source: err,
            },
        })?;
        let text =
            String::from_utf8(content).map_err(|_| CookieError::NotText(source.to_path_buf()))?;
        if text.trim().is_empty() {
            return Err(CookieError::Empty(source.to_path_buf()));
        }
        if text.len() as u64 <= MIN_COOKIE_BYTES {
            return Err(CookieError::TooSmall {
                path: source.to_path_buf(),
                size: text.len() as u64,
            });
        }

        fs::create_dir_all(&self.dir).map_err(|err| CookieError::Filesystem {
            path: self.dir.clone(),
            source: err,
        })?;
        let dest = unique_destination(&self.dir, &file_name(source), Local::now());
        fs::copy(source, &dest).map_err(|err| CookieError::Filesystem {
            path: dest.clone(),
            source: err,
        })?;
        Ok(dest)
    }

    /// Remove the active cookie file and fall back to `Auto`.
    ///
    /// Returns `Ok(None)` when the active choice is not a file.
    pub fn delete(&self) -> Result<Option<PathBuf>, CookieError> {
        let mut state = self.state.lock();
        let CookieChoice::File(path) = state.active.clone() else {
            return Ok(None);
        };
        let name = file_name(&path);
        self.events.notice(
            NoticeLevel::Warning,
            format!("Deleting cookie file '{name}'"),
        );

        if let Err(source) = fs::remove_file(&path) {
            warn!(file = %path.display(), error = %source, "cookie delete failed");
            let err = CookieError::Filesystem {
                path: path.clone(),
                source,
            };
            self.events.notice(
                NoticeLevel::Error,
                format!("Failed to delete cookie file: {err}"),
            );
            return Err(err);
        }

        state.active = CookieChoice::Auto;
        info!(file = %path.display(), "cookie file deleted");
        match scan_dir(&self.dir) {
            Ok(sources) => state.sources = sources,
            Err(err) => {
                state.sources.retain(|s| s.path != path);
                self.refresh_failed(&err);
                return Err(err);
            }
        }
        self.events.notice(
            NoticeLevel::Success,
            format!("Cookie file deleted: {name}"),
        );
        Ok(Some(path))
    }

    /// Re-read the managed directory.
    pub fn rescan(&self) -> Result<Vec<CookieSource>, CookieError> {
        let mut state = self.state.lock();
        state.sources = scan_dir(&self.dir).inspect_err(|err| self.refresh_failed(err))?;
        Ok(state.sources.clone())
    }

    fn refresh_failed(&self, err: &CookieError) {
        warn!(dir = %self.dir.display(), error = %err, "cookie directory rescan failed");
        self.events.notice(
            NoticeLevel::Error,
            format!("Failed to refresh cookie list: {err}"),
        );
    }
}

/// Pick a name in `dir` for `file_name` that is not taken yet: the plain
/// name, then `stem_YYYYMMDD_HHMMSS.ext`, then that with `_N` appended.
fn unique_destination(dir: &Path, file_name: &str, now: DateTime<Local>) -> PathBuf {
    let plain = dir.join(file_name);
    if !plain.exists() {
        return plain;
    }
    let (stem, ext) = match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, format!(".{ext}")),
        _ => (file_name, String::new()),
    };
    let stamp = now.format("%Y%m%d_%H%M%S");
    let stamped = dir.join(format!("{stem}_{stamp}{ext}"));
    if !stamped.exists() {
        return stamped;
    }
    (1u32..)
        .map(|n| dir.join(format!("{stem}_{stamp}_{n}{ext}")))
        .find(|p| !p.exists())
        .unwrap_or(stamped)
}

fn scan_dir(dir: &Path) -> Result<Vec<CookieSource>, CookieError> {
    let fs_err = |source| CookieError::Filesystem {
        path: dir.to_path_buf(),
        source,
    };
    let mut sources = Vec::new();
    for entry in fs::read_dir(dir).map_err(fs_err)? {
        let entry = entry.map_err(fs_err)?;
        let path = entry.path();
        let is_txt = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(COOKIE_EXTENSION));
        if !is_txt {
            continue;
        }
        let Ok(meta) = entry.metadata() else { continue };
        if !meta.is_file() || meta.len() <= MIN_COOKIE_BYTES {
            continue;
        }
        sources.push(source_from(path, &meta));
    }
    sources.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(sources)
}

fn describe_path(path: &Path) -> Result<CookieSource, CookieError> {
    let meta = fs::metadata(path).map_err(|source| CookieError::Filesystem {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(source_from(path.to_path_buf(), &meta))
}

fn source_from(path: PathBuf, meta: &fs::Metadata) -> CookieSource {
    let modified_at = meta
        .modified()
        .map(DateTime::<Local>::from)
        .unwrap_or_else(|_| Local::now());
    CookieSource {
        name: file_name(&path),
        path,
        size_bytes: meta.len(),
        modified_at,
    }
}
