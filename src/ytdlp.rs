use std::{
    collections::VecDeque,
    fs, io,
    path::{Path, PathBuf},
    process::Stdio,
};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use rust_embed::RustEmbed;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::Command,
};
use tracing::debug;

use crate::config::EngineConfig;
use crate::cookies::ResolvedCookie;
use crate::engine::{Engine, EngineOutput, EngineRequest};
use crate::error::EngineError;
use crate::progress::{StreamProgress, parse_progress_from_line, progress_template};

#[derive(RustEmbed)]
#[folder = "assets/"]
struct Asset;

/// stderr lines kept for error translation
const STDERR_TAIL_LINES: usize = 64;

const BIN_NAME: &str = if cfg!(target_os = "windows") { "yt-dlp.exe" } else { "yt-dlp" };

/// Browser yt-dlp can read cookies from, detected once per process
static DETECTED_BROWSER: Lazy<Option<&'static str>> = Lazy::new(detect_browser);

/// yt-dlp run as a child process, one per download
#[derive(Debug, Clone)]
pub struct YtDlpEngine {
    program: PathBuf,
    program_args: Vec<String>,
    extra_args: Vec<String>,
    browser: Option<String>,
}

impl YtDlpEngine {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            program_args: Vec::new(),
            extra_args: Vec::new(),
            browser: None,
        }
    }

    /// Arguments placed before yt-dlp's own, e.g. `-m yt_dlp` for a Python launcher
    pub fn with_program_args(mut self, args: Vec<String>) -> Self {
        self.program_args = args;
        self
    }

    /// Arguments appended after the generated ones
    pub fn with_extra_args(mut self, args: Vec<String>) -> Self {
        self.extra_args = args;
        self
    }

    /// Browser to read cookies from for `Auto`; detected when unset
    pub fn with_browser(mut self, browser: Option<String>) -> Self {
        self.browser = browser;
        self
    }

    /// Configured program, else the bundled binary, else `yt-dlp` on `PATH`.
    pub fn from_config(config: &EngineConfig) -> Result<Self, EngineError> {
        let program = match &config.program {
            Some(program) => program.clone(),
            None => locate()?,
        };
        Ok(Self::new(program)
            .with_program_args(config.program_args.clone())
            .with_extra_args(config.extra_args.clone())
            .with_browser(config.browser.clone()))
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn build_args(&self, request: &EngineRequest) -> Vec<String> {
        let output_template = request.destination_dir.join("%(title)s.%(ext)s");
        let mut args = self.program_args.clone();
        args.extend([
            "-f".to_owned(),
            request.quality.format_selector(),
            "--newline".to_owned(),
            "--progress-template".to_owned(),
            progress_template(),
            "-o".to_owned(),
            output_template.to_string_lossy().into_owned(),
        ]);

        match &request.cookie {
            ResolvedCookie::File(path) => {
                args.push("--cookies".to_owned());
                args.push(path.to_string_lossy().into_owned());
            }
            ResolvedCookie::Browser => {
                let browser = self.browser.as_deref().or(*DETECTED_BROWSER);
                if let Some(browser) = browser {
                    args.push("--cookies-from-browser".to_owned());
                    args.push(browser.to_owned());
                } else {
                    debug!("no browser found for cookie extraction");
                }
            }
            ResolvedCookie::None => args.push("--no-cookies".to_owned()),
        }

        args.extend(self.extra_args.iter().cloned());
        args.push("--".to_owned());
        args.push(request.url.clone());
        args
    }
}

#[async_trait]
impl Engine for YtDlpEngine {
    async fn download(&self, request: &EngineRequest, output: EngineOutput) -> Result<(), EngineError> {
        let args = self.build_args(request);
        debug!(program = %self.program.display(), ?args, "spawning yt-dlp");

        let mut cmd = Command::new(&self.program);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(windows)]
        {
            // keep a console window from popping up for every download
            const CREATE_NO_WINDOW: u32 = 0x0800_0000;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }

        let mut child = cmd.spawn().map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => EngineError::NotFound,
            _ => EngineError::Spawn(err),
        })?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("engine stdout not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| io::Error::other("engine stderr not captured"))?;

        let mut out_reader = BufReader::new(stdout);
        let mut err_reader = BufReader::new(stderr);
        // read_until keeps partial lines in these across select! polls
        let (mut out_buf, mut err_buf) = (Vec::new(), Vec::new());
        let (mut out_open, mut err_open) = (true, true);
        let mut tracker = StreamProgress::new(stream_count(request));
        let mut stderr_tail = VecDeque::with_capacity(STDERR_TAIL_LINES);

        while out_open || err_open {
            tokio::select! {
                read = out_reader.read_until(b'\n', &mut out_buf), if out_open => {
                    if read? == 0 {
                        out_open = false;
                    }
                    if let Some(line) = take_line(&mut out_buf) {
                        let is_tick = parse_progress_from_line(&line).is_some();
                        if let Some(pct) = tracker.observe(&line) {
                            output.progress(pct);
                        }
                        if !is_tick {
                            output.log(line);
                        }
                    }
                },
                read = err_reader.read_until(b'\n', &mut err_buf), if err_open => {
                    if read? == 0 {
                        err_open = false;
                    }
                    if let Some(line) = take_line(&mut err_buf) {
                        if stderr_tail.len() == STDERR_TAIL_LINES {
                            stderr_tail.pop_front();
                        }
                        stderr_tail.push_back(line.clone());
                        output.log(line);
                    }
                },
            }
        }

        let status = child.wait().await?;
        if status.success() {
            Ok(())
        } else {
            Err(EngineError::Exited {
                code: status.code(),
                stderr: Vec::from(stderr_tail).join("\n"),
            })
        }
    }
}

/// Drain one line from `buf`, decoding lossily; blank lines are dropped.
fn take_line(buf: &mut Vec<u8>) -> Option<String> {
    if buf.is_empty() {
        return None;
    }
    let line = String::from_utf8_lossy(&buf[..])
        .trim_end_matches(['\r', '\n'])
        .to_string();
    buf.clear();
    (!line.trim().is_empty()).then_some(line)
}

/// Streams yt-dlp will fetch one after another for this request
fn stream_count(request: &EngineRequest) -> u32 {
    let selector = request.quality.format_selector();
    let first = selector.split('/').next().unwrap_or_default();
    first.matches('+').count() as u32 + 1
}

fn locate() -> Result<PathBuf, EngineError> {
    if let Some(path) = extract_bundled()? {
        return Ok(path);
    }
    which::which(BIN_NAME).map_err(|_| EngineError::NotFound)
}

/// Write the embedded yt-dlp (if this build carries one) to the temp dir.
fn extract_bundled() -> Result<Option<PathBuf>, EngineError> {
    let Some(data) = Asset::get(BIN_NAME) else {
        return Ok(None);
    };
    let tmp = std::env::temp_dir().join(BIN_NAME);
    let stale = fs::metadata(&tmp)
        .map(|m| m.len() != data.data.len() as u64)
        .unwrap_or(true);
    if stale {
        fs::write(&tmp, &data.data)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&tmp, fs::Permissions::from_mode(0o755))?;
        }
    }
    Ok(Some(tmp))
}

fn detect_browser() -> Option<&'static str> {
    let mut candidates: Vec<(&'static str, PathBuf)> = Vec::new();

    #[cfg(target_os = "windows")]
    {
        if let Some(local) = dirs::data_local_dir() {
            candidates.push(("chrome", local.join("Google").join("Chrome").join("User Data")));
            candidates.push(("edge", local.join("Microsoft").join("Edge").join("User Data")));
            candidates.push((
                "brave",
                local.join("BraveSoftware").join("Brave-Browser").join("User Data"),
            ));
        }
        if let Some(roaming) = dirs::data_dir() {
            candidates.push(("firefox", roaming.join("Mozilla").join("Firefox").join("Profiles")));
        }
    }
    #[cfg(target_os = "macos")]
    {
        if let Some(home) = dirs::home_dir() {
            let support = home.join("Library").join("Application Support");
            candidates.push(("chrome", support.join("Google").join("Chrome")));
            candidates.push(("firefox", support.join("Firefox").join("Profiles")));
            candidates.push(("safari", home.join("Library").join("Safari")));
        }
    }
    #[cfg(all(unix, not(target_os = "macos")))]
    {
        if let Some(config) = dirs::config_dir() {
            candidates.push(("chrome", config.join("google-chrome")));
            candidates.push(("chromium", config.join("chromium")));
            candidates.push(("brave", config.join("BraveSoftware").join("Brave-Browser")));
            candidates.push(("edge", config.join("microsoft-edge")));
        }
        if let Some(home) = dirs::home_dir() {
            candidates.push(("firefox", home.join(".mozilla").join("firefox")));
        }
    }

    let found = candidates
        .into_iter()
        .find(|(_, dir)| dir.is_dir())
        .map(|(name, _)| name);
    debug!(browser = ?found, "browser cookie source detection");
    found
}
