//! Command line front-end for the cyberdl downloader

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    process::ExitCode,
    sync::Arc,
};

use anyhow::{Context, bail};
use chrono::Local;
use clap::{Args, Parser, Subcommand};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tracing::{info, warn};

use cyberdl::{
    AppConfig, CookieChoice, CookieStore, Event, EventSink, MemoryHistory, NoticeLevel, Observer,
    Orchestrator, Quality, TaskId, TaskStatus, YtDlpEngine, config::DEFAULT_CONFIG_FILE,
    logging::init_logging,
};

/// Folder used when neither the command line nor the config names one
const FALLBACK_DOWNLOAD_DIR: &str = "./downloads";

#[derive(Parser)]
#[command(name = "cyberdl", version, about = "Download videos concurrently with yt-dlp")]
struct Cli {
    /// Configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Download one or more URLs in parallel
    Download(DownloadArgs),
    /// Manage the cookie directory
    #[command(subcommand)]
    Cookies(CookiesCommand),
}

#[derive(Args)]
struct DownloadArgs {
    /// Video URLs
    urls: Vec<String>,

    /// Read more URLs from a file, one per line
    #[arg(short = 'i', long = "batch-file")]
    batch_file: Option<PathBuf>,

    /// Save directory
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// best, 1080, 720, 480 or 360
    #[arg(short, long)]
    quality: Option<Quality>,

    /// auto, none, a cookie file path, or a file name in the cookie directory
    #[arg(long, default_value = "auto")]
    cookie: CookieChoice,

    /// Print engine output lines
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum CookiesCommand {
    /// List usable cookie files
    List,
    /// Copy a cookie file into the cookie directory
    Upload { file: PathBuf },
    /// Delete a cookie file from the cookie directory
    Delete { name: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let config = AppConfig::load(&cli.config)?;
    // Keep the guard alive so file logs are flushed on exit
    let _log_guard = init_logging(&config.log);

    match cli.command {
        Command::Download(args) => download(&config, args).await,
        Command::Cookies(cmd) => cookies(&config, cmd).map(|()| ExitCode::SUCCESS),
    }
}

/// Run every URL to completion; Ctrl-C cancels whatever is still running
async fn download(config: &AppConfig, args: DownloadArgs) -> anyhow::Result<ExitCode> {
    let mut urls = args.urls.clone();
    if let Some(batch) = &args.batch_file {
        urls.extend(read_batch_file(batch)?);
    }

    let destination = args
        .output
        .clone()
        .or_else(|| config.download.dir.clone())
        .unwrap_or_else(|| PathBuf::from(FALLBACK_DOWNLOAD_DIR));
    let quality = args.quality.unwrap_or(config.download.quality);
    let cookie = locate_cookie(args.cookie.clone(), &config.cookies.dir);

    let engine = Arc::new(YtDlpEngine::from_config(&config.engine)?);
    info!(program = %engine.program().display(), "using download engine");

    let history = Arc::new(MemoryHistory::new());
    let observer = Arc::new(ConsoleObserver::new(args.verbose));
    let orchestrator = Orchestrator::new(Handle::current(), engine, observer, history.clone());

    let tasks = orchestrator.submit(urls, &destination, quality, cookie)?;
    println!(
        "Queued {} download(s) to {} at {}",
        tasks.len(),
        destination.display(),
        quality
    );

    tokio::select! {
        _ = orchestrator.wait_idle() => {}
        _ = tokio::signal::ctrl_c() => {
            let n = orchestrator.cancel_all();
            warn!(count = n, "interrupted, cancelling downloads");
            orchestrator.wait_idle().await;
        }
    }

    // Summary table
    let tasks = orchestrator.tasks();
    for task in &tasks {
        println!(
            "{:>5}  {:<11}  {}  {}",
            task.id.to_string(),
            task.status.label(),
            task.url,
            task.result_note
        );
    }
    let failed = tasks.iter().filter(|t| t.status == TaskStatus::Failed).count();
    println!(
        "{} complete, {} failed ({} recorded in history)",
        tasks.len() - failed,
        failed,
        history.len()
    );

    Ok(if failed > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

fn cookies(config: &AppConfig, cmd: CookiesCommand) -> anyhow::Result<()> {
    let (sink, mut notices) = EventSink::channel();
    let store = CookieStore::open(&config.cookies.dir, sink)?;

    let result = match cmd {
        CookiesCommand::List => {
            let sources = store.sources();
            if sources.is_empty() {
                println!("No cookie files in {}", store.dir().display());
            }
            for source in sources {
                println!("{}", source.describe());
            }
            Ok(())
        }
        CookiesCommand::Upload { file } => store.upload(&file).map(|_| ()).map_err(Into::into),
        CookiesCommand::Delete { name } => match store.find(&name) {
            Some(source) => {
                store.select(CookieChoice::File(source.path));
                store.delete().map(|_| ()).map_err(Into::into)
            }
            None => Err(anyhow::anyhow!(
                "no cookie file named '{name}' in {}",
                store.dir().display()
            )),
        },
    };

    // Notices are queued synchronously by the store
    while let Ok(event) = notices.try_recv() {
        if let Event::CookieNotice { level, text } = event {
            print_notice(level, &text);
        }
    }
    result
}

/// Trimmed non-empty lines; `#` starts a comment line
fn read_batch_file(path: &Path) -> anyhow::Result<Vec<String>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read batch file {}", path.display()))?;
    let urls: Vec<String> = raw
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect();
    if urls.is_empty() {
        bail!("batch file {} contains no URLs", path.display());
    }
    Ok(urls)
}

/// A bare file name that only exists in the cookie directory refers to it
fn locate_cookie(choice: CookieChoice, cookie_dir: &Path) -> CookieChoice {
    match choice {
        CookieChoice::File(path) if !path.exists() && path.components().count() == 1 => {
            let managed = cookie_dir.join(&path);
            if managed.exists() {
                CookieChoice::File(managed)
            } else {
                CookieChoice::File(path)
            }
        }
        other => other,
    }
}

/// Log panel line: `[HH:MM:SS] <icon> text`
fn print_notice(level: NoticeLevel, text: &str) {
    println!("[{}] {} {}", Local::now().format("%H:%M:%S"), level.icon(), text);
}

/// Prints task events to stdout; progress only every ten percent
struct ConsoleObserver {
    verbose: bool,
    last_decile: Mutex<HashMap<TaskId, u8>>,
}

impl ConsoleObserver {
    fn new(verbose: bool) -> Self {
        Self {
            verbose,
            last_decile: Mutex::new(HashMap::new()),
        }
    }

    fn line(task: TaskId, text: std::fmt::Arguments<'_>) {
        println!("[{}] {task} {text}", Local::now().format("%H:%M:%S"));
    }
}

impl Observer for ConsoleObserver {
    fn on_event(&self, event: &Event) {
        match event {
            Event::CookieNotice { level, text } => print_notice(*level, text),
            Event::StatusChanged { task, status } => Self::line(*task, format_args!("{status}")),
            Event::Progress { task, percent } => {
                let decile = percent / 10;
                let mut last = self.last_decile.lock();
                if last.get(task).is_none_or(|d| *d < decile) {
                    last.insert(*task, decile);
                    Self::line(*task, format_args!("{percent:>3}%"));
                }
            }
            Event::LogLine { task, text } => {
                if self.verbose {
                    Self::line(*task, format_args!("| {text}"));
                }
            }
            Event::Finished { task } => {
                self.last_decile.lock().remove(task);
                Self::line(*task, format_args!("done"));
            }
            Event::Failed { task, kind, message } => {
                self.last_decile.lock().remove(task);
                Self::line(*task, format_args!("failed ({kind:?}): {message}"));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_file_skips_blanks_and_comments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("urls.txt");
        std::fs::write(&path, "  https://a.example/1  \n\n# skip\nhttps://b.example/2\n").unwrap();
        assert_eq!(
            read_batch_file(&path).unwrap(),
            vec!["https://a.example/1".to_string(), "https://b.example/2".to_string()]
        );
    }

    #[test]
    fn empty_batch_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("urls.txt");
        std::fs::write(&path, "\n   \n").unwrap();
        assert!(read_batch_file(&path).is_err());
    }

    #[test]
    fn bare_cookie_name_resolves_into_cookie_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("yt.txt"), "x").unwrap();
        assert_eq!(
            locate_cookie(CookieChoice::File("yt.txt".into()), dir.path()),
            CookieChoice::File(dir.path().join("yt.txt"))
        );
        assert_eq!(
            locate_cookie(CookieChoice::File("other.txt".into()), dir.path()),
            CookieChoice::File("other.txt".into())
        );
        assert_eq!(locate_cookie(CookieChoice::Auto, dir.path()), CookieChoice::Auto);
    }

    #[test]
    fn cli_parses_download_flags() {
        let cli = Cli::try_parse_from([
            "cyberdl", "download", "https://a.example/1", "-q", "720p", "--cookie", "none", "-o", "out",
        ])
        .unwrap();
        match cli.command {
            Command::Download(args) => {
                assert_eq!(args.urls, vec!["https://a.example/1"]);
                assert_eq!(args.quality, Some(Quality::P720));
                assert_eq!(args.cookie, CookieChoice::None);
                assert_eq!(args.output, Some(PathBuf::from("out")));
            }
            Command::Cookies(_) => panic!("expected download"),
        }
    }
}
