/// Prefix yt-dlp prints for every tick when run with our `--progress-template`
pub const PROGRESS_PREFIX: &str = "progress:";

/// Template passed to yt-dlp so each tick is one parseable line
pub fn progress_template() -> String {
    format!("{PROGRESS_PREFIX}%(progress._percent_str)s")
}

/// Extract a percentage from an engine output line.
///
/// Understands our template (`progress: 42.1%`) and yt-dlp's default
/// `[download]  42.1% of ...` lines. Returns `None` for everything else,
/// including `NA` percentages.
pub fn parse_progress_from_line(line: &str) -> Option<f32> {
    let line = line.trim();
    let token = if let Some(rest) = line.strip_prefix(PROGRESS_PREFIX) {
        rest.trim()
    } else if let Some(rest) = line.strip_prefix("[download]") {
        rest.split_whitespace().next()?
    } else {
        return None;
    };
    let number = token.strip_suffix('%')?;
    let value = number.trim().parse::<f32>().ok()?;
    value.is_finite().then_some(value)
}

/// Clamp an engine-reported percentage into a whole 0–100 value.
pub fn to_percent(value: f32) -> u8 {
    if value.is_nan() {
        return 0;
    }
    value.clamp(0.0, 100.0).floor() as u8
}

/// Folds yt-dlp's per-stream progress into one rising percentage.
///
/// A merged format downloads video and audio one after the other, each
/// running 0 to 100 behind its own `[download] Destination:` line. Each
/// stream gets an equal share and only increases are reported.
#[derive(Debug, Clone)]
pub struct StreamProgress {
    streams: u32,
    started: u32,
    max_reported: Option<f32>,
}

impl StreamProgress {
    pub fn new(streams: u32) -> Self {
        Self {
            streams: streams.max(1),
            started: 0,
            max_reported: None,
        }
    }

    /// Inspect one stdout line. Returns the overall percentage when the
    /// line moves it forward.
    pub fn observe(&mut self, line: &str) -> Option<f32> {
        let line = line.trim();
        if line.starts_with("[download] Destination:") {
            self.started += 1;
            return None;
        }
        if line.starts_with("[Merger]") {
            return self.advance(99.0);
        }
        let pct = parse_progress_from_line(line)?;
        let index = self.started.saturating_sub(1).min(self.streams - 1);
        let share = 100.0 / self.streams as f32;
        self.advance(index as f32 * share + pct.clamp(0.0, 100.0) * share / 100.0)
    }

    fn advance(&mut self, overall: f32) -> Option<f32> {
        if self.max_reported.is_some_and(|max| overall <= max) {
            return None;
        }
        self.max_reported = Some(overall);
        Some(overall)
    }
}
