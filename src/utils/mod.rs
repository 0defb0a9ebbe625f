use crate::crawler::{CrawlEvent, ProgressSink};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::info;

/// A simple wall-clock timer for logging elapsed time.
pub struct Timer {
    label: String,
    start: Instant,
}

impl Timer {
    pub fn start(label: impl Into<String>) -> Self {
        let label = label.into();
        info!("⏱  Starting: {}", label);
        Self {
            label,
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        info!("⏱  Finished: {} (took {:.2?})", self.label, self.elapsed());
    }
}

/// Format a large integer with thousands separators.
pub fn fmt_number(n: i64) -> String {
    let s = n.abs().to_string();
    let mut result = String::new();
    for (i, ch) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(ch);
    }
    if n < 0 {
        result.push('-');
    }
    result.chars().rev().collect()
}

/// Score cell for terminal tables: two decimals, "—" when undefined.
pub fn fmt_score(v: Option<f64>) -> String {
    v.map(|x| format!("{:.2}", x)).unwrap_or_else(|| "—".to_string())
}

// ── Terminal progress ─────────────────────────────────────────────────────────

/// One progress bar per subject, stacked.
pub struct BarProgress {
    multi: MultiProgress,
    bars: Mutex<HashMap<String, ProgressBar>>,
}

impl BarProgress {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            bars: Mutex::new(HashMap::new()),
        }
    }

    fn style() -> ProgressStyle {
        ProgressStyle::with_template("{prefix:>12} [{bar:30}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ")
    }
}

impl Default for BarProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for BarProgress {
    fn emit(&self, event: CrawlEvent) {
        let Ok(mut bars) = self.bars.lock() else {
            return;
        };

        match event {
            CrawlEvent::SubjectStarted { user_name, pages } => {
                let bar = self.multi.add(ProgressBar::new(u64::from(pages)));
                bar.set_style(Self::style());
                bar.set_prefix(user_name.clone());
                bars.insert(user_name, bar);
            }
            CrawlEvent::PageFetched { user_name, posts, .. } => {
                if let Some(bar) = bars.get(&user_name) {
                    bar.set_message(format!("+{} posts", posts));
                    bar.inc(1);
                }
            }
            CrawlEvent::PageFailed {
                user_name,
                page,
                of,
                reason,
            } => {
                if let Some(bar) = bars.get(&user_name) {
                    bar.set_message(format!("page {}/{} failed: {}", page, of, reason));
                    bar.inc(1);
                }
            }
            CrawlEvent::SubjectCompleted {
                user_name,
                fetched_count,
            } => {
                if let Some(bar) = bars.remove(&user_name) {
                    bar.finish_with_message(format!("{} posts", fetched_count));
                }
            }
        }
    }
}
