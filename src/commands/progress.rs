// ABOUTME: Terminal progress display for sync runs
// ABOUTME: Renders SyncEvents as indicatif progress bars, one per table phase

use indicatif::{ProgressBar, ProgressStyle};

use crate::sync::{Phase, ProgressSink, SyncEvent, TableStatus};

/// Shows one progress bar per running phase and a status line per table.
pub struct TerminalProgress {
    bar: Option<(Phase, ProgressBar)>,
    style: ProgressStyle,
}

impl TerminalProgress {
    pub fn new() -> Self {
        let style = ProgressStyle::with_template(
            "{prefix:>12} [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ");
        Self { bar: None, style }
    }

    fn finish_bar(&mut self) {
        if let Some((_, bar)) = self.bar.take() {
            bar.finish_and_clear();
        }
    }
}

impl Default for TerminalProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for TerminalProgress {
    fn on_event(&mut self, event: &SyncEvent) {
        match event {
            SyncEvent::TableStatus {
                table,
                index,
                total,
                status,
            } => {
                self.finish_bar();
                let marker = match status {
                    TableStatus::Syncing => "→",
                    TableStatus::Success => "✓",
                    TableStatus::Error => "✗",
                };
                println!("[{}/{}] {} {} {}", index, total, marker, table, status.as_str());
            }
            SyncEvent::Progress {
                table,
                phase,
                current,
                total,
                ..
            } => {
                let same_phase = matches!(&self.bar, Some((p, _)) if p == phase);
                if !same_phase {
                    self.finish_bar();
                    let bar = ProgressBar::new(*total);
                    bar.set_style(self.style.clone());
                    bar.set_prefix(phase.to_string());
                    bar.set_message(table.clone());
                    self.bar = Some((*phase, bar));
                }
                if let Some((_, bar)) = &self.bar {
                    bar.set_position(*current);
                    if current >= total {
                        bar.finish_and_clear();
                    }
                }
            }
        }
    }
}

impl Drop for TerminalProgress {
    fn drop(&mut self) {
        self.finish_bar();
    }
}
