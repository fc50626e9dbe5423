//! Progress rendering for background transfers
//!
//! One bar per task inside a shared `MultiProgress`, driven entirely by the
//! scheduler's event stream.

use std::collections::HashMap;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use loft_core::{TaskId, TransferEvent};

use super::OutputConfig;

/// Draws transfer events as progress bars
///
/// In quiet, JSON or no-progress mode, nothing is drawn.
pub struct TransferProgress {
    multi: Option<MultiProgress>,
    bars: HashMap<TaskId, ProgressBar>,
    style: ProgressStyle,
}

impl TransferProgress {
    pub fn new(config: &OutputConfig) -> Self {
        let multi = config.shows_progress().then(MultiProgress::new);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} {prefix:30!} [{bar:30.cyan/blue}] {msg}")
            .expect("valid template")
            .progress_chars("#>-");

        Self {
            multi,
            bars: HashMap::new(),
            style,
        }
    }

    /// Check if progress bars are drawn
    pub fn is_visible(&self) -> bool {
        self.multi.is_some()
    }

    /// Apply one event to the bars
    pub fn apply(&mut self, event: &TransferEvent) {
        let Some(multi) = &self.multi else {
            return;
        };

        match event {
            TransferEvent::Updated {
                id,
                key,
                percent,
                status,
                ..
            } => {
                let bar = self.bars.entry(*id).or_insert_with(|| {
                    let bar = multi.add(ProgressBar::new(100));
                    bar.set_style(self.style.clone());
                    bar.set_prefix(loft_core::path::display_name(key).to_string());
                    bar
                });
                if *percent >= 0 {
                    bar.set_position(*percent as u64);
                }
                bar.set_message(status.clone());
            }
            TransferEvent::Completed { id, .. } => {
                if let Some(bar) = self.bars.get(id) {
                    bar.finish();
                }
            }
            TransferEvent::Failed { id, message } => {
                if let Some(bar) = self.bars.get(id) {
                    bar.abandon_with_message(format!("Failed: {message}"));
                }
            }
            TransferEvent::Cancelled { id, .. } => {
                if let Some(bar) = self.bars.get(id) {
                    bar.abandon_with_message(loft_core::transfer::status::CANCELLED);
                }
            }
        }
    }

    /// Print a line above the bars without tearing them
    pub fn println(&self, line: &str) {
        match &self.multi {
            Some(multi) => {
                let _ = multi.println(line);
            }
            None => println!("{line}"),
        }
    }
}
