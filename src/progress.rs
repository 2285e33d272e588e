//! Progress reporting for shard writes and loads

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Progress reporter for freeze, thaw, compaction and snapshot writes.
///
/// The library default is [`ShardProgress::new_minimal`], which draws
/// nothing; the CLI asks for visible bars.
#[derive(Debug)]
pub struct ShardProgress {
    pub shards_pb: Option<ProgressBar>,
    pub replay_pb: Option<ProgressBar>,
    show_progress: bool,
    start_time: std::time::Instant,
}

impl ShardProgress {
    /// Visible progress for an operation over `total_shards` shards
    pub fn new_visible(total_shards: u64, message: &str) -> Self {
        Self {
            shards_pb: Some(create_progress_bar(total_shards, message)),
            replay_pb: None,
            show_progress: true,
            start_time: std::time::Instant::now(),
        }
    }

    /// Create minimal progress reporter (no progress bars)
    pub fn new_minimal() -> Self {
        Self {
            shards_pb: None,
            replay_pb: None,
            show_progress: false,
            start_time: std::time::Instant::now(),
        }
    }

    pub fn is_visible(&self) -> bool {
        self.show_progress
    }

    /// Total becomes known only once the manifest or row count is read
    pub fn set_total(&mut self, total_shards: u64) {
        if let Some(pb) = &self.shards_pb {
            pb.set_length(total_shards);
        }
    }

    pub fn shard_done(&mut self, file_name: &str) {
        if let Some(pb) = &self.shards_pb {
            pb.set_message(file_name.to_string());
            pb.inc(1);
        }
    }

    /// Change-log replay after a thaw
    pub fn start_replay(&mut self, entries: u64) {
        if self.show_progress && self.replay_pb.is_none() && entries > 0 {
            self.replay_pb = Some(create_spinner(&format!(
                "Replaying {} change-log entries...",
                entries
            )));
        }
    }

    pub fn finish(&mut self, message: &str) {
        let elapsed = self.start_time.elapsed();
        if let Some(pb) = self.replay_pb.take() {
            pb.finish_and_clear();
        }
        if let Some(pb) = self.shards_pb.take() {
            pb.finish_with_message(format!("{} in {:.1?}", message, elapsed));
        }
    }
}

impl Drop for ShardProgress {
    fn drop(&mut self) {
        if let Some(pb) = self.shards_pb.take() {
            pb.finish_and_clear();
        }
        if let Some(pb) = self.replay_pb.take() {
            pb.finish_and_clear();
        }
    }
}

/// Create a spinner progress bar
fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    let style = ProgressStyle::default_spinner()
        .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ")
        .template("{spinner:.green} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    pb.set_style(style);
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Create a progress bar with known total
fn create_progress_bar(total: u64, message: &str) -> ProgressBar {
    let pb = ProgressBar::new(total);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos:>5}/{len:5} shards {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    pb.set_style(style);
    pb.set_message(message.to_string());
    pb
}
