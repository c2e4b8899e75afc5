use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::Duration;

// Progress of a full scan over the unspent set, whose size is not known up front
pub struct ScanOutput {
    bar: ProgressBar,
}

impl ScanOutput {
    pub fn new(visible: bool) -> Self {
        let bar = ProgressBar::new_spinner();
        if visible {
            bar.set_style(
                ProgressStyle::default_spinner()
                    .template("{spinner:.green} [{elapsed_precise}] {pos} records {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            bar.enable_steady_tick(Duration::from_millis(200));
        } else {
            bar.set_draw_target(ProgressDrawTarget::hidden());
        }

        Self { bar }
    }

    pub fn inc_scanned(&self, count: u64) {
        self.bar.inc(count);
    }

    pub fn set_message(&self, msg: &str) {
        self.bar.set_message(msg.to_string());
    }

    pub fn scanned(&self) -> u64 {
        self.bar.position()
    }

    pub fn finish(&self, msg: &str) {
        self.bar.finish_with_message(msg.to_string());
    }
}
