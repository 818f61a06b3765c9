//! Progress reporting for downloads and flash writes

use crate::log_panel::LogSink;

/// Progress update callback
pub trait ProgressSink {
    /// `done` out of `total` units of the current operation are complete
    fn on_progress(&mut self, done: u64, total: u64);
}

impl ProgressSink for Vec<(u64, u64)> {
    fn on_progress(&mut self, done: u64, total: u64) {
        self.push((done, total));
    }
}

/// Whole percentage of `done` out of `total`, rounded down and capped at 100
pub fn percent(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }

    let percent = (u128::from(done) * 100 / u128::from(total)).min(100);
    percent as u8
}

/// Writes progress to a log panel as `"{label}: {n}%"`, skipping repeated
/// percentages
pub struct PercentLogger<'a, L: LogSink + ?Sized> {
    log: &'a mut L,
    label: &'static str,
    last: Option<u8>,
}

impl<'a, L: LogSink + ?Sized> PercentLogger<'a, L> {
    pub fn new(log: &'a mut L, label: &'static str) -> Self {
        Self {
            log,
            label,
            last: None,
        }
    }
}

impl<L: LogSink + ?Sized> ProgressSink for PercentLogger<'_, L> {
    fn on_progress(&mut self, done: u64, total: u64) {
        let percent = percent(done, total);
        if self.last == Some(percent) {
            return;
        }

        self.last = Some(percent);
        self.log
            .append_line(format!("{}: {percent}%", self.label).into());
    }
}
