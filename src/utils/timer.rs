//! Timing helpers for suites and pipeline stages

use std::time::{Duration, Instant};

/// Simple timer for measuring elapsed time
#[derive(Debug)]
pub struct Timer {
    start: Instant,
    label: String,
}

impl Timer {
    /// Create and start a new timer
    pub fn start(label: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            label: label.into(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed().as_millis() as u64
    }

    /// Stop the timer and log the elapsed time
    pub fn stop(self) -> Duration {
        let elapsed = self.elapsed();
        tracing::debug!("{}: {}ms", self.label, elapsed.as_millis());
        elapsed
    }
}

/// Stopwatch with lap timing
#[derive(Debug)]
pub struct Stopwatch {
    start: Instant,
    last: Instant,
    laps: Vec<(String, Duration)>,
}

impl Stopwatch {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last: now,
            laps: Vec::new(),
        }
    }

    /// Close the current lap and return its duration
    pub fn lap(&mut self, label: impl Into<String>) -> Duration {
        let now = Instant::now();
        let lap = now - self.last;
        self.last = now;
        self.laps.push((label.into(), lap));
        lap
    }

    /// Start the next lap without recording the time since the last one
    pub fn reset_lap(&mut self) {
        self.last = Instant::now();
    }

    pub fn total(&self) -> Duration {
        self.start.elapsed()
    }

    /// Individual lap durations in order
    pub fn laps(&self) -> &[(String, Duration)] {
        &self.laps
    }

    /// Format laps as string
    pub fn format(&self) -> String {
        let mut output = String::new();
        for (label, duration) in &self.laps {
            output.push_str(&format!("{}: {}ms\n", label, duration.as_millis()));
        }
        output.push_str(&format!("Total: {}ms", self.total().as_millis()));
        output
    }
}

impl Default for Stopwatch {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn test_timer() {
        let timer = Timer::start("test");
        sleep(Duration::from_millis(10));
        assert!(timer.elapsed_ms() >= 10);
        assert!(timer.stop() >= Duration::from_millis(10));
    }

    #[test]
    fn test_stopwatch_laps_are_not_cumulative() {
        let mut sw = Stopwatch::new();
        sleep(Duration::from_millis(10));
        let first = sw.lap("first");
        sleep(Duration::from_millis(10));
        sw.lap("second");

        assert_eq!(sw.laps().len(), 2);
        assert!(first >= Duration::from_millis(10));
        assert!(sw.laps()[1].1 < sw.total());
        assert!(sw.format().ends_with("ms"));
    }
}
