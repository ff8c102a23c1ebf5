use std::time::Instant;

/// Traffic counters of one session.
#[derive(Debug, Clone)]
pub struct Stats {
    pub commands: u64,
    pub lines: u64,
    pub errors: u64,
    pub retries: u64,
    pub timeouts: u64,
    pub bytes_out: u64,
    pub bytes_in: u64,
    t0: Instant,
}

impl Stats {
    pub fn new() -> Self {
        Self {
            commands: 0,
            lines: 0,
            errors: 0,
            retries: 0,
            timeouts: 0,
            bytes_out: 0,
            bytes_in: 0,
            t0: Instant::now(),
        }
    }
    pub fn add_sent(&mut self, n: usize) {
        self.commands += 1;
        self.bytes_out += n as u64;
    }
    pub fn add_received(&mut self, n: usize) {
        self.bytes_in += n as u64;
    }
    pub fn inc_lines(&mut self, n: usize) {
        self.lines += n as u64;
    }
    pub fn inc_errors(&mut self) {
        self.errors += 1;
    }
    pub fn inc_retries(&mut self) {
        self.retries += 1;
    }
    pub fn inc_timeouts(&mut self) {
        self.timeouts += 1;
    }

    pub fn log_summary(&self) {
        let dur = self.t0.elapsed().as_secs_f64().max(1e-3);
        tracing::info!(
            "commands={} lines={} errors={} retries={} timeouts={} out={}B in={}B over {:.1}s",
            self.commands,
            self.lines,
            self.errors,
            self.retries,
            self.timeouts,
            self.bytes_out,
            self.bytes_in,
            dur,
        );
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}
