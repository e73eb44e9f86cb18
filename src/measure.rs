use std::time::Instant;

/// Injected telemetry sink; the core never touches process-wide state.
pub trait MeasuringSink {
    fn start(&mut self, _phase: &'static str) {}
    fn stop(&mut self, _phase: &'static str) {}
    fn add(&mut self, _key: &'static str, _value: u64) {}
}

/// Discards everything.
#[derive(Copy, Clone, Default)]
pub struct NoSink;

impl MeasuringSink for NoSink {}

/// Prints phase durations and counters to stderr, prefixed with a PE rank.
pub struct StderrSink {
    rank: usize,
    running: Vec<(&'static str, Instant)>,
}

impl StderrSink {
    pub fn new(rank: usize) -> Self {
        StderrSink {
            rank,
            running: Vec::new(),
        }
    }
}

impl MeasuringSink for StderrSink {
    fn start(&mut self, phase: &'static str) {
        self.running.push((phase, Instant::now()));
    }

    fn stop(&mut self, phase: &'static str) {
        let (started_phase, at) = self.running.pop().expect("stop without start");
        assert_eq!(started_phase, phase, "phases must nest");
        eprintln!(
            "[{}] {}: {:.3}s",
            self.rank,
            phase,
            at.elapsed().as_secs_f64()
        );
    }

    fn add(&mut self, key: &'static str, value: u64) {
        eprintln!("[{}] {} = {}", self.rank, key, value);
    }
}
