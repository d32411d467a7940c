//! Sliding-window throughput counters and their periodic reporter.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::info;

use crate::pipeline::Shutdown;

/// Buckets per window; at the default 10 s window each bucket is one second.
const BUCKETS_PER_WINDOW: u32 = 10;

#[derive(Debug)]
struct Bucket {
    start: Instant,
    count: u64,
}

/// Event counter that forgets events older than its window.
#[derive(Debug)]
pub struct RateCounter {
    window: Duration,
    resolution: Duration,
    buckets: Mutex<VecDeque<Bucket>>,
}

impl RateCounter {
    pub fn new(window: Duration) -> Self {
        let window = window.max(Duration::from_millis(1));
        Self {
            window,
            resolution: window / BUCKETS_PER_WINDOW,
            buckets: Mutex::new(VecDeque::with_capacity(BUCKETS_PER_WINDOW as usize + 1)),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn incr(&self) {
        self.add(1);
    }

    pub fn add(&self, n: u64) {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().expect("rate counter lock poisoned");
        self.evict(&mut buckets, now);
        match buckets.back_mut() {
            Some(last) if now.duration_since(last.start) < self.resolution => last.count += n,
            _ => buckets.push_back(Bucket { start: now, count: n }),
        }
    }

    /// Events recorded within the last window.
    pub fn count(&self) -> u64 {
        let mut buckets = self.buckets.lock().expect("rate counter lock poisoned");
        self.evict(&mut buckets, Instant::now());
        buckets.iter().map(|b| b.count).sum()
    }

    /// Events per second over the window.
    pub fn rate(&self) -> f64 {
        self.count() as f64 / self.window.as_secs_f64()
    }

    fn evict(&self, buckets: &mut VecDeque<Bucket>, now: Instant) {
        while let Some(front) = buckets.front() {
            if now.duration_since(front.start) >= self.window {
                buckets.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Logs the rate of every registered counter on a fixed cadence.
///
/// Purely observational: it reads counters and never touches the pipeline.
pub struct RateMonitor {
    every: Duration,
    counters: Vec<(String, Arc<RateCounter>)>,
}

impl RateMonitor {
    pub fn new(every: Duration) -> Self {
        Self {
            every: every.max(Duration::from_millis(1)),
            counters: Vec::new(),
        }
    }

    pub fn register(&mut self, name: impl Into<String>, counter: Arc<RateCounter>) {
        self.counters.push((name.into(), counter));
    }

    /// Current `(name, events/sec)` for every counter, in registration order.
    pub fn snapshot(&self) -> Vec<(&str, f64)> {
        self.counters
            .iter()
            .map(|(name, c)| (name.as_str(), c.rate()))
            .collect()
    }

    pub fn report(&self) {
        for (name, counter) in &self.counters {
            info!(
                counter = %name,
                rate = %format!("{:.2}/s", counter.rate()),
                count = counter.count(),
                window_secs = counter.window().as_secs_f64(),
                "throughput"
            );
        }
    }

    /// Report until shutdown is signalled.
    pub async fn run(self, mut shutdown: Shutdown) {
        let mut ticker = tokio::time::interval(self.every);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => self.report(),
                _ = shutdown.cancelled() => break,
            }
        }
    }
}
