//! Task wiring, cancellation and drain.
//!
//! Shutdown (or end of stream) stops the enricher, which drops the event
//! queue sender. Workers drain the queue and exit, dropping the attribute
//! queue senders; the sink drains that queue and exits. Nothing in flight
//! is lost.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::info;

use certhunt_core::Config;

use crate::enricher::Enricher;
use crate::error::PipelineError;
use crate::matcher::Matcher;
use crate::rate::{RateCounter, RateMonitor};
use crate::sink::Sink;
use crate::source::StreamSource;

// ── Shutdown ────────────────────────────────────────────────────────

/// Receiving side of the cancellation flag.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

/// Sending side of the cancellation flag. Triggering is idempotent.
#[derive(Debug, Clone)]
pub struct ShutdownTrigger {
    tx: Arc<watch::Sender<bool>>,
}

impl Shutdown {
    pub fn new() -> (ShutdownTrigger, Shutdown) {
        let (tx, rx) = watch::channel(false);
        (ShutdownTrigger { tx: Arc::new(tx) }, Shutdown { rx })
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown has been triggered. Never resolves if every
    /// trigger is dropped without firing.
    pub async fn cancelled(&mut self) {
        while !*self.rx.borrow_and_update() {
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

// ── Stats ───────────────────────────────────────────────────────────

/// Shared pipeline counters, updated by every stage.
#[derive(Debug, Default)]
pub struct Counters {
    pub(crate) events_seen: AtomicU64,
    pub(crate) events_enriched: AtomicU64,
    pub(crate) attributes_matched: AtomicU64,
    pub(crate) attributes_written: AtomicU64,
    pub(crate) attributes_suppressed: AtomicU64,
}

impl Counters {
    pub fn snapshot(&self) -> PipelineStats {
        PipelineStats {
            events_seen: self.events_seen.load(Ordering::Relaxed),
            events_enriched: self.events_enriched.load(Ordering::Relaxed),
            attributes_matched: self.attributes_matched.load(Ordering::Relaxed),
            attributes_written: self.attributes_written.load(Ordering::Relaxed),
            attributes_suppressed: self.attributes_suppressed.load(Ordering::Relaxed),
        }
    }
}

/// Totals reported when the pipeline has drained.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Stream messages received, of any type.
    pub events_seen: u64,
    /// Certificate updates forwarded to matching.
    pub events_enriched: u64,
    /// Attributes produced by the matcher pool.
    pub attributes_matched: u64,
    /// Attributes appended to the log.
    pub attributes_written: u64,
    /// Attributes dropped as duplicates within the TTL window.
    pub attributes_suppressed: u64,
}

// ── Pipeline ────────────────────────────────────────────────────────

pub struct Pipeline {
    source: Box<dyn StreamSource>,
    matcher: Matcher,
    sink: Sink,
    skip_precerts: bool,
    workers: usize,
    queue_capacity: usize,
    channel_capacity: usize,
    rate_window: Duration,
    report_every: Duration,
}

impl Pipeline {
    pub fn new(source: Box<dyn StreamSource>, matcher: Matcher, sink: Sink) -> Self {
        Self {
            source,
            matcher,
            sink,
            skip_precerts: false,
            workers: 5,
            queue_capacity: 256,
            channel_capacity: 1024,
            rate_window: Duration::from_secs(10),
            report_every: Duration::from_secs(10),
        }
    }

    /// Apply the stream, pipeline and monitor sections of `config`.
    pub fn configure(self, config: &Config) -> Self {
        self.skip_precerts(config.stream.skip_precerts)
            .channel_capacity(config.stream.channel_capacity)
            .workers(config.pipeline.workers)
            .queue_capacity(config.pipeline.queue_capacity)
            .rate_window(config.monitor.window())
            .report_every(config.monitor.report_every())
    }

    pub fn skip_precerts(mut self, skip: bool) -> Self {
        self.skip_precerts = skip;
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    pub fn rate_window(mut self, window: Duration) -> Self {
        self.rate_window = window;
        self
    }

    pub fn report_every(mut self, every: Duration) -> Self {
        self.report_every = every;
        self
    }

    /// Start every stage on the current tokio runtime.
    pub fn spawn(self) -> PipelineHandle {
        let (trigger, shutdown) = Shutdown::new();
        let counters = Arc::new(Counters::default());
        let certs = Arc::new(RateCounter::new(self.rate_window));
        let attributes = Arc::new(RateCounter::new(self.rate_window));

        let (msg_tx, msg_rx) = mpsc::channel(self.channel_capacity);
        let (err_tx, err_rx) = mpsc::channel(self.channel_capacity);
        let (event_tx, event_rx) = mpsc::channel(self.queue_capacity);
        let (attr_tx, attr_rx) = mpsc::channel(self.queue_capacity);

        info!(
            workers = self.workers,
            rules = self.matcher.rules().len(),
            "starting pipeline"
        );

        let source = tokio::spawn(self.source.run(msg_tx, err_tx));

        let enricher = Enricher::new(self.skip_precerts, certs.clone(), counters.clone());
        let enricher = tokio::spawn(enricher.run(msg_rx, err_rx, event_tx, shutdown.clone()));

        let workers =
            Arc::new(self.matcher).spawn_pool(self.workers, event_rx, attr_tx, counters.clone());

        let sink = self
            .sink
            .with_rate(attributes.clone())
            .with_counters(counters.clone());
        let sink = tokio::spawn(sink.run(attr_rx));

        let mut monitor = RateMonitor::new(self.report_every);
        monitor.register("certs", certs);
        monitor.register("attributes", attributes);
        let monitor = tokio::spawn(monitor.run(shutdown));

        PipelineHandle {
            trigger,
            source,
            enricher,
            workers,
            sink,
            monitor,
            counters,
        }
    }
}

/// Running pipeline.
pub struct PipelineHandle {
    trigger: ShutdownTrigger,
    source: JoinHandle<()>,
    enricher: JoinHandle<()>,
    workers: Vec<JoinHandle<()>>,
    sink: JoinHandle<()>,
    monitor: JoinHandle<()>,
    counters: Arc<Counters>,
}

impl PipelineHandle {
    /// Stop taking stream input; queued work still drains.
    pub fn shutdown(&self) {
        self.trigger.trigger();
    }

    /// A clonable trigger, e.g. for a signal handler task.
    pub fn shutdown_trigger(&self) -> ShutdownTrigger {
        self.trigger.clone()
    }

    /// Live counters while running.
    pub fn stats(&self) -> PipelineStats {
        self.counters.snapshot()
    }

    /// Wait for the stream to end (or shutdown) and every queue to drain.
    pub async fn join(self) -> Result<PipelineStats, PipelineError> {
        self.enricher.await?;

        // The source may still be blocked reading input nobody will consume.
        self.source.abort();

        for worker in self.workers {
            worker.await?;
        }
        self.sink.await?;

        self.trigger.trigger();
        self.monitor.await?;

        match self.source.await {
            Err(e) if !e.is_cancelled() => return Err(e.into()),
            _ => {}
        }

        let stats = self.counters.snapshot();
        info!(
            events_seen = stats.events_seen,
            events_enriched = stats.events_enriched,
            attributes_matched = stats.attributes_matched,
            attributes_written = stats.attributes_written,
            attributes_suppressed = stats.attributes_suppressed,
            "pipeline drained"
        );
        Ok(stats)
    }
}
