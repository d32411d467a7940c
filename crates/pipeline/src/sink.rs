//! Dedup/Sink: the single consumer of matched attributes.
//!
//! For each attribute:
//! 1. look up `attr:<event_name>:<value>` in the dedup store; present means
//!    suppressed
//! 2. append it to the attribute log (the system of record)
//! 3. publish it on the broadcast topic (best effort)
//! 4. mark the key with the dedup TTL (best effort)
//!
//! The check and the mark are separate store calls. With one sink task this
//! is race-free; concurrent producers sharing a store may emit a key twice.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error, info};

use certhunt_core::Attribute;
use certhunt_eisenbahn::{EventPublisher, Message};

use crate::dedup::DedupStore;
use crate::error::SinkError;
use crate::pipeline::Counters;
use crate::rate::RateCounter;
use crate::record_log::AttributeLog;

/// What happened to one attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Already emitted within the TTL window.
    Suppressed,
    /// Appended to the log; publish and mark were attempted.
    Written,
    /// The log append failed; nothing else was attempted.
    Failed,
}

pub struct Sink {
    log: AttributeLog,
    publisher: Arc<dyn EventPublisher>,
    store: Arc<dyn DedupStore>,
    topic: String,
    ttl: Duration,
    rate: Arc<RateCounter>,
    counters: Arc<Counters>,
}

impl Sink {
    pub fn new(
        log: AttributeLog,
        publisher: Arc<dyn EventPublisher>,
        store: Arc<dyn DedupStore>,
        topic: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        Self {
            log,
            publisher,
            store,
            topic: topic.into(),
            ttl,
            rate: Arc::new(RateCounter::new(Duration::from_secs(10))),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Count written attributes on `rate` (reported as `attributes`).
    pub fn with_rate(mut self, rate: Arc<RateCounter>) -> Self {
        self.rate = rate;
        self
    }

    pub(crate) fn with_counters(mut self, counters: Arc<Counters>) -> Self {
        self.counters = counters;
        self
    }

    pub async fn handle(&mut self, attribute: Attribute) -> Disposition {
        let key = attribute.dedup_key().store_key();

        match self.store.exists(&key).await {
            Ok(true) => {
                debug!(key = %key, "attribute already emitted, suppressing");
                self.counters
                    .attributes_suppressed
                    .fetch_add(1, Ordering::Relaxed);
                return Disposition::Suppressed;
            }
            Ok(false) => {}
            Err(e) => error!(key = %key, error = %e, "dedup lookup failed, emitting anyway"),
        }

        if let Err(e) = self.log.append(&attribute).await {
            error!(
                key = %key,
                path = %self.log.path().display(),
                error = %e,
                "failed to append attribute to log"
            );
            return Disposition::Failed;
        }
        self.counters
            .attributes_written
            .fetch_add(1, Ordering::Relaxed);
        self.rate.incr();

        if let Err(e) = self.publish(&attribute).await {
            error!(key = %key, topic = %self.topic, error = %e, "failed to publish attribute");
        }

        match self.store.set_if_absent(&key, self.ttl).await {
            Ok(true) => {}
            Ok(false) => debug!(key = %key, "dedup key was set concurrently"),
            Err(e) => error!(key = %key, error = %e, "failed to mark attribute as emitted"),
        }

        Disposition::Written
    }

    async fn publish(&self, attribute: &Attribute) -> Result<(), SinkError> {
        let message = Message::json(self.topic.clone(), attribute)?;
        self.publisher.publish(message).await?;
        Ok(())
    }

    /// Consume until every matcher worker has dropped its sender.
    pub async fn run(mut self, mut attributes: mpsc::Receiver<Attribute>) {
        while let Some(attribute) = attributes.recv().await {
            self.handle(attribute).await;
        }
        info!(path = %self.log.path().display(), "sink drained");
    }
}
