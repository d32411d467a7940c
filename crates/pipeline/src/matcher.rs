//! Rule evaluation over enriched events and the matcher worker pool.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use indexmap::IndexSet;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use certhunt_core::config::EmitMode;
use certhunt_core::selector::{FieldSelector, FieldValue};
use certhunt_core::{Attribute, EnrichedEvent};
use certhunt_rules::{render_description, Rule, RuleSet};

use crate::emitter::AttributeEmitter;
use crate::pipeline::Counters;

/// Outcome of matching one event against the whole rule set.
#[derive(Debug, Default)]
pub struct MatchReport {
    pub attributes: Vec<Attribute>,
    /// Rules whose evaluation failed and were skipped.
    pub rule_errors: usize,
    /// Matches discarded because the emission field had no value.
    pub unresolved: usize,
}

/// Evaluates every rule against an event and turns matches into attributes.
///
/// Holds only immutable state, so one instance is shared by all workers.
pub struct Matcher {
    rules: RuleSet,
    emitter: AttributeEmitter,
    emit_field: String,
    mode: EmitMode,
}

impl Matcher {
    pub fn new(
        rules: RuleSet,
        emitter: AttributeEmitter,
        emit_field: impl Into<String>,
        mode: EmitMode,
    ) -> Self {
        Self {
            rules,
            emitter,
            emit_field: emit_field.into(),
            mode,
        }
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub fn match_event(&self, event: &EnrichedEvent) -> MatchReport {
        let mut report = MatchReport::default();

        for rule in self.rules.iter() {
            match rule.evaluate(event) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    error!(rule = %rule.title(), error = %e, "rule evaluation failed");
                    report.rule_errors += 1;
                    continue;
                }
            }

            let values = self.emission_values(event);
            if values.is_empty() {
                error!(
                    rule = %rule.title(),
                    field = %self.emit_field,
                    "rule matched but emission field has no value"
                );
                report.unresolved += 1;
                continue;
            }

            let description = rule
                .description()
                .map(|d| render_description(d, event))
                .unwrap_or_default();
            info!(
                rule = %rule.title(),
                cn = event.leaf_cert().and_then(|c| c.common_name()).unwrap_or("?"),
                values = ?values,
                description = %description,
                "rule matched"
            );

            report
                .attributes
                .extend(values.into_iter().map(|v| self.emitter.build(rule, event, v)));
        }

        report
    }

    /// Distinct values of the emission field, in order.
    fn emission_values(&self, event: &EnrichedEvent) -> Vec<String> {
        let mut values: IndexSet<String> = IndexSet::new();
        match event.select(&self.emit_field) {
            Some(FieldValue::Scalar(s)) => {
                values.insert(s.into_owned());
            }
            Some(FieldValue::Sequence(items)) => {
                for item in items.iter() {
                    if let FieldValue::Scalar(s) = item {
                        values.insert(s.into_owned());
                    }
                }
            }
            Some(FieldValue::Mapping(_)) | Some(FieldValue::Null) | None => {}
        }
        values.retain(|v| !v.is_empty());
        let mut values: Vec<String> = values.into_iter().collect();

        if self.mode == EmitMode::PerEvent {
            values.truncate(1);
        }
        values
    }

    /// Start `workers` tasks pulling from one shared queue.
    ///
    /// Each event goes to exactly one worker. Workers exit once the queue is
    /// closed and drained; the attribute sender is dropped with the last one.
    pub fn spawn_pool(
        self: Arc<Self>,
        workers: usize,
        events: mpsc::Receiver<EnrichedEvent>,
        attributes: mpsc::Sender<Attribute>,
        counters: Arc<Counters>,
    ) -> Vec<JoinHandle<()>> {
        let queue = Arc::new(Mutex::new(events));
        (0..workers.max(1))
            .map(|id| {
                let matcher = self.clone();
                let queue = queue.clone();
                let attributes = attributes.clone();
                let counters = counters.clone();
                tokio::spawn(async move {
                    matcher.run_worker(id, queue, attributes, counters).await;
                })
            })
            .collect()
    }

    async fn run_worker(
        &self,
        id: usize,
        queue: Arc<Mutex<mpsc::Receiver<EnrichedEvent>>>,
        attributes: mpsc::Sender<Attribute>,
        counters: Arc<Counters>,
    ) {
        debug!(worker = id, "matcher worker started");
        loop {
            let next = queue.lock().await.recv().await;
            let Some(event) = next else { break };

            let report = self.match_event(&event);
            counters
                .attributes_matched
                .fetch_add(report.attributes.len() as u64, Ordering::Relaxed);

            for attribute in report.attributes {
                if attributes.send(attribute).await.is_err() {
                    error!(worker = id, "attribute queue closed, stopping worker");
                    return;
                }
            }
        }
        debug!(worker = id, "matcher worker drained");
    }
}
