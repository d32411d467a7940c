//! End-to-end runs of the pipeline over an in-process certificate stream.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tempfile::TempDir;
use tokio::sync::mpsc;

use certhunt_core::config::EmitMode;
use certhunt_core::{Attribute, RawEvent};
use certhunt_eisenbahn::{EisenbahnError, EventPublisher, Message};
use certhunt_pipeline::{
    AttributeEmitter, AttributeLog, ChannelSource, Matcher, MemoryDedupStore, Pipeline,
    PipelineHandle, PipelineStats, Sink,
};
use certhunt_rules::RuleLoader;

#[derive(Default)]
struct Recording {
    messages: Mutex<Vec<Message>>,
}

impl Recording {
    fn values(&self) -> Vec<String> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .map(|m| m.decode::<Attribute>().unwrap().value)
            .collect()
    }
}

#[async_trait]
impl EventPublisher for Recording {
    async fn publish(&self, message: Message) -> Result<(), EisenbahnError> {
        self.messages.lock().unwrap().push(message);
        Ok(())
    }
}

struct Harness {
    dir: TempDir,
    publisher: Arc<Recording>,
    tx: mpsc::Sender<RawEvent>,
    handle: PipelineHandle,
}

impl Harness {
    async fn start(ttl: Duration) -> Self {
        let dir = TempDir::new().unwrap();
        let rules_dir = dir.path().join("rules");
        std::fs::create_dir(&rules_dir).unwrap();
        let bundled =
            Path::new(env!("CARGO_MANIFEST_DIR")).join("../../data/rules/brands/paypal.yml");
        std::fs::copy(bundled, rules_dir.join("paypal.yml")).unwrap();
        let rules = RuleLoader::new(&rules_dir).load().unwrap();

        let publisher = Arc::new(Recording::default());
        let log = AttributeLog::open(dir.path().join("attributes.jsonl"))
            .await
            .unwrap();
        let sink = Sink::new(
            log,
            publisher.clone(),
            Arc::new(MemoryDedupStore::new()),
            "attributes",
            ttl,
        );
        let matcher = Matcher::new(
            rules,
            AttributeEmitter::new("Certstream Sigma Rules"),
            "leaf_cert.registered_domains",
            EmitMode::PerValue,
        );

        let (tx, source) = ChannelSource::channel(16);
        let handle = Pipeline::new(Box::new(source), matcher, sink)
            .workers(3)
            .queue_capacity(8)
            .spawn();

        Self {
            dir,
            publisher,
            tx,
            handle,
        }
    }

    async fn send(&self, event: RawEvent) {
        self.tx.send(event).await.unwrap();
    }

    /// Close the stream and wait for the drain.
    async fn finish(self) -> (PipelineStats, Vec<Attribute>, Arc<Recording>, TempDir) {
        drop(self.tx);
        let stats = tokio::time::timeout(Duration::from_secs(5), self.handle.join())
            .await
            .expect("pipeline did not drain")
            .unwrap();
        let logged = read_log(&self.dir.path().join("attributes.jsonl"));
        (stats, logged, self.publisher, self.dir)
    }
}

fn read_log(path: &Path) -> Vec<Attribute> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}

fn cert(domains: &[&str]) -> RawEvent {
    serde_json::from_value(json!({
        "message_type": "certificate_update",
        "data": {
            "update_type": "X509LogEntry",
            "seen": 1718000000.0,
            "leaf_cert": {
                "subject": { "CN": domains.first().copied().unwrap_or_default() },
                "all_domains": domains,
                "fingerprint": "AB:CD:EF"
            }
        }
    }))
    .unwrap()
}

async fn wait_for(handle: &PipelineHandle, done: impl Fn(&PipelineStats) -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !done(&handle.stats()) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached");
}

#[tokio::test]
async fn repeated_certificate_is_emitted_once() {
    let h = Harness::start(Duration::from_secs(60)).await;
    h.send(cert(&["www.paypal-login.com", "paypal-login.com"])).await;
    wait_for(&h.handle, |s| s.attributes_written == 1).await;
    h.send(cert(&["secure.paypal-login.com"])).await;

    let (stats, logged, publisher, _dir) = h.finish().await;
    assert_eq!(stats.events_enriched, 2);
    assert_eq!(stats.attributes_matched, 2);
    assert_eq!(stats.attributes_written, 1);
    assert_eq!(stats.attributes_suppressed, 1);

    assert_eq!(logged.len(), 1);
    let attr = &logged[0];
    assert_eq!(attr.value, "paypal-login.com");
    assert_eq!(attr.event_name, "PayPal lookalike");
    assert_eq!(attr.parent_event, "Certstream Sigma Rules");
    assert_eq!(attr.attr_type, "domain");
    assert_eq!(attr.comment, "Observed in Certstream: 2024-06-10 (abcdef)");
    assert_eq!(publisher.values(), vec!["paypal-login.com"]);
}

#[tokio::test]
async fn expired_marker_allows_re_emission() {
    let h = Harness::start(Duration::from_millis(50)).await;
    h.send(cert(&["paypal-verify.net"])).await;
    wait_for(&h.handle, |s| s.attributes_written == 1).await;

    tokio::time::sleep(Duration::from_millis(120)).await;
    h.send(cert(&["paypal-verify.net"])).await;

    let (stats, logged, _, _dir) = h.finish().await;
    assert_eq!(stats.attributes_written, 2);
    assert_eq!(stats.attributes_suppressed, 0);
    assert_eq!(logged.len(), 2);
}

#[tokio::test]
async fn non_certificate_messages_never_match() {
    let h = Harness::start(Duration::from_secs(60)).await;
    let heartbeat: RawEvent = serde_json::from_value(json!({
        "message_type": "heartbeat",
        "data": { "leaf_cert": { "all_domains": ["paypal-login.com"] } }
    }))
    .unwrap();
    h.send(heartbeat).await;

    let (stats, logged, publisher, _dir) = h.finish().await;
    assert_eq!(stats.events_seen, 1);
    assert_eq!(stats.events_enriched, 0);
    assert_eq!(stats.attributes_matched, 0);
    assert!(logged.is_empty());
    assert!(publisher.values().is_empty());
}

#[tokio::test]
async fn legitimate_domain_is_excluded() {
    let h = Harness::start(Duration::from_secs(60)).await;
    h.send(cert(&["www.paypal.com", "paypal.com"])).await;

    let (stats, logged, _, _dir) = h.finish().await;
    assert_eq!(stats.events_enriched, 1);
    assert_eq!(stats.attributes_matched, 0);
    assert!(logged.is_empty());
}

#[tokio::test]
async fn each_registered_domain_becomes_an_attribute() {
    let h = Harness::start(Duration::from_secs(60)).await;
    h.send(cert(&["login.paypal-login.com", "paypal-verify.net"])).await;

    let (stats, logged, _, _dir) = h.finish().await;
    assert_eq!(stats.attributes_written, 2);
    let mut values: Vec<String> = logged.into_iter().map(|a| a.value).collect();
    values.sort();
    assert_eq!(values, vec!["paypal-login.com", "paypal-verify.net"]);
}

#[tokio::test]
async fn shutdown_drains_queued_work_while_stream_is_open() {
    let h = Harness::start(Duration::from_secs(60)).await;
    for i in 0..20 {
        h.send(cert(&[format!("paypal-{i}.com").as_str()])).await;
    }
    wait_for(&h.handle, |s| s.events_enriched == 20).await;

    // The stream sender stays alive; only the trigger stops intake.
    h.handle.shutdown();
    let stats = tokio::time::timeout(Duration::from_secs(5), h.handle.join())
        .await
        .expect("pipeline did not drain")
        .unwrap();

    assert_eq!(stats.attributes_written, 20);
    assert_eq!(read_log(&h.dir.path().join("attributes.jsonl")).len(), 20);
    assert_eq!(h.publisher.values().len(), 20);
    drop(h.tx);
}
