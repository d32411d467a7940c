//! Stream filtering and registered-domain derivation.

use std::net::IpAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use indexmap::IndexSet;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use certhunt_core::{EnrichedEvent, RawEvent};

use crate::error::SourceError;
use crate::pipeline::{Counters, Shutdown};
use crate::rate::RateCounter;

// ── Registered-domain reduction ─────────────────────────────────────

/// Reduce a hostname to its registered domain (public suffix + one label).
///
/// Returns `None` for hostnames with empty labels, IP addresses, and names
/// that are themselves a public suffix. A leading wildcard label is ignored.
pub fn registered_domain(host: &str) -> Option<String> {
    let host = host.trim().to_ascii_lowercase();
    let host = host.strip_prefix("*.").unwrap_or(&host);

    if host.is_empty() || host.split('.').any(str::is_empty) {
        return None;
    }
    if host.parse::<IpAddr>().is_ok() {
        return None;
    }

    psl::domain_str(host).map(str::to_string)
}

/// Reduce every hostname, keeping first-seen order and dropping duplicates.
///
/// Hostnames that cannot be reduced are skipped individually.
pub fn registered_domains<'a>(hosts: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut out: IndexSet<String> = IndexSet::new();
    for host in hosts {
        match registered_domain(host) {
            Some(domain) => {
                out.insert(domain);
            }
            None => debug!(host, "no registered domain for hostname"),
        }
    }
    out.into_iter().collect()
}

// ── Enricher ────────────────────────────────────────────────────────

/// Filters raw stream messages and forwards enriched certificate updates.
pub struct Enricher {
    skip_precerts: bool,
    certs: Arc<RateCounter>,
    counters: Arc<Counters>,
}

impl Enricher {
    pub fn new(skip_precerts: bool, certs: Arc<RateCounter>, counters: Arc<Counters>) -> Self {
        Self {
            skip_precerts,
            certs,
            counters,
        }
    }

    /// Enrich one message, or `None` if it must not reach matching.
    pub fn enrich(&self, raw: RawEvent) -> Option<EnrichedEvent> {
        self.counters.events_seen.fetch_add(1, Ordering::Relaxed);

        if !raw.is_certificate_update() {
            trace!(message_type = %raw.message_type, "ignoring non-certificate message");
            return None;
        }
        if self.skip_precerts && raw.is_precert() {
            trace!("ignoring pre-certificate entry");
            return None;
        }

        let domains = raw
            .leaf_cert()
            .map(|leaf| registered_domains(leaf.all_domains()))
            .unwrap_or_default();

        self.certs.incr();
        self.counters.events_enriched.fetch_add(1, Ordering::Relaxed);
        Some(EnrichedEvent::new(raw.data, domains))
    }

    /// Consume the stream until it ends or shutdown is signalled.
    ///
    /// Dropping `events` on return lets the matcher pool drain and exit.
    pub async fn run(
        self,
        mut messages: mpsc::Receiver<RawEvent>,
        mut errors: mpsc::Receiver<SourceError>,
        events: mpsc::Sender<EnrichedEvent>,
        mut shutdown: Shutdown,
    ) {
        let mut errors_open = true;
        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("enricher stopping on shutdown");
                    break;
                }
                err = errors.recv(), if errors_open => match err {
                    Some(e) => warn!(error = %e, "certificate stream error"),
                    None => errors_open = false,
                },
                msg = messages.recv() => {
                    let Some(raw) = msg else {
                        info!("certificate stream ended");
                        break;
                    };
                    if let Some(event) = self.enrich(raw) {
                        if events.send(event).await.is_err() {
                            warn!("matcher queue closed, stopping enricher");
                            break;
                        }
                    }
                }
            }
        }

        // Surface errors the source reported before it finished.
        while let Ok(e) = errors.try_recv() {
            warn!(error = %e, "certificate stream error");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn enricher(skip_precerts: bool) -> Enricher {
        Enricher::new(
            skip_precerts,
            Arc::new(RateCounter::new(Duration::from_secs(10))),
            Arc::new(Counters::default()),
        )
    }

    fn raw(message_type: &str, update_type: &str, domains: &[&str]) -> RawEvent {
        serde_json::from_value(json!({
            "message_type": message_type,
            "data": {
                "update_type": update_type,
                "seen": 1718000000.0,
                "leaf_cert": { "all_domains": domains }
            }
        }))
        .unwrap()
    }

    #[test]
    fn reduces_to_registered_domain() {
        assert_eq!(registered_domain("www.example.com").as_deref(), Some("example.com"));
        assert_eq!(registered_domain("a.b.example.co.uk").as_deref(), Some("example.co.uk"));
        assert_eq!(registered_domain("*.Example.COM").as_deref(), Some("example.com"));
        assert_eq!(registered_domain("example.com").as_deref(), Some("example.com"));
    }

    #[test]
    fn unreducible_hostnames_are_rejected() {
        assert_eq!(registered_domain(""), None);
        assert_eq!(registered_domain("com"), None);
        assert_eq!(registered_domain("co.uk"), None);
        assert_eq!(registered_domain("bad..example.com"), None);
        assert_eq!(registered_domain(".example.com"), None);
        assert_eq!(registered_domain("example.com."), None);
        assert_eq!(registered_domain("192.168.1.10"), None);
        assert_eq!(registered_domain("::1"), None);
    }

    #[test]
    fn dedups_in_first_seen_order() {
        let hosts = [
            "www.example.com",
            "example.com",
            "mail.example.com",
            "example.com",
        ];
        assert_eq!(registered_domains(hosts), vec!["example.com"]);

        let mixed = ["b.org", "bad..name", "www.a.com", "x.b.org", "a.com"];
        assert_eq!(registered_domains(mixed), vec!["b.org", "a.com"]);
    }

    #[test]
    fn large_san_lists_keep_first_seen_order() {
        let hosts: Vec<String> = (0..2000)
            .map(|i| format!("host{}.site{}.com", i, i % 500))
            .collect();
        let domains = registered_domains(hosts.iter().map(String::as_str));

        let expected: Vec<String> = (0..500).map(|i| format!("site{i}.com")).collect();
        assert_eq!(domains, expected);
    }

    #[test]
    fn reduction_is_idempotent() {
        let hosts = ["www.shop.example.co.uk", "example.net", "*.example.net", "api.x.io"];
        let once = registered_domains(hosts);
        let twice = registered_domains(once.iter().map(String::as_str));
        assert_eq!(once, twice);
    }

    #[test]
    fn enrich_attaches_registered_domains() {
        let e = enricher(false);
        let event = e
            .enrich(raw(
                "certificate_update",
                "X509LogEntry",
                &["www.paypal-login.com", "paypal-login.com", "cdn.other.net"],
            ))
            .unwrap();
        assert_eq!(event.registered_domains(), ["paypal-login.com", "other.net"]);

        let leaf = event.data()["leaf_cert"]["registered_domains"].clone();
        assert_eq!(leaf, json!(["paypal-login.com", "other.net"]));

        assert_eq!(e.counters.events_seen.load(Ordering::Relaxed), 1);
        assert_eq!(e.counters.events_enriched.load(Ordering::Relaxed), 1);
        assert_eq!(e.certs.count(), 1);
    }

    #[test]
    fn non_certificate_messages_are_dropped() {
        let e = enricher(false);
        assert!(e.enrich(raw("heartbeat", "", &["a.com"])).is_none());
        assert_eq!(e.counters.events_seen.load(Ordering::Relaxed), 1);
        assert_eq!(e.counters.events_enriched.load(Ordering::Relaxed), 0);
        assert_eq!(e.certs.count(), 0);
    }

    #[test]
    fn precerts_are_dropped_only_when_configured() {
        let precert = || raw("certificate_update", "PrecertLogEntry", &["a.com"]);
        assert!(enricher(false).enrich(precert()).is_some());
        assert!(enricher(true).enrich(precert()).is_none());
    }

    #[test]
    fn missing_leaf_cert_yields_empty_domains() {
        let e = enricher(false);
        let raw: RawEvent = serde_json::from_value(json!({
            "message_type": "certificate_update",
            "data": { "seen": 1.0 }
        }))
        .unwrap();
        let event = e.enrich(raw).unwrap();
        assert!(event.registered_domains().is_empty());
    }

    #[tokio::test]
    async fn run_forwards_until_stream_ends() {
        let (msg_tx, msg_rx) = mpsc::channel(4);
        let (err_tx, err_rx) = mpsc::channel(4);
        let (out_tx, mut out_rx) = mpsc::channel(4);
        let (_trigger, shutdown) = Shutdown::new();

        let task = tokio::spawn(enricher(false).run(msg_rx, err_rx, out_tx, shutdown));

        msg_tx.send(raw("heartbeat", "", &[])).await.unwrap();
        msg_tx
            .send(raw("certificate_update", "X509LogEntry", &["www.a.com"]))
            .await
            .unwrap();
        drop(msg_tx);
        drop(err_tx);
        task.await.unwrap();

        let event = out_rx.recv().await.unwrap();
        assert_eq!(event.registered_domains(), ["a.com"]);
        assert!(out_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let (_msg_tx, msg_rx) = mpsc::channel::<RawEvent>(1);
        let (_err_tx, err_rx) = mpsc::channel(1);
        let (out_tx, mut out_rx) = mpsc::channel(1);
        let (trigger, shutdown) = Shutdown::new();

        let task = tokio::spawn(enricher(false).run(msg_rx, err_rx, out_tx, shutdown));
        trigger.trigger();

        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("enricher did not stop")
            .unwrap();
        assert!(out_rx.recv().await.is_none());
    }
}
