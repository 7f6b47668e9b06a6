use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use watchtower_archive::ArchiveStore;
use watchtower_core::config::ConfigHandle;
use watchtower_core::types::Event;

use crate::notify::{Notifier, NotifyError};
use crate::render::render_alert_message;

/// How many rows the poll pulls per tick — only the newest matter.
const POLL_LIMIT: usize = 5;

/// What one tick did; returned from [`AlertMonitor::tick`] for observability
/// and tests.
#[derive(Debug, Default)]
pub struct TickReport {
    pub fresh_events: usize,
    pub notified: usize,
    pub rate_limited: usize,
    pub pruned: Vec<String>,
}

#[derive(Default)]
struct RecipientRate {
    last_sent: Option<DateTime<Utc>>,
    sent_this_hour: u32,
    hour_started: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct MonitorState {
    subscribers: HashSet<String>,
    /// Event ids already notified. Bounded by the retention policy.
    delivered: BTreeSet<i64>,
    rates: HashMap<String, RecipientRate>,
    stop_tx: Option<watch::Sender<bool>>,
}

/// Background monitor that fans new high-severity events out to subscribers.
///
/// The poll task starts with the first subscriber and stops (clearing the
/// delivered set) when the last one leaves — re-subscription is fresh.
#[derive(Clone)]
pub struct AlertMonitor {
    inner: Arc<Inner>,
}

struct Inner {
    archive: Arc<ArchiveStore>,
    config: ConfigHandle,
    notifier: Arc<dyn Notifier>,
    state: Mutex<MonitorState>,
}

impl AlertMonitor {
    pub fn new(
        archive: Arc<ArchiveStore>,
        config: ConfigHandle,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                archive,
                config,
                notifier,
                state: Mutex::new(MonitorState::default()),
            }),
        }
    }

    /// Register a recipient. Returns false if already subscribed. Starts the
    /// poll task on the first subscriber.
    pub fn subscribe(&self, recipient: &str) -> Result<bool, &'static str> {
        let cap = self.inner.config.current().thresholds.subscriber_cap;
        let mut state = self.inner.state.lock().unwrap();
        if state.subscribers.len() >= cap && !state.subscribers.contains(recipient) {
            return Err("subscriber capacity reached");
        }
        let added = state.subscribers.insert(recipient.to_string());
        if added && state.stop_tx.is_none() {
            let (tx, rx) = watch::channel(false);
            state.stop_tx = Some(tx);
            let monitor = self.clone();
            tokio::spawn(async move { monitor.run(rx).await });
            info!(recipient, "alert monitoring started");
        }
        Ok(added)
    }

    /// Remove a recipient. Stops the poll task and resets delivery state
    /// when the set empties.
    pub fn unsubscribe(&self, recipient: &str) -> bool {
        let mut state = self.inner.state.lock().unwrap();
        let removed = state.subscribers.remove(recipient);
        if removed && state.subscribers.is_empty() {
            if let Some(tx) = state.stop_tx.take() {
                let _ = tx.send(true);
            }
            state.delivered.clear();
            state.rates.clear();
            info!("last subscriber left, alert monitoring stopped");
        }
        removed
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.state.lock().unwrap().subscribers.len()
    }

    pub fn is_subscribed(&self, recipient: &str) -> bool {
        self.inner.state.lock().unwrap().subscribers.contains(recipient)
    }

    /// Poll loop. The interval is re-read each cycle so config changes take
    /// effect without a restart.
    async fn run(self, mut stop: watch::Receiver<bool>) {
        loop {
            let secs = self.inner.config.current().alerts.poll_interval_secs.max(1);
            tokio::select! {
                _ = tokio::time::sleep(std::time::Duration::from_secs(secs)) => {
                    match self.tick().await {
                        Ok(report) if report.notified > 0 => {
                            info!(
                                fresh = report.fresh_events,
                                notified = report.notified,
                                "alerts delivered"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => error!(error = %e, "alert tick failed"),
                    }
                }
                _ = stop.changed() => {
                    if *stop.borrow() {
                        debug!("alert poll loop stopped");
                        break;
                    }
                }
            }
        }
    }

    /// One poll cycle: fetch, dedupe, render, fan out.
    pub async fn tick(&self) -> Result<TickReport, watchtower_archive::ArchiveError> {
        let cfg = self.inner.config.current();
        let mut report = TickReport::default();

        // Snapshot subscribers without holding the lock across awaits.
        let subscribers: Vec<String> = {
            let state = self.inner.state.lock().unwrap();
            if state.subscribers.is_empty() {
                return Ok(report);
            }
            state.subscribers.iter().cloned().collect()
        };

        let candidates = self
            .inner
            .archive
            .latest_high_severity(cfg.thresholds.medium_level, POLL_LIMIT)?;

        // Dedupe against the delivered set and apply the retention policy.
        let fresh: Vec<Event> = {
            let mut state = self.inner.state.lock().unwrap();
            let fresh: Vec<Event> = candidates
                .into_iter()
                .filter(|e| state.delivered.insert(e.id))
                .collect();

            let cap = cfg.thresholds.delivered_retention.max(2);
            if state.delivered.len() > cap {
                // Keep the largest (most recent) half.
                while state.delivered.len() > cap / 2 {
                    state.delivered.pop_first();
                }
            }
            fresh
        };

        report.fresh_events = fresh.len();
        if fresh.is_empty() {
            return Ok(report);
        }

        let critical: Vec<&Event> = fresh
            .iter()
            .filter(|e| e.rule_level >= cfg.thresholds.critical_level)
            .collect();
        let high: Vec<&Event> = fresh
            .iter()
            .filter(|e| {
                e.rule_level >= cfg.thresholds.high_level
                    && e.rule_level < cfg.thresholds.critical_level
            })
            .collect();
        let medium: Vec<&Event> = fresh
            .iter()
            .filter(|e| {
                e.rule_level >= cfg.thresholds.medium_level
                    && e.rule_level < cfg.thresholds.high_level
            })
            .collect();

        let message = render_alert_message(&critical, &high, &medium, Utc::now());

        for recipient in subscribers {
            if !self.may_send(&recipient, &cfg) {
                report.rate_limited += 1;
                continue;
            }

            match self.inner.notifier.send(&recipient, &message).await {
                Ok(()) => {
                    self.record_send(&recipient);
                    report.notified += 1;
                }
                Err(NotifyError::Blocked) => {
                    warn!(recipient = %recipient, "recipient blocked delivery, unsubscribing");
                    report.pruned.push(recipient.clone());
                    self.unsubscribe(&recipient);
                }
                Err(NotifyError::Transient(reason)) => {
                    // Delivered ids stay marked: the next tick must not
                    // re-send the same events.
                    warn!(recipient = %recipient, %reason, "transient notify failure");
                }
            }
        }

        Ok(report)
    }

    fn may_send(&self, recipient: &str, cfg: &watchtower_core::config::WatchtowerConfig) -> bool {
        let now = Utc::now();
        let state = self.inner.state.lock().unwrap();
        let Some(rate) = state.rates.get(recipient) else {
            return true;
        };
        if let Some(last) = rate.last_sent {
            if now - last < Duration::seconds(cfg.alerts.cooldown_secs as i64) {
                return false;
            }
        }
        match rate.hour_started {
            Some(started) if now - started < Duration::hours(1) => {
                rate.sent_this_hour < cfg.alerts.max_per_hour
            }
            _ => true,
        }
    }

    fn record_send(&self, recipient: &str) {
        let now = Utc::now();
        let mut state = self.inner.state.lock().unwrap();
        let rate = state.rates.entry(recipient.to_string()).or_default();
        match rate.hour_started {
            Some(started) if now - started < Duration::hours(1) => {
                rate.sent_this_hour += 1;
            }
            _ => {
                rate.hour_started = Some(now);
                rate.sent_this_hour = 1;
            }
        }
        rate.last_sent = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::SecondsFormat;
    use watchtower_core::config::WatchtowerConfig;
    use watchtower_core::types::NewEvent;

    struct RecordingNotifier {
        sent: Mutex<Vec<(String, String)>>,
        blocked: HashSet<String>,
    }

    impl RecordingNotifier {
        fn new() -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                blocked: HashSet::new(),
            }
        }

        fn blocking(recipients: &[&str]) -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                blocked: recipients.iter().map(|s| s.to_string()).collect(),
            }
        }

        fn sent(&self) -> Vec<(String, String)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send(&self, recipient: &str, message: &str) -> Result<(), NotifyError> {
            if self.blocked.contains(recipient) {
                return Err(NotifyError::Blocked);
            }
            self.sent
                .lock()
                .unwrap()
                .push((recipient.to_string(), message.to_string()));
            Ok(())
        }
    }

    fn new_event(level: i64, desc: &str, hash: &str) -> NewEvent {
        NewEvent {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            agent_id: "001".to_string(),
            agent_name: "web-01".to_string(),
            agent_ip: String::new(),
            manager_name: String::new(),
            rule_id: 5710,
            rule_level: level,
            rule_description: desc.to_string(),
            rule_mitre_id: String::new(),
            rule_mitre_tactic: String::new(),
            rule_mitre_technique: String::new(),
            location: String::new(),
            decoder_name: String::new(),
            full_log: desc.to_string(),
            json_data: "{}".to_string(),
            content_hash: hash.to_string(),
        }
    }

    fn monitor_with(
        notifier: Arc<RecordingNotifier>,
        config: WatchtowerConfig,
    ) -> (AlertMonitor, Arc<ArchiveStore>) {
        let archive = Arc::new(ArchiveStore::open_in_memory().unwrap());
        let monitor = AlertMonitor::new(
            archive.clone(),
            ConfigHandle::new(config),
            notifier,
        );
        (monitor, archive)
    }

    fn no_cooldown_config() -> WatchtowerConfig {
        let mut cfg = WatchtowerConfig::default();
        cfg.alerts.cooldown_secs = 0;
        cfg
    }

    #[tokio::test]
    async fn each_subscriber_gets_one_notification_then_silence() {
        let notifier = Arc::new(RecordingNotifier::new());
        let (monitor, archive) = monitor_with(notifier.clone(), no_cooldown_config());

        monitor.subscribe("s1").unwrap();
        monitor.subscribe("s2").unwrap();

        archive
            .insert_batch(&[new_event(9, "rootkit detected", "h1")])
            .unwrap();

        let report = monitor.tick().await.unwrap();
        assert_eq!(report.fresh_events, 1);
        assert_eq!(report.notified, 2);

        let sent = notifier.sent();
        assert_eq!(sent.len(), 2);
        // Both messages reference the event id (row 1).
        assert!(sent.iter().all(|(_, m)| m.contains("[1]")));

        // Second tick with nothing new: no notification at all.
        let quiet = monitor.tick().await.unwrap();
        assert_eq!(quiet.fresh_events, 0);
        assert_eq!(notifier.sent().len(), 2);
    }

    #[tokio::test]
    async fn below_threshold_events_are_ignored() {
        let notifier = Arc::new(RecordingNotifier::new());
        let (monitor, archive) = monitor_with(notifier.clone(), no_cooldown_config());
        monitor.subscribe("s1").unwrap();

        archive.insert_batch(&[new_event(3, "noise", "h1")]).unwrap();
        let report = monitor.tick().await.unwrap();
        assert_eq!(report.fresh_events, 0);
        assert!(notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn blocked_recipient_is_pruned() {
        let notifier = Arc::new(RecordingNotifier::blocking(&["bad"]));
        let (monitor, archive) = monitor_with(notifier.clone(), no_cooldown_config());
        monitor.subscribe("bad").unwrap();
        monitor.subscribe("good").unwrap();

        archive
            .insert_batch(&[new_event(8, "intrusion", "h1")])
            .unwrap();
        let report = monitor.tick().await.unwrap();

        assert_eq!(report.pruned, vec!["bad".to_string()]);
        assert!(!monitor.is_subscribed("bad"));
        assert!(monitor.is_subscribed("good"));
        assert_eq!(notifier.sent().len(), 1);
    }

    #[tokio::test]
    async fn delivered_set_eviction_keeps_largest_ids() {
        let notifier = Arc::new(RecordingNotifier::new());
        let mut cfg = no_cooldown_config();
        cfg.thresholds.delivered_retention = 10;
        let (monitor, archive) = monitor_with(notifier.clone(), cfg);
        monitor.subscribe("s1").unwrap();

        // 15 ticks of fresh events overflow the retention cap of 10.
        for i in 0..15 {
            archive
                .insert_batch(&[new_event(7, "event", &format!("h{i}"))])
                .unwrap();
            monitor.tick().await.unwrap();
        }

        let state = monitor.inner.state.lock().unwrap();
        assert!(state.delivered.len() <= 10);
        // Everything retained is from the most recent ids.
        let min_kept = *state.delivered.iter().next().unwrap();
        assert!(min_kept > 5, "evicted set kept stale id {min_kept}");
    }

    #[tokio::test]
    async fn cooldown_rate_limits_repeat_sends() {
        let notifier = Arc::new(RecordingNotifier::new());
        let mut cfg = WatchtowerConfig::default();
        cfg.alerts.cooldown_secs = 3600;
        let (monitor, archive) = monitor_with(notifier.clone(), cfg);
        monitor.subscribe("s1").unwrap();

        archive.insert_batch(&[new_event(8, "one", "h1")]).unwrap();
        monitor.tick().await.unwrap();
        archive.insert_batch(&[new_event(8, "two", "h2")]).unwrap();
        let second = monitor.tick().await.unwrap();

        assert_eq!(second.rate_limited, 1);
        assert_eq!(notifier.sent().len(), 1);
    }

    #[tokio::test]
    async fn unsubscribe_clears_delivery_state() {
        let notifier = Arc::new(RecordingNotifier::new());
        let (monitor, archive) = monitor_with(notifier.clone(), no_cooldown_config());
        monitor.subscribe("s1").unwrap();

        archive.insert_batch(&[new_event(8, "x", "h1")]).unwrap();
        monitor.tick().await.unwrap();
        assert_eq!(notifier.sent().len(), 1);

        assert!(monitor.unsubscribe("s1"));
        assert_eq!(monitor.subscriber_count(), 0);

        // Fresh subscription is treated as new: the same event id is
        // eligible again because the delivered set was cleared.
        monitor.subscribe("s1").unwrap();
        let report = monitor.tick().await.unwrap();
        assert_eq!(report.fresh_events, 1);
        assert_eq!(notifier.sent().len(), 2);
    }

    #[tokio::test]
    async fn severity_bands_render_in_one_message() {
        let notifier = Arc::new(RecordingNotifier::new());
        let (monitor, archive) = monitor_with(notifier.clone(), no_cooldown_config());
        monitor.subscribe("s1").unwrap();

        archive
            .insert_batch(&[
                new_event(9, "critical thing", "h1"),
                new_event(6, "high thing", "h2"),
                new_event(5, "medium thing", "h3"),
            ])
            .unwrap();
        monitor.tick().await.unwrap();

        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        let message = &sent[0].1;
        assert!(message.contains("CRITICAL events: 1"));
        assert!(message.contains("HIGH events: 1"));
        assert!(message.contains("MEDIUM events: 1"));
        assert!(message.len() <= 4096);
    }

    #[tokio::test]
    async fn subscriber_cap_is_enforced() {
        let notifier = Arc::new(RecordingNotifier::new());
        let mut cfg = no_cooldown_config();
        cfg.thresholds.subscriber_cap = 1;
        let (monitor, _) = monitor_with(notifier, cfg);

        assert!(monitor.subscribe("s1").unwrap());
        assert!(monitor.subscribe("s2").is_err());
        // Re-subscribing an existing recipient is not a capacity violation.
        assert!(!monitor.subscribe("s1").unwrap());
    }
}
