//! Signal fusion: independent low-confidence update signals become one
//! high-confidence trigger once enough distinct sources agree.
//!
//! Buckets live behind a [`FusionStore`]. The in-memory store guards the
//! whole bucket map with one mutex so a record and a sweep can never
//! interleave; emitting a [`FusionEvent`] and clearing its bucket happen
//! inside the same critical section.

use crate::clock::{Clock, SystemClock};
use crate::config::FusionSettings;
use crate::errors::{OrchestrationError, Stage};
use crate::model::{FusionEvent, Signal, SourceKind};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct BucketKey {
    pub subject_id: String,
    pub version_hint: String,
}

impl BucketKey {
    pub fn new(subject_id: impl Into<String>, version_hint: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            version_hint: version_hint.into(),
        }
    }
}

/// Pending signals for one (subject, version). At most one signal per source.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FusionBucket {
    pub signals: Vec<Signal>,
}

impl FusionBucket {
    pub fn has_source(&self, source: SourceKind) -> bool {
        self.signals.iter().any(|s| s.source == source)
    }

    pub fn sources(&self) -> Vec<SourceKind> {
        self.signals.iter().map(|s| s.source).collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FusionOutcome {
    Fused(FusionEvent),
    Pending { seen: usize, threshold: usize },
    /// The bucket already holds a signal from this source; nothing changed.
    Duplicate { source: SourceKind },
}

impl FusionOutcome {
    pub fn event(&self) -> Option<&FusionEvent> {
        match self {
            FusionOutcome::Fused(ev) => Some(ev),
            _ => None,
        }
    }

    pub fn into_event(self) -> Option<FusionEvent> {
        match self {
            FusionOutcome::Fused(ev) => Some(ev),
            _ => None,
        }
    }
}

/// Shared bucket map. `record` and `sweep` must be mutually exclusive.
pub trait FusionStore: Send + Sync {
    fn record(&self, signal: Signal, threshold: usize, now: DateTime<Utc>) -> FusionOutcome;

    /// Drop signals observed before `cutoff` and any bucket left empty.
    /// Returns the number of signals removed.
    fn sweep(&self, cutoff: DateTime<Utc>) -> usize;

    fn bucket(&self, key: &BucketKey) -> Option<FusionBucket>;

    fn pending(&self) -> usize;
}

#[derive(Debug, Default)]
pub struct InMemoryFusionStore {
    buckets: Mutex<HashMap<BucketKey, FusionBucket>>,
}

impl InMemoryFusionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FusionStore for InMemoryFusionStore {
    fn record(&self, signal: Signal, threshold: usize, now: DateTime<Utc>) -> FusionOutcome {
        let key = BucketKey::new(signal.subject_id.clone(), signal.version_hint.clone());
        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        let bucket = buckets.entry(key.clone()).or_default();

        if bucket.has_source(signal.source) {
            return FusionOutcome::Duplicate {
                source: signal.source,
            };
        }

        let trigger = signal.source;
        bucket.signals.push(signal);
        let seen = bucket.signals.len();
        if seen < threshold {
            return FusionOutcome::Pending { seen, threshold };
        }

        // Emission and removal share the lock guard.
        let fused = buckets.remove(&key).unwrap_or_default();
        FusionOutcome::Fused(FusionEvent {
            subject_id: key.subject_id,
            version_hint: key.version_hint,
            trigger,
            sources: fused.sources(),
            evidence: fused.signals.into_iter().map(|s| s.evidence_ref).collect(),
            fused_at: now,
        })
    }

    fn sweep(&self, cutoff: DateTime<Utc>) -> usize {
        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        let mut removed = 0;
        buckets.retain(|_, bucket| {
            let before = bucket.signals.len();
            bucket.signals.retain(|s| s.observed_at >= cutoff);
            removed += before - bucket.signals.len();
            !bucket.signals.is_empty()
        });
        removed
    }

    fn bucket(&self, key: &BucketKey) -> Option<FusionBucket> {
        self.buckets
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    fn pending(&self) -> usize {
        self.buckets
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

pub struct SignalAccumulator {
    store: Arc<dyn FusionStore>,
    clock: Arc<dyn Clock>,
    settings: FusionSettings,
}

impl SignalAccumulator {
    pub fn new(settings: FusionSettings) -> Self {
        Self::with_parts(
            Arc::new(InMemoryFusionStore::new()),
            Arc::new(SystemClock),
            settings,
        )
    }

    pub fn with_parts(
        store: Arc<dyn FusionStore>,
        clock: Arc<dyn Clock>,
        settings: FusionSettings,
    ) -> Self {
        Self {
            store,
            clock,
            settings,
        }
    }

    pub fn settings(&self) -> &FusionSettings {
        &self.settings
    }

    pub fn record_signal(
        &self,
        subject_id: &str,
        version_hint: &str,
        source: SourceKind,
        evidence_ref: &str,
    ) -> Result<FusionOutcome, OrchestrationError> {
        self.record(Signal {
            subject_id: subject_id.trim().to_string(),
            version_hint: version_hint.trim().to_string(),
            source,
            evidence_ref: evidence_ref.trim().to_string(),
            observed_at: self.clock.now(),
        })
    }

    /// Record a pre-built signal. Rejected input leaves every bucket untouched.
    pub fn record(&self, signal: Signal) -> Result<FusionOutcome, OrchestrationError> {
        validate_signal(&signal)?;
        if self.settings.threshold == 0 {
            return Err(OrchestrationError::validation(
                Stage::Watcher,
                "fusion threshold must be >= 1",
            ));
        }

        let subject = signal.subject_id.clone();
        let version = signal.version_hint.clone();
        let source = signal.source;
        let outcome = self
            .store
            .record(signal, self.settings.threshold, self.clock.now());

        match &outcome {
            FusionOutcome::Fused(ev) => tracing::info!(
                subject = %subject,
                version = %version,
                trigger = %source,
                sources = ev.sources.len(),
                "fusion threshold reached"
            ),
            FusionOutcome::Pending { seen, threshold } => tracing::debug!(
                subject = %subject,
                version = %version,
                source = %source,
                seen,
                threshold,
                "signal accumulated"
            ),
            FusionOutcome::Duplicate { .. } => tracing::debug!(
                subject = %subject,
                version = %version,
                source = %source,
                "duplicate source ignored"
            ),
        }
        Ok(outcome)
    }

    /// Expire signals older than the retention window. A window reaching
    /// past the representable past expires nothing.
    pub fn sweep_expired(&self) -> usize {
        let Some(cutoff) = self.clock.now().checked_sub_signed(self.settings.retention()) else {
            return 0;
        };
        let removed = self.store.sweep(cutoff);
        if removed > 0 {
            tracing::debug!(removed, %cutoff, "expired pending signals");
        }
        removed
    }

    pub fn bucket(&self, subject_id: &str, version_hint: &str) -> Option<FusionBucket> {
        self.store.bucket(&BucketKey::new(subject_id, version_hint))
    }

    pub fn pending_buckets(&self) -> usize {
        self.store.pending()
    }
}

fn validate_signal(signal: &Signal) -> Result<(), OrchestrationError> {
    let fields = [
        ("subject_id", &signal.subject_id),
        ("version_hint", &signal.version_hint),
        ("evidence_ref", &signal.evidence_ref),
    ];
    for (name, value) in fields {
        if value.trim().is_empty() {
            return Err(OrchestrationError::validation(
                Stage::Watcher,
                format!("{} cannot be empty", name),
            )
            .with_details(serde_json::json!({ "field": name })));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    fn accumulator(threshold: usize) -> (SignalAccumulator, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(start()));
        let acc = SignalAccumulator::with_parts(
            Arc::new(InMemoryFusionStore::new()),
            clock.clone(),
            FusionSettings {
                threshold,
                retention_hours: 168,
            },
        );
        (acc, clock)
    }

    #[test]
    fn duplicate_source_is_rejected_then_second_source_fuses() {
        let (acc, _) = accumulator(2);

        let first = acc
            .record_signal("chatbot", "2.1", SourceKind::Feed, "https://feed/1")
            .unwrap();
        assert_eq!(first, FusionOutcome::Pending { seen: 1, threshold: 2 });

        let dup = acc
            .record_signal("chatbot", "2.1", SourceKind::Feed, "https://feed/2")
            .unwrap();
        assert_eq!(dup, FusionOutcome::Duplicate { source: SourceKind::Feed });
        assert_eq!(acc.bucket("chatbot", "2.1").unwrap().signals.len(), 1);

        let fused = acc
            .record_signal("chatbot", "2.1", SourceKind::Status, "https://status/9")
            .unwrap();
        let ev = fused.event().expect("second distinct source must fuse");
        assert_eq!(ev.trigger, SourceKind::Status);
        assert_eq!(ev.sources, vec![SourceKind::Feed, SourceKind::Status]);
        assert_eq!(ev.evidence, vec!["https://feed/1", "https://status/9"]);
        assert!(acc.bucket("chatbot", "2.1").is_none());
    }

    #[test]
    fn buckets_are_keyed_by_subject_and_version() {
        let (acc, _) = accumulator(2);
        acc.record_signal("a", "1", SourceKind::Github, "g").unwrap();
        let other = acc.record_signal("a", "2", SourceKind::Feed, "f").unwrap();
        assert!(matches!(other, FusionOutcome::Pending { seen: 1, .. }));
        assert_eq!(acc.pending_buckets(), 2);
    }

    #[test]
    fn manual_signal_needs_one_corroboration() {
        let (acc, _) = accumulator(2);
        acc.record_signal("a", "1", SourceKind::Manual, "operator")
            .unwrap();
        let out = acc.record_signal("a", "1", SourceKind::Github, "tag v1").unwrap();
        assert!(out.event().is_some());
    }

    #[test]
    fn malformed_signal_leaves_state_untouched() {
        let (acc, _) = accumulator(2);
        let err = acc
            .record_signal("a", "   ", SourceKind::Feed, "x")
            .unwrap_err();
        assert!(err.is_validation());
        assert_eq!(err.stage, Stage::Watcher);
        assert_eq!(acc.pending_buckets(), 0);
    }

    #[test]
    fn sweep_drops_old_signals_and_empty_buckets() {
        let (acc, clock) = accumulator(3);
        acc.record_signal("a", "1", SourceKind::Feed, "old").unwrap();
        clock.advance(Duration::days(6));
        acc.record_signal("a", "1", SourceKind::Github, "newer").unwrap();
        acc.record_signal("b", "1", SourceKind::Feed, "old-b").unwrap();

        clock.advance(Duration::days(2));
        assert_eq!(acc.sweep_expired(), 1);
        let remaining = acc.bucket("a", "1").unwrap();
        assert_eq!(remaining.sources(), vec![SourceKind::Github]);

        clock.advance(Duration::days(6));
        assert_eq!(acc.sweep_expired(), 2);
        assert_eq!(acc.pending_buckets(), 0);
    }

    #[test]
    fn huge_retention_window_expires_nothing() {
        let acc = SignalAccumulator::with_parts(
            Arc::new(InMemoryFusionStore::new()),
            Arc::new(ManualClock::new(start())),
            FusionSettings {
                threshold: 2,
                retention_hours: u64::MAX,
            },
        );
        acc.record_signal("a", "1", SourceKind::Feed, "https://feed/a").unwrap();
        assert_eq!(acc.sweep_expired(), 0);
        assert_eq!(acc.pending_buckets(), 1);
    }

    #[test]
    fn expired_source_may_report_again() {
        let (acc, clock) = accumulator(2);
        acc.record_signal("a", "1", SourceKind::Feed, "f1").unwrap();
        clock.advance(Duration::days(8));
        acc.sweep_expired();
        let again = acc.record_signal("a", "1", SourceKind::Feed, "f2").unwrap();
        assert_eq!(again, FusionOutcome::Pending { seen: 1, threshold: 2 });
    }

    #[test]
    fn concurrent_recording_emits_exactly_one_event() {
        let store = Arc::new(InMemoryFusionStore::new());
        let sources = [
            SourceKind::Feed,
            SourceKind::Github,
            SourceKind::Status,
            SourceKind::Manual,
        ];
        let handles: Vec<_> = sources
            .iter()
            .map(|src| {
                let store = store.clone();
                let src = *src;
                std::thread::spawn(move || {
                    let signal = Signal {
                        subject_id: "race".into(),
                        version_hint: "1".into(),
                        source: src,
                        evidence_ref: src.to_string(),
                        observed_at: start(),
                    };
                    store.record(signal, 4, start())
                })
            })
            .collect();
        let fused = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|o| o.event().is_some())
            .count();
        assert_eq!(fused, 1);
        assert_eq!(store.pending(), 0);
    }

    const ALL: [SourceKind; 4] = [
        SourceKind::Feed,
        SourceKind::Github,
        SourceKind::Status,
        SourceKind::Manual,
    ];

    proptest! {
        #[test]
        fn fusion_matches_distinct_source_model(
            picks in proptest::collection::vec(0usize..4, 1..24),
            threshold in 1usize..=4,
        ) {
            let (acc, _) = accumulator(threshold);
            let mut model: Vec<SourceKind> = Vec::new();
            for (i, pick) in picks.iter().enumerate() {
                let src = ALL[*pick];
                let out = acc.record_signal("s", "v", src, &format!("ev{}", i)).unwrap();
                if model.contains(&src) {
                    prop_assert_eq!(out, FusionOutcome::Duplicate { source: src });
                    continue;
                }
                model.push(src);
                if model.len() == threshold {
                    let ev = out.into_event().expect("fusion expected");
                    prop_assert_eq!(&ev.sources, &model);
                    prop_assert_eq!(ev.evidence.len(), threshold);
                    prop_assert!(acc.bucket("s", "v").is_none());
                    model.clear();
                } else {
                    prop_assert!(out.event().is_none());
                }
            }
        }
    }
}
