//! Round-trip latency from ping/pong pairs.
//!
//! A pong carries the sender's own ping timestamp `t0`, so latency is
//! `now_unix - t0` on the sender's clock. Samples are handed to a
//! [`TelemetrySink`] and not retained here.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::frame::payload_timestamp;
use crate::ids::ConnectionId;
use crate::metrics::CONNECTION_LATENCY_SECONDS;

/// Identifier map attached to every sample (e.g. `user_id`).
pub type Identifiers = BTreeMap<String, String>;

/// One completed round trip.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LatencySample {
    /// Connection the round trip happened on.
    pub connection_id: ConnectionId,
    /// Seconds; negative under clock skew.
    pub value: f64,
    /// Wall-clock seconds since the Unix epoch when recorded.
    pub recorded_at: f64,
    /// Identifiers of the connection's owner.
    pub identifiers: Identifiers,
}

/// Destination for latency samples.
pub trait TelemetrySink: Send + Sync + fmt::Debug {
    /// Consume one sample.
    fn record_latency(&self, sample: &LatencySample);
}

/// Logs `connection.latency` and feeds the latency histogram.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingTelemetry;

impl TelemetrySink for TracingTelemetry {
    fn record_latency(&self, sample: &LatencySample) {
        info!(
            event = "connection.latency",
            value = sample.value,
            connection_identifier = %sample.connection_id,
            identifiers = ?sample.identifiers,
            "latency sample"
        );
        metrics::histogram!(CONNECTION_LATENCY_SECONDS).record(sample.value);
    }
}

/// Keeps samples in memory. Used by tests and the probe command.
#[derive(Debug, Default)]
pub struct MemoryTelemetry {
    samples: Mutex<Vec<LatencySample>>,
}

impl MemoryTelemetry {
    /// Empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far.
    pub fn samples(&self) -> Vec<LatencySample> {
        self.samples.lock().clone()
    }

    /// Number of samples recorded.
    pub fn len(&self) -> usize {
        self.samples.lock().len()
    }

    /// Whether nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.samples.lock().is_empty()
    }
}

impl TelemetrySink for MemoryTelemetry {
    fn record_latency(&self, sample: &LatencySample) {
        self.samples.lock().push(sample.clone());
    }
}

/// What to do with a negative latency (clock skew).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NegativeLatencyPolicy {
    /// Log a warning and emit the sample anyway.
    #[default]
    Emit,
    /// Log a warning and drop the sample.
    Discard,
}

/// Turns pong payloads into latency samples.
#[derive(Clone, Debug)]
pub struct LatencyRecorder {
    sink: Arc<dyn TelemetrySink>,
    clock: Arc<dyn Clock>,
    policy: NegativeLatencyPolicy,
}

impl LatencyRecorder {
    /// Recorder emitting to `sink`, reading time from `clock`.
    pub fn new(
        sink: Arc<dyn TelemetrySink>,
        clock: Arc<dyn Clock>,
        policy: NegativeLatencyPolicy,
    ) -> Self {
        Self {
            sink,
            clock,
            policy,
        }
    }

    /// The clock pings should be stamped with.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Record a pong payload. Non-numeric payloads yield no sample.
    pub fn record(
        &self,
        connection_id: &ConnectionId,
        identifiers: &Identifiers,
        payload: &RawValue,
    ) -> Option<LatencySample> {
        let Some(t0) = payload_timestamp(payload) else {
            debug!(conn_id = %connection_id, payload = payload.get(), "pong payload is not a timestamp");
            return None;
        };
        self.record_timestamp(connection_id, identifiers, t0)
    }

    /// Record a round trip that started at `t0` (Unix seconds).
    pub fn record_timestamp(
        &self,
        connection_id: &ConnectionId,
        identifiers: &Identifiers,
        t0: f64,
    ) -> Option<LatencySample> {
        let now = self.clock.unix_now();
        let value = now - t0;
        if value < 0.0 {
            warn!(
                conn_id = %connection_id,
                latency = value,
                policy = ?self.policy,
                "negative latency, clocks are skewed"
            );
            if self.policy == NegativeLatencyPolicy::Discard {
                return None;
            }
        }
        let sample = LatencySample {
            connection_id: connection_id.clone(),
            value,
            recorded_at: now,
            identifiers: identifiers.clone(),
        };
        self.sink.record_latency(&sample);
        Some(sample)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn recorder(
        now: f64,
        policy: NegativeLatencyPolicy,
    ) -> (LatencyRecorder, Arc<MemoryTelemetry>, Arc<ManualClock>) {
        let sink = Arc::new(MemoryTelemetry::new());
        let clock = Arc::new(ManualClock::new(now));
        let rec = LatencyRecorder::new(sink.clone(), clock.clone(), policy);
        (rec, sink, clock)
    }

    fn raw(s: &str) -> Box<RawValue> {
        RawValue::from_string(s.to_owned()).unwrap()
    }

    fn ids() -> Identifiers {
        Identifiers::from([("user_id".to_owned(), "42".to_owned())])
    }

    #[test]
    fn records_one_sample_per_pong() {
        let (rec, sink, _clock) = recorder(1000.050, NegativeLatencyPolicy::Emit);
        let conn = ConnectionId::from("conn_a");
        let sample = rec.record(&conn, &ids(), &raw("1000.000")).unwrap();

        assert!((sample.value - 0.050).abs() < 1e-9);
        assert_eq!(sample.connection_id, conn);
        assert_eq!(sample.identifiers, ids());
        assert_eq!(sink.len(), 1);
        assert_eq!(sink.samples()[0], sample);
    }

    #[test]
    fn negative_latency_emitted_by_default() {
        let (rec, sink, _clock) = recorder(999.0, NegativeLatencyPolicy::Emit);
        let sample = rec
            .record(&ConnectionId::from("c"), &Identifiers::new(), &raw("1000.0"))
            .unwrap();
        assert!(sample.value < 0.0);
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn negative_latency_discarded_when_configured() {
        let (rec, sink, _clock) = recorder(999.0, NegativeLatencyPolicy::Discard);
        let out = rec.record(&ConnectionId::from("c"), &Identifiers::new(), &raw("1000.0"));
        assert!(out.is_none());
        assert!(sink.is_empty());
    }

    #[test]
    fn non_numeric_payload_yields_nothing() {
        let (rec, sink, _clock) = recorder(1000.0, NegativeLatencyPolicy::Emit);
        let out = rec.record(&ConnectionId::from("c"), &Identifiers::new(), &raw(r#""nonce-1""#));
        assert!(out.is_none());
        assert!(sink.is_empty());
    }

    #[test]
    fn uses_clock_at_pong_time() {
        let (rec, sink, clock) = recorder(10.0, NegativeLatencyPolicy::Emit);
        clock.advance(0.25);
        rec.record_timestamp(&ConnectionId::from("c"), &Identifiers::new(), 10.0);
        let samples = sink.samples();
        assert!((samples[0].value - 0.25).abs() < 1e-9);
        assert!((samples[0].recorded_at - 10.25).abs() < 1e-9);
    }

    #[test]
    fn tracing_sink_does_not_panic_without_recorder() {
        TracingTelemetry.record_latency(&LatencySample {
            connection_id: ConnectionId::from("c"),
            value: 0.01,
            recorded_at: 1.0,
            identifiers: ids(),
        });
    }

    #[test]
    fn policy_serde_names() {
        let p: NegativeLatencyPolicy = serde_json::from_str(r#""discard""#).unwrap();
        assert_eq!(p, NegativeLatencyPolicy::Discard);
        assert_eq!(NegativeLatencyPolicy::default(), NegativeLatencyPolicy::Emit);
    }
}
