use std::time::Instant;

use tracing::warn;

use crate::ble::DeviceIdentity;
use crate::decode::decode_heart_rate;

/// One decoded heart-rate reading, timestamped relative to the session anchor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub elapsed_seconds: f64,
    pub heart_rate_bpm: u16,
}

/// Where notification payloads land. Injected into the record loop so the
/// decode/record logic is independent of any particular BLE binding's
/// callback shape.
pub trait NotificationSink {
    fn on_sample(&mut self, payload: &[u8], observed_at: Instant) -> Option<Sample>;
}

/// Append-only sample log. The anchor is set by the first successfully
/// decoded notification; all elapsed values are relative to it.
#[derive(Debug, Default)]
pub struct SampleRecorder {
    anchor: Option<Instant>,
    samples: Vec<Sample>,
    dropped: usize,
}

impl SampleRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes and appends one notification. A malformed payload is dropped
    /// with a warning and leaves the anchor and the log untouched.
    pub fn record(&mut self, payload: &[u8], observed_at: Instant) -> Option<Sample> {
        let bpm = match decode_heart_rate(payload) {
            Ok(bpm) => bpm,
            Err(err) => {
                self.dropped += 1;
                warn!(payload = ?payload, "dropping notification: {err}");
                return None;
            }
        };

        let anchor = *self.anchor.get_or_insert(observed_at);
        let sample = Sample {
            elapsed_seconds: observed_at.saturating_duration_since(anchor).as_secs_f64(),
            heart_rate_bpm: bpm,
        };
        self.samples.push(sample);
        Some(sample)
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn anchor(&self) -> Option<Instant> {
        self.anchor
    }

    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn into_samples(self) -> Vec<Sample> {
        self.samples
    }
}

impl NotificationSink for SampleRecorder {
    fn on_sample(&mut self, payload: &[u8], observed_at: Instant) -> Option<Sample> {
        self.record(payload, observed_at)
    }
}

/// Session lifecycle states. `Aborted` is terminal and reachable from any
/// non-terminal state on unrecoverable failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Scanning,
    Found,
    Connecting,
    ConnectedSubscribed,
    Recording,
    Unsubscribing,
    Disconnected,
    Terminated,
    Aborted,
}

/// The single mutable aggregate of a recording session. Owned exclusively by
/// the controller until teardown, then handed off as a `SessionReport`.
#[derive(Debug)]
pub struct Session {
    pub device: Option<DeviceIdentity>,
    pub state: SessionState,
    pub recorder: SampleRecorder,
}

impl Session {
    pub fn new() -> Self {
        Self {
            device: None,
            state: SessionState::Idle,
            recorder: SampleRecorder::new(),
        }
    }
}

/// How the recording phase ended. Aborts before recording surface as errors
/// instead; all of these keep whatever samples were collected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The requested duration elapsed.
    Completed,
    /// The caller cancelled the recording wait.
    Interrupted,
    /// The notification stream ended before the duration elapsed.
    LinkLost,
}

/// Read-only result of a terminated session.
#[derive(Debug)]
pub struct SessionReport {
    pub device: DeviceIdentity,
    pub samples: Vec<Sample>,
    pub dropped: usize,
    pub outcome: SessionOutcome,
}

impl SessionReport {
    /// The exported time series for downstream consumers (plotting etc).
    pub fn export(&self) -> Vec<(f64, u16)> {
        self.samples
            .iter()
            .map(|s| (s.elapsed_seconds, s.heart_rate_bpm))
            .collect()
    }

    pub fn heart_rates(&self) -> Vec<u16> {
        self.samples.iter().map(|s| s.heart_rate_bpm).collect()
    }
}
