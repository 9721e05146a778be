use std::time::Duration;

use crate::ble::DeviceIdentity;
use crate::session::{Sample, SessionOutcome};

/// Progress events streamed from the session controller to the consumer
/// (the CLI printer here, but anything reading the channel works).
#[derive(Debug, Clone)]
pub enum SessionEvent {
    ScanStarted,
    DeviceFound { device: DeviceIdentity },
    Connected { device: DeviceIdentity },
    RecordingStarted { duration: Duration },
    HeartRate { sample: Sample },
    RecordingFinished { outcome: SessionOutcome },
}
