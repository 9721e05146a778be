use std::time::{Duration, Instant};

use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::sync::mpsc::Sender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ble::HeartRateCentral;
use crate::discovery::{select_device, SelectionPolicy};
use crate::error::SessionError;
use crate::session::{NotificationSink, Session, SessionOutcome, SessionReport, SessionState};
use crate::signal::SessionEvent;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub duration: Duration,
    pub policy: SelectionPolicy,
    pub discovery_timeout: Duration,
}

/// Orchestrates one recording session end to end:
/// scan, connect, subscribe, timed wait, unsubscribe, disconnect.
///
/// Every phase is attempted exactly once; failures before recording abort
/// the session, failures during teardown are warnings. Collected samples
/// survive any post-recording failure.
pub struct SessionController<'a> {
    central: &'a dyn HeartRateCentral,
    events: Sender<SessionEvent>,
    session: Session,
}

impl<'a> SessionController<'a> {
    pub fn new(central: &'a dyn HeartRateCentral, events: Sender<SessionEvent>) -> Self {
        Self {
            central,
            events,
            session: Session::new(),
        }
    }

    fn advance(&mut self, next: SessionState) {
        debug!("session state {:?} -> {:?}", self.session.state, next);
        self.session.state = next;
    }

    fn abort(&mut self, err: SessionError) -> SessionError {
        self.advance(SessionState::Aborted);
        err
    }

    async fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event).await;
    }

    /// Runs the session to `Terminated` (or `Aborted`). The cancellation
    /// token only interrupts the recording wait; teardown still runs.
    pub async fn run(
        mut self,
        config: &SessionConfig,
        cancel: CancellationToken,
    ) -> Result<SessionReport, SessionError> {
        if config.duration.is_zero() {
            return Err(self.abort(SessionError::InvalidDuration(
                config.duration.as_secs_f64().to_string(),
            )));
        }

        self.advance(SessionState::Scanning);
        self.emit(SessionEvent::ScanStarted).await;
        let device =
            match select_device(self.central, &config.policy, config.discovery_timeout).await {
                Ok(device) => device,
                Err(err) => {
                    if matches!(err, SessionError::DeviceNotFound) {
                        warn!("is the strap powered, worn and nearby, and Bluetooth enabled?");
                    }
                    return Err(self.abort(err));
                }
            };
        info!("found {}", device.label());
        self.session.device = Some(device.clone());
        self.advance(SessionState::Found);
        self.emit(SessionEvent::DeviceFound {
            device: device.clone(),
        })
        .await;

        self.advance(SessionState::Connecting);
        let mut connection = match self.central.connect(&device).await {
            Ok(connection) => connection,
            Err(err) => return Err(self.abort(err)),
        };
        if !connection.is_connected().await {
            let _ = connection.disconnect().await;
            return Err(self.abort(SessionError::ConnectionFailed(
                "link reported not connected after connect".into(),
            )));
        }

        let mut stream = match connection.subscribe().await {
            Ok(stream) => stream,
            Err(err) => {
                let _ = connection.disconnect().await;
                return Err(self.abort(err));
            }
        };
        self.advance(SessionState::ConnectedSubscribed);
        self.emit(SessionEvent::Connected {
            device: device.clone(),
        })
        .await;

        self.advance(SessionState::Recording);
        self.emit(SessionEvent::RecordingStarted {
            duration: config.duration,
        })
        .await;
        let outcome = pump_notifications(
            &mut stream,
            &mut self.session.recorder,
            &self.events,
            config.duration,
            &cancel,
        )
        .await;
        drop(stream);

        // Teardown is unconditional once recording ends; a failed step never
        // skips the next one and never invalidates the collected samples.
        self.advance(SessionState::Unsubscribing);
        if let Err(err) = connection.unsubscribe().await {
            warn!("unsubscribe failed: {err}");
        }
        if let Err(err) = connection.disconnect().await {
            warn!("disconnect failed: {err}");
        }
        self.advance(SessionState::Disconnected);
        self.advance(SessionState::Terminated);
        self.emit(SessionEvent::RecordingFinished { outcome }).await;

        let dropped = self.session.recorder.dropped();
        Ok(SessionReport {
            device,
            samples: self.session.recorder.into_samples(),
            dropped,
            outcome,
        })
    }
}

/// The recording wait. One task multiplexes the duration timer, the
/// cancellation token and the notification stream, so the sink has exactly
/// one writer and needs no lock.
async fn pump_notifications(
    stream: &mut BoxStream<'static, Vec<u8>>,
    sink: &mut dyn NotificationSink,
    events: &Sender<SessionEvent>,
    duration: Duration,
    cancel: &CancellationToken,
) -> SessionOutcome {
    let timer = tokio::time::sleep(duration);
    tokio::pin!(timer);
    loop {
        tokio::select! {
            _ = &mut timer => return SessionOutcome::Completed,
            _ = cancel.cancelled() => {
                info!("recording interrupted, tearing down");
                return SessionOutcome::Interrupted;
            }
            notification = stream.next() => match notification {
                Some(payload) => {
                    if let Some(sample) = sink.on_sample(&payload, Instant::now()) {
                        let _ = events.send(SessionEvent::HeartRate { sample }).await;
                    }
                }
                None => {
                    warn!("notification stream ended early; keeping collected samples");
                    return SessionOutcome::LinkLost;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use futures::stream;
    use tokio::sync::mpsc;

    use crate::ble::{DeviceIdentity, HeartRateConnection};

    #[derive(Clone, Default)]
    struct TeardownLog(Arc<Mutex<Vec<&'static str>>>);

    impl TeardownLog {
        fn push(&self, step: &'static str) {
            self.0.lock().unwrap().push(step);
        }

        fn steps(&self) -> Vec<&'static str> {
            self.0.lock().unwrap().clone()
        }
    }

    struct ScriptedCentral {
        visible: bool,
        accept_connect: bool,
        report_connected: bool,
        script: Vec<Vec<u8>>,
        endless: bool,
        fail_unsubscribe: bool,
        log: TeardownLog,
    }

    impl Default for ScriptedCentral {
        fn default() -> Self {
            Self {
                visible: true,
                accept_connect: true,
                report_connected: true,
                script: Vec::new(),
                endless: true,
                fail_unsubscribe: false,
                log: TeardownLog::default(),
            }
        }
    }

    fn scripted_identity() -> DeviceIdentity {
        DeviceIdentity {
            address: "11:22:33:44:55:66".into(),
            display_name: Some("HR50 scripted".into()),
        }
    }

    #[async_trait]
    impl HeartRateCentral for ScriptedCentral {
        async fn find_by_address(
            &self,
            _address: &str,
            _timeout: Duration,
        ) -> Result<Option<DeviceIdentity>, SessionError> {
            Ok(self.visible.then(scripted_identity))
        }

        async fn scan(&self, _timeout: Duration) -> Result<Vec<DeviceIdentity>, SessionError> {
            Ok(if self.visible {
                vec![scripted_identity()]
            } else {
                Vec::new()
            })
        }

        async fn connect(
            &self,
            _device: &DeviceIdentity,
        ) -> Result<Box<dyn HeartRateConnection>, SessionError> {
            if !self.accept_connect {
                return Err(SessionError::ConnectionFailed("connect refused".into()));
            }
            Ok(Box::new(ScriptedConnection {
                report_connected: self.report_connected,
                script: self.script.clone(),
                endless: self.endless,
                fail_unsubscribe: self.fail_unsubscribe,
                log: self.log.clone(),
            }))
        }
    }

    struct ScriptedConnection {
        report_connected: bool,
        script: Vec<Vec<u8>>,
        endless: bool,
        fail_unsubscribe: bool,
        log: TeardownLog,
    }

    #[async_trait]
    impl HeartRateConnection for ScriptedConnection {
        async fn is_connected(&self) -> bool {
            self.report_connected
        }

        async fn subscribe(&mut self) -> Result<BoxStream<'static, Vec<u8>>, SessionError> {
            let script = self.script.clone();
            let endless = self.endless;
            let stream = stream::unfold(0usize, move |i| {
                let script = script.clone();
                async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    if i < script.len() {
                        Some((script[i].clone(), i + 1))
                    } else if endless {
                        Some((vec![0x00, 70], i + 1))
                    } else {
                        None
                    }
                }
            });
            Ok(stream.boxed())
        }

        async fn unsubscribe(&mut self) -> Result<(), SessionError> {
            self.log.push("unsubscribe");
            if self.fail_unsubscribe {
                return Err(SessionError::ConnectionFailed("unsubscribe failed".into()));
            }
            Ok(())
        }

        async fn disconnect(&mut self) -> Result<(), SessionError> {
            self.log.push("disconnect");
            Ok(())
        }
    }

    fn config(duration: Duration) -> SessionConfig {
        SessionConfig {
            duration,
            policy: SelectionPolicy::ByName(vec!["HR50".into()]),
            discovery_timeout: Duration::from_millis(10),
        }
    }

    async fn run_session(
        central: &ScriptedCentral,
        duration: Duration,
        cancel: CancellationToken,
    ) -> Result<SessionReport, SessionError> {
        let (tx, _rx) = mpsc::channel(128);
        SessionController::new(central, tx)
            .run(&config(duration), cancel)
            .await
    }

    #[tokio::test]
    async fn zero_duration_is_rejected_before_scanning() {
        let central = ScriptedCentral::default();
        let err = run_session(&central, Duration::ZERO, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::InvalidDuration(_)));
    }

    #[tokio::test]
    async fn missing_device_aborts_with_device_not_found() {
        let central = ScriptedCentral {
            visible: false,
            ..Default::default()
        };
        let err = run_session(&central, Duration::from_millis(100), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::DeviceNotFound));
        // Nothing was connected, so there is nothing to tear down.
        assert!(central.log.steps().is_empty());
    }

    #[tokio::test]
    async fn refused_connect_aborts_with_connection_failed() {
        let central = ScriptedCentral {
            accept_connect: false,
            ..Default::default()
        };
        let err = run_session(&central, Duration::from_millis(100), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::ConnectionFailed(_)));
    }

    #[tokio::test]
    async fn failed_connected_check_aborts_and_releases_link() {
        let central = ScriptedCentral {
            report_connected: false,
            ..Default::default()
        };
        let err = run_session(&central, Duration::from_millis(100), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::ConnectionFailed(_)));
        assert_eq!(central.log.steps(), vec!["disconnect"]);
    }

    #[tokio::test]
    async fn full_session_records_until_the_timer_fires() {
        let central = ScriptedCentral::default();
        let (tx, mut rx) = mpsc::channel(128);
        let report = SessionController::new(&central, tx)
            .run(&config(Duration::from_millis(150)), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.outcome, SessionOutcome::Completed);
        assert!(!report.samples.is_empty());
        assert!(report.samples.iter().all(|s| s.heart_rate_bpm == 70));
        assert_eq!(central.log.steps(), vec!["unsubscribe", "disconnect"]);

        let mut saw_finished = false;
        while let Ok(event) = rx.try_recv() {
            if let SessionEvent::RecordingFinished { outcome } = event {
                saw_finished = true;
                assert_eq!(outcome, SessionOutcome::Completed);
            }
        }
        assert!(saw_finished);
    }

    #[tokio::test]
    async fn link_drop_keeps_samples_and_still_tears_down() {
        let central = ScriptedCentral {
            script: vec![
                vec![0x00, 61],
                vec![0x01, 62], // truncated 16-bit payload, dropped
                vec![0x00, 63],
                vec![0x00, 64],
            ],
            endless: false,
            ..Default::default()
        };
        let report = run_session(&central, Duration::from_secs(10), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.outcome, SessionOutcome::LinkLost);
        assert_eq!(report.heart_rates(), vec![61, 63, 64]);
        assert_eq!(report.dropped, 1);
        assert_eq!(central.log.steps(), vec!["unsubscribe", "disconnect"]);
    }

    #[tokio::test]
    async fn cancellation_interrupts_recording_but_not_teardown() {
        let central = ScriptedCentral::default();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(80)).await;
            trigger.cancel();
        });

        let report = run_session(&central, Duration::from_secs(10), cancel)
            .await
            .unwrap();
        assert_eq!(report.outcome, SessionOutcome::Interrupted);
        assert_eq!(central.log.steps(), vec!["unsubscribe", "disconnect"]);
    }

    #[tokio::test]
    async fn unsubscribe_failure_never_skips_disconnect() {
        let central = ScriptedCentral {
            script: vec![vec![0x00, 66]],
            endless: false,
            fail_unsubscribe: true,
            ..Default::default()
        };
        let report = run_session(&central, Duration::from_secs(10), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.heart_rates(), vec![66]);
        assert_eq!(central.log.steps(), vec!["unsubscribe", "disconnect"]);
    }
}
