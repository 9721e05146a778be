//! Simulated strap for running sessions without hardware (`--fake`) and for
//! exercising the pipeline in tests.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream;
use futures::stream::BoxStream;
use futures::StreamExt;
use rand::Rng;

use crate::ble::{DeviceIdentity, HeartRateCentral, HeartRateConnection};
use crate::error::SessionError;

const NOTIFY_INTERVAL: Duration = Duration::from_millis(800);

fn identity(address: &str) -> DeviceIdentity {
    DeviceIdentity {
        address: address.to_string(),
        display_name: Some("HR50 (simulated)".to_string()),
    }
}

/// A central that always finds exactly one simulated strap.
pub struct FakeCentral;

#[async_trait]
impl HeartRateCentral for FakeCentral {
    async fn find_by_address(
        &self,
        address: &str,
        _timeout: Duration,
    ) -> Result<Option<DeviceIdentity>, SessionError> {
        Ok(Some(identity(address)))
    }

    async fn scan(&self, _timeout: Duration) -> Result<Vec<DeviceIdentity>, SessionError> {
        Ok(vec![identity("00:00:00:00:00:01")])
    }

    async fn connect(
        &self,
        _device: &DeviceIdentity,
    ) -> Result<Box<dyn HeartRateConnection>, SessionError> {
        Ok(Box::new(FakeConnection))
    }
}

pub struct FakeConnection;

#[async_trait]
impl HeartRateConnection for FakeConnection {
    async fn is_connected(&self) -> bool {
        true
    }

    async fn subscribe(&mut self) -> Result<BoxStream<'static, Vec<u8>>, SessionError> {
        let stream = stream::unfold((), |()| async {
            tokio::time::sleep(NOTIFY_INTERVAL).await;
            Some((fake_payload(), ()))
        });
        Ok(stream.boxed())
    }

    async fn unsubscribe(&mut self) -> Result<(), SessionError> {
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), SessionError> {
        Ok(())
    }
}

/// Mostly 8-bit readings in a resting band, sometimes the 16-bit format,
/// rarely a truncated payload so the recorder's recovery path gets traffic.
fn fake_payload() -> Vec<u8> {
    let mut rng = rand::thread_rng();
    let bpm: u8 = rng.gen_range(50..70);
    match rng.gen_range(0..20) {
        0 => vec![0x01, bpm],
        1..=3 => vec![0x01, bpm, 0x00],
        _ => vec![0x00, bpm],
    }
}
