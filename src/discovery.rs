use std::time::Duration;

use tracing::info;

use crate::ble::{DeviceIdentity, HeartRateCentral};
use crate::error::SessionError;

pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(20);

/// How the session picks its peripheral. Exactly one policy per invocation.
#[derive(Debug, Clone)]
pub enum SelectionPolicy {
    /// Scan for a specific known address.
    ByAddress(String),
    /// Full discovery pass; first advertisement whose name contains any of
    /// these tokens, case-insensitively.
    ByName(Vec<String>),
}

/// Resolves the selection policy to exactly one device identity.
///
/// Name matching keeps the scanner's arrival order; ties go to whichever
/// advertisement arrived first, which is not guaranteed stable across runs.
pub async fn select_device(
    central: &dyn HeartRateCentral,
    policy: &SelectionPolicy,
    timeout: Duration,
) -> Result<DeviceIdentity, SessionError> {
    match policy {
        SelectionPolicy::ByAddress(address) => {
            info!("scanning for {address}");
            central
                .find_by_address(address, timeout)
                .await?
                .ok_or(SessionError::DeviceNotFound)
        }
        SelectionPolicy::ByName(tokens) => {
            info!("scanning for a device named like {tokens:?}");
            let advertisements = central.scan(timeout).await?;
            advertisements
                .into_iter()
                .find(|adv| name_matches(adv, tokens))
                .ok_or(SessionError::DeviceNotFound)
        }
    }
}

fn name_matches(advertisement: &DeviceIdentity, tokens: &[String]) -> bool {
    let Some(name) = advertisement.display_name.as_deref() else {
        return false;
    };
    if name.is_empty() {
        return false;
    }
    let name = name.to_uppercase();
    tokens.iter().any(|token| name.contains(&token.to_uppercase()))
}
