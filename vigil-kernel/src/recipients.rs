/**
 * RECIPIENT REGISTRY - Push destinations for alarm fan-out
 *
 * ROLE: Tracks the phone tokens that want alarms. Tokens are classified once
 * at the registry boundary: Expo-shaped tokens can be pushed through the
 * gateway, "local-" tokens are a degraded mode where the app must be in the
 * foreground and self-simulates the alarm, so they are tracked but never
 * dispatched to.
 */

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TokenCapability {
    /// Reachable through the push gateway while the app is backgrounded.
    #[serde(rename = "expo")]
    RemotePush,
    /// Foreground-only fallback identifier, excluded from dispatch.
    #[serde(rename = "local")]
    LocalOnly,
}

#[derive(Debug, Clone)]
pub struct Recipient {
    pub token: String,
    pub capability: TokenCapability,
    pub platform: Option<String>,
    pub device_id: Option<String>,
    pub registered_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct Registration {
    pub capability: TokenCapability,
    pub total: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum RecipientError {
    #[error("token must be an Expo push token or a local token (local-...)")]
    InvalidToken,
}

/// Shape check matching the Expo SDK's token predicate.
fn is_expo_push_token(token: &str) -> bool {
    for prefix in ["ExponentPushToken[", "ExpoPushToken["] {
        if token.starts_with(prefix) && token.ends_with(']') && token.len() > prefix.len() + 1 {
            return true;
        }
    }
    false
}

/// Classify a raw token, or reject it for both delivery classes.
pub fn classify_token(token: &str) -> Result<TokenCapability, RecipientError> {
    if is_expo_push_token(token) {
        Ok(TokenCapability::RemotePush)
    } else if token.starts_with("local-") {
        Ok(TokenCapability::LocalOnly)
    } else {
        Err(RecipientError::InvalidToken)
    }
}

#[derive(Clone)]
pub struct RecipientRegistry {
    recipients: Arc<Mutex<HashMap<String, Recipient>>>,
}

impl RecipientRegistry {
    pub fn new() -> Self {
        Self { recipients: Arc::new(Mutex::new(HashMap::new())) }
    }

    /// Idempotent: re-registering an existing token is a no-op success.
    pub fn register(
        &self,
        token: &str,
        platform: Option<String>,
        device_id: Option<String>,
    ) -> Result<Registration, RecipientError> {
        let capability = classify_token(token)?;
        let mut map = self.recipients.lock();
        map.entry(token.to_string()).or_insert_with(|| Recipient {
            token: token.to_string(),
            capability,
            platform,
            device_id,
            registered_at: OffsetDateTime::now_utc(),
        });
        Ok(Registration { capability, total: map.len() })
    }

    /// Idempotent removal, absent tokens are not an error.
    pub fn unregister(&self, token: &str) -> usize {
        let mut map = self.recipients.lock();
        map.remove(token);
        map.len()
    }

    /// Tokens eligible for outbound dispatch (LocalOnly excluded).
    pub fn list_remote_push(&self) -> Vec<String> {
        self.recipients
            .lock()
            .values()
            .filter(|r| r.capability == TokenCapability::RemotePush)
            .map(|r| r.token.clone())
            .collect()
    }

    pub fn list_all(&self) -> Vec<Recipient> {
        self.recipients.lock().values().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.recipients.lock().len()
    }

    pub fn local_count(&self) -> usize {
        self.recipients
            .lock()
            .values()
            .filter(|r| r.capability == TokenCapability::LocalOnly)
            .count()
    }
}
