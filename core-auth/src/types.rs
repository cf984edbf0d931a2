use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier of one logical call through the gateway.
///
/// A replay keeps the id of the request it replays, so logs and events for
/// both attempts correlate.
///
/// # Examples
///
/// ```
/// use core_auth::RequestId;
///
/// let id = RequestId::from_string("550e8400-e29b-41d4-a716-446655440000").unwrap();
/// assert_eq!(id.to_string(), "550e8400-e29b-41d4-a716-446655440000");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque bearer credential with an optional expiry hint.
///
/// The token value never shows up in `Debug` output. Two credentials are
/// equal when both the token and the hint match.
///
/// # Examples
///
/// ```
/// use core_auth::Credential;
///
/// let credential = Credential::expiring_in("T1", 3600);
/// assert_eq!(credential.token(), "T1");
/// assert!(!credential.is_expired_with_buffer(60));
/// assert!(!format!("{:?}", credential).contains("T1"));
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    token: String,
    expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    /// A credential without an expiry hint.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            expires_at: None,
        }
    }

    /// A credential the issuer says is valid for `expires_in` seconds.
    ///
    /// The value comes from the token endpoint and is not trusted: when
    /// `now + expires_in` is not a representable instant the hint is dropped
    /// and the credential behaves like one built with [`Credential::new`].
    pub fn expiring_in(token: impl Into<String>, expires_in: i64) -> Self {
        let expires_at = Duration::try_seconds(expires_in)
            .and_then(|lifetime| Utc::now().checked_add_signed(lifetime));
        Self {
            token: token.into(),
            expires_at,
        }
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// Expiry hint as Unix epoch seconds, for events.
    pub fn expires_at_timestamp(&self) -> Option<i64> {
        self.expires_at.map(|at| at.timestamp())
    }

    /// Whether the hint says the credential expires within `buffer_seconds`.
    ///
    /// A credential without a hint is never considered expired; the API's
    /// answer is authoritative.
    pub fn is_expired_with_buffer(&self, buffer_seconds: i64) -> bool {
        let Some(expires_at) = self.expires_at else {
            return false;
        };
        let threshold = Duration::try_seconds(buffer_seconds)
            .and_then(|buffer| expires_at.checked_sub_signed(buffer));
        match threshold {
            Some(threshold) => Utc::now() >= threshold,
            // A buffer wider than the calendar covers any hint.
            None => buffer_seconds > 0,
        }
    }

    /// Time left until the hinted expiry. `None` when expired or unknown.
    pub fn time_until_expiry(&self) -> Option<Duration> {
        let expires_at = self.expires_at?;
        let now = Utc::now();
        (now < expires_at).then(|| expires_at - now)
    }
}

// Custom Debug implementation to avoid logging tokens
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_id_creation() {
        let id1 = RequestId::new();
        let id2 = RequestId::new();
        assert_ne!(id1, id2, "Request IDs should be unique");
    }

    #[test]
    fn test_request_id_from_string_invalid() {
        assert!(RequestId::from_string("not-a-uuid").is_err());
    }

    #[test]
    fn test_credential_without_hint_never_expires() {
        let credential = Credential::new("T1");
        assert!(credential.expires_at().is_none());
        assert!(!credential.is_expired_with_buffer(i64::from(u32::MAX)));
        assert!(credential.time_until_expiry().is_none());
    }

    #[test]
    fn test_credential_expiry_with_buffer() {
        let credential = Credential::new("T1").with_expiry(Utc::now() + Duration::minutes(2));
        assert!(!credential.is_expired_with_buffer(60));
        assert!(credential.is_expired_with_buffer(300));
        assert!(credential.time_until_expiry().is_some());
    }

    #[test]
    fn test_credential_expired() {
        let credential = Credential::new("T1").with_expiry(Utc::now() - Duration::hours(1));
        assert!(credential.is_expired_with_buffer(0));
        assert!(credential.time_until_expiry().is_none());
    }

    #[test]
    fn test_out_of_range_lifetime_drops_hint() {
        let credential = Credential::expiring_in("T1", i64::MAX);
        assert_eq!(credential.token(), "T1");
        assert!(credential.expires_at().is_none());
        assert!(!credential.is_expired_with_buffer(60));

        assert!(Credential::expiring_in("T1", i64::MIN).expires_at().is_none());
    }

    #[test]
    fn test_huge_buffer_does_not_overflow() {
        let credential = Credential::expiring_in("T1", 3600);
        assert!(credential.is_expired_with_buffer(i64::MAX));
        assert!(!credential.is_expired_with_buffer(i64::MIN));
    }

    #[test]
    fn test_credential_equality() {
        assert_eq!(Credential::new("T1"), Credential::new("T1"));
        assert_ne!(Credential::new("T1"), Credential::new("T2"));
    }

    #[test]
    fn test_credential_debug_redacts() {
        let credential = Credential::expiring_in("secret_access_token", 60);
        let debug_str = format!("{:?}", credential);
        assert!(debug_str.contains("[REDACTED]"));
        assert!(!debug_str.contains("secret_access_token"));
    }
}
