//! Credential refresh strategies.
//!
//! A [`TokenRefresher`] produces a new credential or a classified
//! [`RefreshFailure`]. Strategies:
//!
//! - [`SilentRefresher`](crate::oauth::SilentRefresher): OAuth2 refresh-token grant
//! - [`InteractiveRefresher`]: asks a human through a host [`LoginPrompt`]
//! - [`FallbackRefresher`]: tries one strategy, then another
//!
//! Refreshers must not send their own requests through the gateway; each
//! owns whatever transport it needs.

use crate::error::RefreshFailure;
use crate::types::Credential;
use async_trait::async_trait;
use bridge_traits::error::BridgeError;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Result of one refresh attempt, shared by every request waiting on it.
pub type RefreshOutcome = std::result::Result<Credential, RefreshFailure>;

#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self) -> RefreshOutcome;

    /// Short name used in logs.
    fn name(&self) -> &'static str {
        "refresher"
    }
}

/// Host-provided login UI.
///
/// Resolves with `Ok(None)` when the user cancels.
#[async_trait]
pub trait LoginPrompt: Send + Sync {
    async fn prompt(&self) -> std::result::Result<Option<Credential>, BridgeError>;
}

/// Refresh by asking the user to sign in again.
pub struct InteractiveRefresher {
    prompt: Arc<dyn LoginPrompt>,
}

impl InteractiveRefresher {
    pub fn new(prompt: Arc<dyn LoginPrompt>) -> Self {
        Self { prompt }
    }
}

#[async_trait]
impl TokenRefresher for InteractiveRefresher {
    #[instrument(skip(self))]
    async fn refresh(&self) -> RefreshOutcome {
        match self.prompt.prompt().await {
            Ok(Some(credential)) => {
                info!("Interactive sign-in completed");
                Ok(credential)
            }
            Ok(None) => {
                info!("Interactive sign-in cancelled");
                Err(RefreshFailure::InteractiveAuthRequired(
                    "sign-in was cancelled".to_string(),
                ))
            }
            Err(e) => {
                warn!(error = %e, "Login prompt failed");
                Err(RefreshFailure::InteractiveAuthRequired(format!(
                    "login prompt failed: {}",
                    e
                )))
            }
        }
    }

    fn name(&self) -> &'static str {
        "interactive"
    }
}

/// Runs `secondary` when `primary` fails with `RefreshDenied` or
/// `NetworkFailure`.
///
/// A secondary success wins. A secondary failure is returned as is, except
/// after a primary denial: the stored credential is still unusable then, so
/// the chain reports `RefreshDenied` and the coordinator clears the store.
///
/// The usual chain is silent first, interactive second.
pub struct FallbackRefresher {
    primary: Arc<dyn TokenRefresher>,
    secondary: Arc<dyn TokenRefresher>,
}

impl FallbackRefresher {
    pub fn new(primary: Arc<dyn TokenRefresher>, secondary: Arc<dyn TokenRefresher>) -> Self {
        Self { primary, secondary }
    }
}

#[async_trait]
impl TokenRefresher for FallbackRefresher {
    #[instrument(skip(self), fields(primary = self.primary.name(), secondary = self.secondary.name()))]
    async fn refresh(&self) -> RefreshOutcome {
        match self.primary.refresh().await {
            Ok(credential) => Ok(credential),
            Err(failure @ RefreshFailure::InteractiveAuthRequired(_)) => Err(failure),
            Err(failure) => {
                info!(
                    kind = %failure.kind(),
                    "Primary refresh failed, falling back"
                );
                match (failure, self.secondary.refresh().await) {
                    (_, Ok(credential)) => Ok(credential),
                    (RefreshFailure::RefreshDenied(denied), Err(next)) => {
                        warn!(secondary = %next, "Fallback failed after refresh denial");
                        Err(RefreshFailure::RefreshDenied(format!(
                            "{}; fallback: {}",
                            denied,
                            next.message()
                        )))
                    }
                    (_, Err(next)) => Err(next),
                }
            }
        }
    }

    fn name(&self) -> &'static str {
        "fallback"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::mock;

    mock! {
        pub Refresher {}

        #[async_trait]
        impl TokenRefresher for Refresher {
            async fn refresh(&self) -> RefreshOutcome;
        }
    }

    mock! {
        pub Prompt {}

        #[async_trait]
        impl LoginPrompt for Prompt {
            async fn prompt(&self) -> std::result::Result<Option<Credential>, BridgeError>;
        }
    }

    fn refresher_returning(outcome: RefreshOutcome, times: usize) -> Arc<dyn TokenRefresher> {
        let mut mock = MockRefresher::new();
        mock.expect_refresh()
            .times(times)
            .returning(move || outcome.clone());
        Arc::new(mock)
    }

    #[tokio::test]
    async fn test_interactive_success() {
        let mut prompt = MockPrompt::new();
        prompt
            .expect_prompt()
            .times(1)
            .returning(|| Ok(Some(Credential::new("T2"))));

        let refresher = InteractiveRefresher::new(Arc::new(prompt));
        assert_eq!(refresher.refresh().await, Ok(Credential::new("T2")));
    }

    #[tokio::test]
    async fn test_interactive_cancel_requires_interaction() {
        let mut prompt = MockPrompt::new();
        prompt.expect_prompt().times(1).returning(|| Ok(None));

        let refresher = InteractiveRefresher::new(Arc::new(prompt));
        let failure = refresher.refresh().await.unwrap_err();
        assert!(matches!(failure, RefreshFailure::InteractiveAuthRequired(_)));
    }

    #[tokio::test]
    async fn test_interactive_prompt_error() {
        let mut prompt = MockPrompt::new();
        prompt
            .expect_prompt()
            .times(1)
            .returning(|| Err(BridgeError::NotAvailable("no display".into())));

        let refresher = InteractiveRefresher::new(Arc::new(prompt));
        let failure = refresher.refresh().await.unwrap_err();
        assert!(failure.message().contains("no display"));
    }

    #[tokio::test]
    async fn test_fallback_not_used_on_success() {
        let refresher = FallbackRefresher::new(
            refresher_returning(Ok(Credential::new("T1")), 1),
            refresher_returning(Ok(Credential::new("unused")), 0),
        );
        assert_eq!(refresher.refresh().await, Ok(Credential::new("T1")));
    }

    #[tokio::test]
    async fn test_fallback_after_denial() {
        let refresher = FallbackRefresher::new(
            refresher_returning(Err(RefreshFailure::RefreshDenied("invalid_grant".into())), 1),
            refresher_returning(Ok(Credential::new("T2")), 1),
        );
        assert_eq!(refresher.refresh().await, Ok(Credential::new("T2")));
    }

    #[tokio::test]
    async fn test_fallback_after_network_failure_returns_secondary_outcome() {
        let refresher = FallbackRefresher::new(
            refresher_returning(Err(RefreshFailure::NetworkFailure("reset".into())), 1),
            refresher_returning(
                Err(RefreshFailure::InteractiveAuthRequired("cancelled".into())),
                1,
            ),
        );
        let failure = refresher.refresh().await.unwrap_err();
        assert!(matches!(failure, RefreshFailure::InteractiveAuthRequired(_)));
    }

    #[tokio::test]
    async fn test_cancelled_prompt_after_denial_stays_denied() {
        let mut prompt = MockPrompt::new();
        prompt.expect_prompt().times(1).returning(|| Ok(None));

        let refresher = FallbackRefresher::new(
            refresher_returning(Err(RefreshFailure::RefreshDenied("invalid_grant".into())), 1),
            Arc::new(InteractiveRefresher::new(Arc::new(prompt))),
        );

        let failure = refresher.refresh().await.unwrap_err();
        assert!(matches!(failure, RefreshFailure::RefreshDenied(_)));
        assert!(failure.message().contains("invalid_grant"));
        assert!(failure.message().contains("cancelled"));
    }

    #[tokio::test]
    async fn test_fallback_keeps_interactive_requirement() {
        let refresher = FallbackRefresher::new(
            refresher_returning(
                Err(RefreshFailure::InteractiveAuthRequired("cancelled".into())),
                1,
            ),
            refresher_returning(Ok(Credential::new("unused")), 0),
        );
        assert!(refresher.refresh().await.is_err());
    }
}
