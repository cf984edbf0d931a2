//! Single-Flight Refresh Coordination
//!
//! When many requests discover a rejected credential at the same time, only
//! one of them starts a refresh; the rest join it and observe the same
//! outcome.
//!
//! ## Lifecycle of a ticket
//!
//! ```text
//! acquire (slot empty) ──> spawn refresh ──> slot = InFlight(ticket)
//! acquire (slot busy)  ──> join InFlight(ticket)
//! refresh finishes     ──> update TokenStore ──> retire ticket ──> wake waiters
//! ```
//!
//! The refresh runs on its own task, so dropping the caller that started it
//! does not cancel it for the others. The token store is updated before
//! the ticket resolves, so every replay dispatched after resolution sees the
//! new credential. Outcomes are not cached: the first failure after a ticket
//! retires starts a fresh refresh. A refresher that panics retires its ticket
//! the same way, with a `NetworkFailure` outcome.

use crate::error::RefreshFailure;
use crate::refresher::{RefreshOutcome, TokenRefresher};
use crate::token_store::TokenStore;
use crate::types::Credential;
use core_runtime::config::DEFAULT_REFRESH_TIMEOUT;
use core_runtime::events::{AuthEvent, CoreEvent, EventBus};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

type SharedOutcome = Shared<BoxFuture<'static, RefreshOutcome>>;

#[derive(Clone)]
struct InFlight {
    ticket: u64,
    outcome: SharedOutcome,
}

enum TicketState {
    Pending(SharedOutcome),
    Ready(RefreshOutcome),
}

/// Handle on a refresh outcome.
///
/// Every ticket for the same refresh resolves to an identical outcome.
pub struct Ticket {
    id: u64,
    leader: bool,
    state: TicketState,
}

impl Ticket {
    /// Refresh operation this ticket belongs to.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether this ticket started the refresh.
    pub fn is_leader(&self) -> bool {
        self.leader
    }

    /// Wait for the outcome.
    pub async fn resolve(self) -> RefreshOutcome {
        match self.state {
            TicketState::Pending(outcome) => outcome.await,
            TicketState::Ready(outcome) => outcome,
        }
    }
}

impl std::fmt::Debug for Ticket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ticket")
            .field("id", &self.id)
            .field("leader", &self.leader)
            .field("ready", &matches!(self.state, TicketState::Ready(_)))
            .finish()
    }
}

/// Deduplicates concurrent refreshes into one call to the [`TokenRefresher`].
///
/// On success the new credential is stored; on `RefreshDenied` the store is
/// cleared. Other failures leave the store untouched.
#[derive(Clone)]
pub struct RefreshCoordinator {
    refresher: Arc<dyn TokenRefresher>,
    token_store: TokenStore,
    event_bus: Option<EventBus>,
    refresh_timeout: Duration,
    slot: Arc<Mutex<Option<InFlight>>>,
    last_ticket: Arc<AtomicU64>,
}

impl RefreshCoordinator {
    pub fn new(refresher: Arc<dyn TokenRefresher>, token_store: TokenStore) -> Self {
        Self {
            refresher,
            token_store,
            event_bus: None,
            refresh_timeout: DEFAULT_REFRESH_TIMEOUT,
            slot: Arc::new(Mutex::new(None)),
            last_ticket: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Upper bound on one refresh; exceeding it yields `NetworkFailure`.
    pub fn with_refresh_timeout(mut self, refresh_timeout: Duration) -> Self {
        self.refresh_timeout = refresh_timeout;
        self
    }

    pub fn token_store(&self) -> &TokenStore {
        &self.token_store
    }

    /// Start a refresh, or join the one in flight.
    pub async fn acquire_or_join(&self) -> Ticket {
        let mut slot = self.slot.lock().await;
        match slot.as_ref() {
            Some(in_flight) => Self::join(in_flight),
            None => self.start(&mut slot),
        }
    }

    /// Like [`acquire_or_join`](Self::acquire_or_join), for a request that was
    /// rejected while carrying `rejected` (or no credential).
    ///
    /// If no refresh is in flight and the store already holds a different
    /// credential, a refresh finished after the request was sent. The ticket
    /// then resolves immediately to the stored credential and no refresh
    /// starts.
    pub async fn acquire_or_join_after(&self, rejected: Option<&Credential>) -> Ticket {
        let mut slot = self.slot.lock().await;
        if let Some(in_flight) = slot.as_ref() {
            return Self::join(in_flight);
        }

        if let Some(current) = self.token_store.get().await {
            if rejected != Some(&current) {
                let id = self.last_ticket.load(Ordering::SeqCst);
                debug!(ticket = id, "Stored credential is newer than the rejected one");
                return Ticket {
                    id,
                    leader: false,
                    state: TicketState::Ready(Ok(current)),
                };
            }
        }

        self.start(&mut slot)
    }

    /// Ticket id of the refresh in flight, if any.
    pub async fn in_flight(&self) -> Option<u64> {
        self.slot.lock().await.as_ref().map(|in_flight| in_flight.ticket)
    }

    /// Number of refreshes started so far.
    pub fn refreshes_started(&self) -> u64 {
        self.last_ticket.load(Ordering::SeqCst)
    }

    fn join(in_flight: &InFlight) -> Ticket {
        debug!(ticket = in_flight.ticket, "Joining in-flight refresh");
        Ticket {
            id: in_flight.ticket,
            leader: false,
            state: TicketState::Pending(in_flight.outcome.clone()),
        }
    }

    fn start(&self, slot: &mut Option<InFlight>) -> Ticket {
        let ticket = self.last_ticket.fetch_add(1, Ordering::SeqCst) + 1;

        let task = tokio::spawn(run_refresh(RefreshTask {
            ticket,
            refresher: Arc::clone(&self.refresher),
            token_store: self.token_store.clone(),
            event_bus: self.event_bus.clone(),
            refresh_timeout: self.refresh_timeout,
            slot: Arc::clone(&self.slot),
        }));

        let slot_handle = Arc::clone(&self.slot);
        let outcome: SharedOutcome = async move {
            match task.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    // The task never reached its own retirement.
                    retire(&slot_handle, ticket).await;
                    Err(RefreshFailure::NetworkFailure(format!(
                        "refresh task failed: {}",
                        e
                    )))
                }
            }
        }
        .boxed()
        .shared();

        *slot = Some(InFlight {
            ticket,
            outcome: outcome.clone(),
        });

        Ticket {
            id: ticket,
            leader: true,
            state: TicketState::Pending(outcome),
        }
    }
}

impl std::fmt::Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshCoordinator")
            .field("refresher", &self.refresher.name())
            .field("refresh_timeout", &self.refresh_timeout)
            .field("refreshes_started", &self.refreshes_started())
            .finish()
    }
}

struct RefreshTask {
    ticket: u64,
    refresher: Arc<dyn TokenRefresher>,
    token_store: TokenStore,
    event_bus: Option<EventBus>,
    refresh_timeout: Duration,
    slot: Arc<Mutex<Option<InFlight>>>,
}

impl RefreshTask {
    fn emit(&self, event: AuthEvent) {
        if let Some(bus) = &self.event_bus {
            bus.publish(CoreEvent::Auth(event));
        }
    }
}

#[instrument(skip_all, fields(ticket = task.ticket, refresher = task.refresher.name()))]
async fn run_refresh(task: RefreshTask) -> RefreshOutcome {
    task.emit(AuthEvent::TokenRefreshing {
        ticket: task.ticket,
    });
    info!("Refreshing credential");

    let attempt = AssertUnwindSafe(task.refresher.refresh()).catch_unwind();
    let outcome = match timeout(task.refresh_timeout, attempt).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(payload)) => Err(RefreshFailure::NetworkFailure(format!(
            "refresher panicked: {}",
            panic_message(payload.as_ref())
        ))),
        Err(_) => Err(RefreshFailure::NetworkFailure(format!(
            "credential refresh timed out after {:?}",
            task.refresh_timeout
        ))),
    };

    match &outcome {
        Ok(credential) => {
            task.token_store.set(credential.clone()).await;
            task.emit(AuthEvent::TokenRefreshed {
                ticket: task.ticket,
                expires_at: credential.expires_at_timestamp(),
            });
            info!("Credential refreshed");
        }
        Err(failure) => {
            if let RefreshFailure::RefreshDenied(_) = failure {
                if task.token_store.clear().await {
                    task.emit(AuthEvent::CredentialCleared {
                        reason: "refresh denied".to_string(),
                    });
                }
            }
            task.emit(AuthEvent::RefreshFailed {
                ticket: task.ticket,
                kind: failure.kind().to_string(),
                message: failure.message().to_string(),
            });
            warn!(kind = %failure.kind(), error = %failure, "Credential refresh failed");
        }
    }

    retire(&task.slot, task.ticket).await;
    outcome
}

/// Empties the slot if it still holds `ticket`.
async fn retire(slot: &Mutex<Option<InFlight>>, ticket: u64) {
    let mut slot = slot.lock().await;
    if slot.as_ref().map(|in_flight| in_flight.ticket) == Some(ticket) {
        *slot = None;
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    /// Counts calls and holds each refresh until released.
    struct GatedRefresher {
        calls: AtomicUsize,
        gate: Notify,
        outcome: RefreshOutcome,
    }

    impl GatedRefresher {
        fn new(outcome: RefreshOutcome) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                gate: Notify::new(),
                outcome,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TokenRefresher for GatedRefresher {
        async fn refresh(&self) -> RefreshOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.gate.notified().await;
            self.outcome.clone()
        }
    }

    struct SlowRefresher;

    #[async_trait]
    impl TokenRefresher for SlowRefresher {
        async fn refresh(&self) -> RefreshOutcome {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Credential::new("late"))
        }
    }

    #[tokio::test]
    async fn test_concurrent_acquires_share_one_refresh() {
        let refresher = GatedRefresher::new(Ok(Credential::new("T1")));
        let store = TokenStore::new();
        let coordinator = RefreshCoordinator::new(refresher.clone(), store.clone());

        let first = coordinator.acquire_or_join().await;
        let second = coordinator.acquire_or_join().await;
        let third = coordinator.acquire_or_join().await;

        assert!(first.is_leader());
        assert!(!second.is_leader());
        assert_eq!(first.id(), second.id());
        assert_eq!(coordinator.in_flight().await, Some(first.id()));

        refresher.gate.notify_one();
        let (a, b, c) = tokio::join!(first.resolve(), second.resolve(), third.resolve());

        assert_eq!(refresher.calls(), 1);
        assert_eq!(a, Ok(Credential::new("T1")));
        assert_eq!(a, b);
        assert_eq!(b, c);
        assert_eq!(store.get().await, Some(Credential::new("T1")));
        assert_eq!(coordinator.in_flight().await, None);
    }

    #[tokio::test]
    async fn test_ticket_retires_and_next_failure_refreshes_again() {
        let refresher = GatedRefresher::new(Err(RefreshFailure::NetworkFailure("reset".into())));
        let coordinator = RefreshCoordinator::new(refresher.clone(), TokenStore::new());

        let first = coordinator.acquire_or_join().await;
        refresher.gate.notify_one();
        assert!(first.resolve().await.is_err());

        let second = coordinator.acquire_or_join().await;
        assert!(second.is_leader());
        refresher.gate.notify_one();
        assert!(second.resolve().await.is_err());

        assert_eq!(refresher.calls(), 2);
        assert_eq!(coordinator.refreshes_started(), 2);
    }

    #[tokio::test]
    async fn test_denied_refresh_clears_store() {
        let refresher =
            GatedRefresher::new(Err(RefreshFailure::RefreshDenied("invalid_grant".into())));
        let store = TokenStore::with_credential(Credential::new("T0"));
        let bus = EventBus::new(16);
        let mut events = bus.subscribe();
        let coordinator =
            RefreshCoordinator::new(refresher.clone(), store.clone()).with_event_bus(bus);

        let ticket = coordinator.acquire_or_join().await;
        refresher.gate.notify_one();
        let outcome = ticket.resolve().await;

        assert!(matches!(outcome, Err(RefreshFailure::RefreshDenied(_))));
        assert!(store.is_empty().await);

        assert_eq!(
            events.recv().await.unwrap(),
            CoreEvent::Auth(AuthEvent::TokenRefreshing { ticket: 1 })
        );
        assert_eq!(
            events.recv().await.unwrap(),
            CoreEvent::Auth(AuthEvent::CredentialCleared {
                reason: "refresh denied".into()
            })
        );
        assert!(matches!(
            events.recv().await.unwrap(),
            CoreEvent::Auth(AuthEvent::RefreshFailed { ticket: 1, .. })
        ));
    }

    #[tokio::test]
    async fn test_network_failure_keeps_store() {
        let refresher = GatedRefresher::new(Err(RefreshFailure::NetworkFailure("reset".into())));
        let store = TokenStore::with_credential(Credential::new("T0"));
        let coordinator = RefreshCoordinator::new(refresher.clone(), store.clone());

        let ticket = coordinator.acquire_or_join().await;
        refresher.gate.notify_one();
        assert!(ticket.resolve().await.is_err());
        assert_eq!(store.get().await, Some(Credential::new("T0")));
    }

    #[tokio::test]
    async fn test_newer_stored_credential_short_circuits() {
        let refresher = GatedRefresher::new(Ok(Credential::new("unused")));
        let store = TokenStore::with_credential(Credential::new("T1"));
        let coordinator = RefreshCoordinator::new(refresher.clone(), store);

        let stale = Credential::new("T0");
        let ticket = coordinator.acquire_or_join_after(Some(&stale)).await;

        assert!(!ticket.is_leader());
        assert_eq!(ticket.resolve().await, Ok(Credential::new("T1")));
        assert_eq!(refresher.calls(), 0);
        assert_eq!(coordinator.refreshes_started(), 0);
    }

    #[tokio::test]
    async fn test_rejected_current_credential_refreshes() {
        let refresher = GatedRefresher::new(Ok(Credential::new("T2")));
        let store = TokenStore::with_credential(Credential::new("T1"));
        let coordinator = RefreshCoordinator::new(refresher.clone(), store.clone());

        let ticket = coordinator
            .acquire_or_join_after(Some(&Credential::new("T1")))
            .await;
        assert!(ticket.is_leader());

        refresher.gate.notify_one();
        assert_eq!(ticket.resolve().await, Ok(Credential::new("T2")));
        assert_eq!(store.get().await.unwrap().token(), "T2");
    }

    #[tokio::test]
    async fn test_leader_drop_does_not_cancel_refresh() {
        let refresher = GatedRefresher::new(Ok(Credential::new("T1")));
        let coordinator = RefreshCoordinator::new(refresher.clone(), TokenStore::new());

        let leader = coordinator.acquire_or_join().await;
        let follower = coordinator.acquire_or_join().await;
        drop(leader);

        refresher.gate.notify_one();
        assert_eq!(follower.resolve().await, Ok(Credential::new("T1")));
    }

    #[tokio::test]
    async fn test_denied_then_cancelled_fallback_clears_store() {
        use crate::refresher::{FallbackRefresher, InteractiveRefresher, LoginPrompt};
        use bridge_traits::error::BridgeError;

        struct Denied;

        #[async_trait]
        impl TokenRefresher for Denied {
            async fn refresh(&self) -> RefreshOutcome {
                Err(RefreshFailure::RefreshDenied("invalid_grant".into()))
            }
        }

        struct CancelledPrompt;

        #[async_trait]
        impl LoginPrompt for CancelledPrompt {
            async fn prompt(&self) -> std::result::Result<Option<Credential>, BridgeError> {
                Ok(None)
            }
        }

        let chain = FallbackRefresher::new(
            Arc::new(Denied),
            Arc::new(InteractiveRefresher::new(Arc::new(CancelledPrompt))),
        );
        let store = TokenStore::with_credential(Credential::new("T0"));
        let coordinator = RefreshCoordinator::new(Arc::new(chain), store.clone());

        let outcome = coordinator.acquire_or_join().await.resolve().await;

        assert!(matches!(outcome, Err(RefreshFailure::RefreshDenied(_))));
        assert!(store.is_empty().await);
    }

    /// Panics on the first call, succeeds afterwards.
    struct PanicOnceRefresher {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TokenRefresher for PanicOnceRefresher {
        async fn refresh(&self) -> RefreshOutcome {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("token endpoint client blew up");
            }
            Ok(Credential::new("T2"))
        }
    }

    #[tokio::test]
    async fn test_panicking_refresher_retires_ticket() {
        let refresher = Arc::new(PanicOnceRefresher {
            calls: AtomicUsize::new(0),
        });
        let store = TokenStore::with_credential(Credential::new("T0"));
        let coordinator = RefreshCoordinator::new(refresher.clone(), store.clone());

        let first = coordinator.acquire_or_join().await;
        match first.resolve().await {
            Err(RefreshFailure::NetworkFailure(message)) => {
                assert!(message.contains("token endpoint client blew up"))
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(coordinator.in_flight().await, None);
        assert_eq!(store.get().await, Some(Credential::new("T0")));

        let second = coordinator.acquire_or_join().await;
        assert!(second.is_leader());
        assert_eq!(second.resolve().await, Ok(Credential::new("T2")));
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 2);
        assert_eq!(store.get().await, Some(Credential::new("T2")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_timeout_is_network_failure() {
        let coordinator = RefreshCoordinator::new(Arc::new(SlowRefresher), TokenStore::new())
            .with_refresh_timeout(Duration::from_secs(5));

        let ticket = coordinator.acquire_or_join().await;
        let outcome = ticket.resolve().await;

        match outcome {
            Err(RefreshFailure::NetworkFailure(message)) => assert!(message.contains("timed out")),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(coordinator.in_flight().await, None);
    }
}
