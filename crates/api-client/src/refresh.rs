//! Single-flight access token refresh
//!
//! Any number of requests can hit a 401 at the same moment. Only the first
//! one starts a refresh round; the rest join the waiter queue of that round.
//! When the round settles every waiter receives the same outcome, in the
//! order it joined.
//!
//! Round lifecycle:
//! 1. `refresh_once()` takes the state lock. `Idle` becomes `Refreshing`
//!    with the caller as waiter 0 and a round task is spawned; `Refreshing`
//!    just appends the caller. No await happens while the lock is held.
//! 2. The round task posts the stored refresh token to the token endpoint.
//! 3. Success: the new pair is written to the store, state returns to
//!    `Idle`, waiters are resolved front to back.
//! 4. Failure: the store is cleared, one `SessionEvent::Terminated` is
//!    broadcast, state returns to `Idle`, waiters are rejected front to back.
//!
//! The round runs on its own task so a caller that gives up (drops its
//! future) cannot strand the coordinator in `Refreshing`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use common::Secret;
use property_auth::CredentialStore;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::metrics;
use crate::session::SessionEvent;

/// Outcome handed to each waiter of a successful round.
#[derive(Debug, Clone)]
pub struct Refreshed {
    pub access_token: Secret<String>,
    /// Release order within the round; 0 is the caller that started it.
    pub position: usize,
}

type Waiter = oneshot::Sender<Result<Refreshed>>;

enum RefreshState {
    Idle,
    Refreshing { waiters: VecDeque<Waiter> },
}

pub struct RefreshCoordinator {
    state: Mutex<RefreshState>,
    store: Arc<dyn CredentialStore>,
    http: reqwest::Client,
    base_url: String,
    refresh_timeout: Duration,
    events: broadcast::Sender<SessionEvent>,
    rounds: AtomicU64,
}

impl RefreshCoordinator {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        http: reqwest::Client,
        base_url: impl Into<String>,
        refresh_timeout: Duration,
        events: broadcast::Sender<SessionEvent>,
    ) -> Self {
        Self {
            state: Mutex::new(RefreshState::Idle),
            store,
            http,
            base_url: base_url.into(),
            refresh_timeout,
            events,
            rounds: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RefreshState> {
        // State transitions are single assignments, a poisoned guard is still consistent
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether a round is in flight.
    pub fn is_refreshing(&self) -> bool {
        matches!(*self.lock(), RefreshState::Refreshing { .. })
    }

    /// Number of callers waiting on the current round.
    pub fn pending(&self) -> usize {
        match &*self.lock() {
            RefreshState::Idle => 0,
            RefreshState::Refreshing { waiters } => waiters.len(),
        }
    }

    /// Number of refresh rounds started since construction.
    pub fn rounds_started(&self) -> u64 {
        self.rounds.load(Ordering::Relaxed)
    }

    /// Obtain a fresh access token, joining the in-flight round if there is one.
    pub async fn refresh_once(self: &Arc<Self>) -> Result<Refreshed> {
        let (tx, rx) = oneshot::channel();

        let start_round = {
            let mut state = self.lock();
            match &mut *state {
                RefreshState::Idle => {
                    *state = RefreshState::Refreshing {
                        waiters: VecDeque::from([tx]),
                    };
                    true
                }
                RefreshState::Refreshing { waiters } => {
                    waiters.push_back(tx);
                    debug!(position = waiters.len() - 1, "joined in-flight refresh");
                    false
                }
            }
        };

        if start_round {
            let round = self.rounds.fetch_add(1, Ordering::Relaxed) + 1;
            info!(round, "access token rejected, starting refresh round");
            tokio::spawn(Arc::clone(self).run_round(round));
        }

        // The round task always resolves every waiter before exiting; a closed
        // channel means the runtime is shutting down.
        rx.await.unwrap_or_else(|_| {
            Err(Error::RefreshFailed(property_auth::Error::Http(
                "refresh round was abandoned".into(),
            )))
        })
    }

    async fn run_round(self: Arc<Self>, round: u64) {
        let outcome = self.exchange().await;

        match &outcome {
            Ok(_) => {
                metrics::record_refresh_round("success");
                info!(round, "refresh round succeeded");
            }
            Err(e) => {
                metrics::record_refresh_round("failure");
                warn!(round, error = %e, "refresh round failed, terminating session");
                if let Err(clear_err) = self.store.clear() {
                    warn!(round, error = %clear_err, "failed to clear credential store");
                }
                // No receivers is fine: nobody asked to be told.
                let _ = self.events.send(SessionEvent::Terminated {
                    reason: e.to_string(),
                });
            }
        }

        let waiters = match std::mem::replace(&mut *self.lock(), RefreshState::Idle) {
            RefreshState::Refreshing { waiters } => waiters,
            RefreshState::Idle => VecDeque::new(),
        };

        debug!(round, waiters = waiters.len(), "releasing refresh waiters");
        for (position, waiter) in waiters.into_iter().enumerate() {
            let result = match &outcome {
                Ok(access) => Ok(Refreshed {
                    access_token: Secret::new(access.clone()),
                    position,
                }),
                Err(e) => Err(e.clone()),
            };
            if waiter.send(result).is_err() {
                debug!(round, position, "refresh waiter went away before release");
            }
        }
    }

    /// Call the token endpoint and, on success, persist the successor pair.
    async fn exchange(&self) -> Result<String> {
        let current = self
            .store
            .get()
            .ok_or(Error::RefreshFailed(property_auth::Error::MissingRefreshToken))?;

        let response = property_auth::refresh_access_token(
            &self.http,
            &self.base_url,
            current.refresh_token(),
            self.refresh_timeout,
        )
        .await
        .map_err(Error::RefreshFailed)?;

        if response.refresh.is_some() {
            debug!("token endpoint rotated the refresh token");
        }
        let access = response.access.clone();
        let next = current.refreshed(response.access, response.refresh);
        // The in-memory copy is already replaced; only persistence failed.
        if let Err(e) = self.store.set(next) {
            warn!(error = %e, "failed to persist refreshed credentials");
        }
        Ok(access)
    }
}
