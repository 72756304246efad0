//! Session Launcher
//!
//! Starts the single stream session behind a login: connect and authenticate
//! synchronously, then hand off to background workers (receive loop, initial
//! subscription, event router). Only one session may be active at a time; the
//! slot frees itself when the session's router stops.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

use super::router::{EventRouter, RouterExit};
use crate::application::ports::{EventSink, SessionControl};
use crate::infrastructure::alpaca::{ClientError, Credentials, Session, SessionConfig};
use crate::infrastructure::config::ClientConfig;

/// Errors returned by [`SessionLauncher::launch`].
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    /// Another session is still running.
    #[error("session {0} is already active")]
    SessionActive(Uuid),

    /// Connect or authenticate failed.
    #[error(transparent)]
    Client(#[from] ClientError),
}

impl LaunchError {
    /// Check if the caller must supply different credentials before retrying.
    #[must_use]
    pub const fn is_bad_credentials(&self) -> bool {
        matches!(self, Self::Client(e) if e.is_bad_credentials())
    }
}

type ActiveSlot = Arc<Mutex<Option<Uuid>>>;

/// Holds the active-session slot; frees it on drop.
struct SlotGuard {
    slot: ActiveSlot,
    id: Uuid,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        let mut active = self.slot.lock();
        if *active == Some(self.id) {
            *active = None;
        }
    }
}

/// Starts and tracks the stream session.
pub struct SessionLauncher {
    config: ClientConfig,
    sink: Arc<dyn EventSink>,
    cancel: CancellationToken,
    active: ActiveSlot,
    routers: TaskTracker,
}

impl SessionLauncher {
    /// Create a launcher.
    #[must_use]
    pub fn new(config: ClientConfig, sink: Arc<dyn EventSink>, cancel: CancellationToken) -> Self {
        Self {
            config,
            sink,
            cancel,
            active: Arc::new(Mutex::new(None)),
            routers: TaskTracker::new(),
        }
    }

    /// Identifier of the running session, if any.
    #[must_use]
    pub fn active_session(&self) -> Option<Uuid> {
        *self.active.lock()
    }

    /// Connect, authenticate, and start the session workers.
    ///
    /// Returns once the handshake has succeeded; the session then runs in the
    /// background until it faults or the launcher's token is cancelled.
    ///
    /// # Errors
    ///
    /// - [`LaunchError::SessionActive`] if a session is already running
    /// - [`LaunchError::Client`] if connect or authenticate fails
    pub async fn launch(&self, name: &str, credentials: &Credentials) -> Result<Uuid, LaunchError> {
        let (session, outputs) = Session::new(SessionConfig::from(&self.config));
        let guard = self.claim(session.id())?;

        tracing::info!(
            session_id = %session.id(),
            name,
            key = credentials.key(),
            "Starting stream session"
        );

        session.connect().await?;

        if let Err(e) = session.authenticate(credentials).await {
            let rejected = Arc::clone(&session);
            self.routers.spawn(async move { rejected.disconnect().await });
            return Err(e.into());
        }

        tokio::spawn(Arc::clone(&session).listen());

        let symbols = &self.config.initial_symbols;
        session.subscribe(symbols, symbols).await;

        let session_id = session.id();
        let router = EventRouter::new(
            outputs,
            Arc::clone(&session) as Arc<dyn SessionControl>,
            Arc::clone(&self.sink),
            self.cancel.child_token(),
        );

        self.routers.spawn(async move {
            let exit = router.run().await;
            match &exit {
                RouterExit::Faulted(fault) => {
                    tracing::warn!(session_id = %session_id, fault = %fault, "Session ended on fault");
                }
                RouterExit::Cancelled | RouterExit::SourcesClosed => {
                    tracing::info!(session_id = %session_id, exit = ?exit, "Session ended");
                }
            }
            drop(guard);
            exit
        });

        Ok(session_id)
    }

    /// Wait for every session worker to finish.
    ///
    /// Call after cancelling the launcher's token.
    pub async fn shutdown(&self) {
        self.routers.close();
        self.routers.wait().await;
    }

    fn claim(&self, id: Uuid) -> Result<SlotGuard, LaunchError> {
        let mut active = self.active.lock();
        if let Some(current) = *active {
            return Err(LaunchError::SessionActive(current));
        }
        *active = Some(id);

        Ok(SlotGuard {
            slot: Arc::clone(&self.active),
            id,
        })
    }
}
