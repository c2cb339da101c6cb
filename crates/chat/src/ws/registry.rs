use std::collections::HashMap;
use std::sync::Arc;

use forum_common::protocol::chat::ServerFrame;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::verifier::Identity;

/// Capacity of each session's outbound frame queue. A peer that falls this
/// far behind is evicted on the next broadcast.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("outbound queue is full")]
    Full,
    #[error("outbound queue is closed")]
    Closed,
}

impl<T> From<mpsc::error::TrySendError<T>> for DeliveryError {
    fn from(error: mpsc::error::TrySendError<T>) -> Self {
        match error {
            mpsc::error::TrySendError::Full(_) => Self::Full,
            mpsc::error::TrySendError::Closed(_) => Self::Closed,
        }
    }
}

#[derive(Debug)]
struct RegisteredSession {
    identity: Identity,
    outbound: mpsc::Sender<ServerFrame>,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub evicted: Vec<Uuid>,
}

/// Every authenticated session on this process and the identity bound to it.
///
/// One mutex guards the map for every register, unregister and broadcast
/// pass, so membership cannot change between deciding to deliver to a peer
/// and evicting it.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    sessions: Arc<Mutex<HashMap<Uuid, RegisteredSession>>>,
}

impl ConnectionRegistry {
    pub async fn register(
        &self,
        session_id: Uuid,
        identity: Identity,
        outbound: mpsc::Sender<ServerFrame>,
    ) {
        let mut sessions = self.sessions.lock().await;
        sessions.insert(session_id, RegisteredSession { identity, outbound });
        debug!(session_id = %session_id, sessions = sessions.len(), "chat session registered");
    }

    /// Replaces the identity of a registered session. Returns false when the
    /// session is no longer registered (for example after eviction).
    pub async fn rebind(&self, session_id: Uuid, identity: Identity) -> bool {
        match self.sessions.lock().await.get_mut(&session_id) {
            Some(session) => {
                session.identity = identity;
                true
            }
            None => false,
        }
    }

    pub async fn unregister(&self, session_id: Uuid) -> bool {
        let mut sessions = self.sessions.lock().await;
        let removed = sessions.remove(&session_id).is_some();
        if removed {
            debug!(session_id = %session_id, sessions = sessions.len(), "chat session unregistered");
        }
        removed
    }

    /// Applies `deliver` to every registered session except `exclude`.
    ///
    /// A session whose delivery fails is removed in the same pass and its
    /// outbound sender dropped, which ends that session's connection loop.
    /// One failure never stops delivery to the remaining peers.
    pub async fn for_each_except<F>(&self, exclude: Uuid, mut deliver: F) -> BroadcastReport
    where
        F: FnMut(Uuid, &Identity, &mpsc::Sender<ServerFrame>) -> Result<(), DeliveryError>,
    {
        let mut report = BroadcastReport::default();
        let mut sessions = self.sessions.lock().await;

        sessions.retain(|session_id, session| {
            if *session_id == exclude {
                return true;
            }
            match deliver(*session_id, &session.identity, &session.outbound) {
                Ok(()) => {
                    report.delivered += 1;
                    true
                }
                Err(error) => {
                    warn!(
                        session_id = %session_id,
                        user_id = session.identity.user_id,
                        error = %error,
                        "evicting chat session after failed delivery"
                    );
                    report.evicted.push(*session_id);
                    false
                }
            }
        });

        report
    }

    /// Enqueues `frame` on every other session's outbound queue without
    /// waiting. A full or closed queue counts as a failed delivery.
    pub async fn broadcast_except(&self, exclude: Uuid, frame: &ServerFrame) -> BroadcastReport {
        self.for_each_except(exclude, |_, _, outbound| {
            outbound.try_send(frame.clone()).map_err(DeliveryError::from)
        })
        .await
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn contains(&self, session_id: Uuid) -> bool {
        self.sessions.lock().await.contains_key(&session_id)
    }

    pub async fn identity_of(&self, session_id: Uuid) -> Option<Identity> {
        self.sessions.lock().await.get(&session_id).map(|session| session.identity.clone())
    }
}
