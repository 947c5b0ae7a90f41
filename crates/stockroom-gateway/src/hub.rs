use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use stockroom_engine::EventSink;
use stockroom_types::events::{Envelope, Scope};
use stockroom_types::{RoomId, SessionId, UserId};

/// One connected socket.
struct SessionHandle {
    user_id: UserId,
    /// Rooms whose events this session receives
    subscriptions: HashSet<RoomId>,
    /// Rooms this session made the user show up online in
    present: HashSet<RoomId>,
    /// Serialized frames waiting for the socket writer. `None` once the hub
    /// has cut the session off; the entry stays until `disconnect` so its
    /// presence can still be released.
    tx: Option<mpsc::Sender<Arc<str>>>,
}

impl SessionHandle {
    fn is_open(&self) -> bool {
        self.tx.is_some()
    }
}

/// Routes every engine event to the sessions it concerns: room events to
/// sessions subscribed to the room, user events to all of that user's
/// sessions, session events to one socket.
///
/// Each session has a bounded outbound queue. A session whose queue is full
/// is cut off on the spot and has to resync after reconnecting; publishers
/// never wait on a socket. A cut-off session keeps its presence until its
/// connection task calls [`BroadcastHub::disconnect`].
#[derive(Clone)]
pub struct BroadcastHub {
    inner: Arc<HubInner>,
}

struct HubInner {
    sessions: RwLock<HashMap<SessionId, SessionHandle>>,
    queue_capacity: usize,
}

impl BroadcastHub {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            inner: Arc::new(HubInner {
                sessions: RwLock::new(HashMap::new()),
                queue_capacity: queue_capacity.max(1),
            }),
        }
    }

    /// Register a session. The receiver yields frames ready to write and
    /// closes when the hub drops the session.
    pub fn connect(&self, user_id: UserId) -> (SessionId, mpsc::Receiver<Arc<str>>) {
        let session_id = SessionId::generate();
        let (tx, rx) = mpsc::channel(self.inner.queue_capacity);
        self.write().insert(
            session_id,
            SessionHandle {
                user_id: user_id.clone(),
                subscriptions: HashSet::new(),
                present: HashSet::new(),
                tx: Some(tx),
            },
        );
        info!("Session {} opened for {}", session_id, user_id);
        (session_id, rx)
    }

    /// Forget a session. Returns the rooms where its user is no longer
    /// present through any other session, so the caller can mark them
    /// offline there.
    pub fn disconnect(&self, session_id: SessionId) -> Vec<RoomId> {
        let mut sessions = self.write();
        let Some(handle) = sessions.remove(&session_id) else {
            return Vec::new();
        };
        info!("Session {} closed for {}", session_id, handle.user_id);

        handle
            .present
            .into_iter()
            .filter(|room| !present_elsewhere(&sessions, &handle.user_id, room))
            .collect()
    }

    pub fn subscribe(&self, session_id: SessionId, room_ids: impl IntoIterator<Item = RoomId>) {
        if let Some(handle) = self.write().get_mut(&session_id) {
            handle.subscriptions.extend(room_ids);
            debug!("Session {} now follows {} rooms", session_id, handle.subscriptions.len());
        }
    }

    pub fn unsubscribe(&self, session_id: SessionId, room_ids: &[RoomId]) {
        if let Some(handle) = self.write().get_mut(&session_id) {
            for room_id in room_ids {
                handle.subscriptions.remove(room_id);
            }
        }
    }

    pub fn is_subscribed(&self, session_id: SessionId, room_id: &RoomId) -> bool {
        self.read()
            .get(&session_id)
            .is_some_and(|handle| handle.subscriptions.contains(room_id))
    }

    /// Record that the session made its user show up in a room. False if
    /// the session is gone or has been cut off, in which case nothing is
    /// recorded and the caller must not mark the user online.
    pub fn mark_present(&self, session_id: SessionId, room_id: RoomId) -> bool {
        match self.write().get_mut(&session_id) {
            Some(handle) if handle.is_open() => {
                handle.present.insert(room_id);
                true
            }
            _ => false,
        }
    }

    /// Whether the session is registered and still being delivered to.
    pub fn is_open(&self, session_id: SessionId) -> bool {
        self.read().get(&session_id).is_some_and(SessionHandle::is_open)
    }

    /// Drop the session's presence in a room. True when no other session of
    /// the same user keeps them online there.
    pub fn release_presence(&self, session_id: SessionId, room_id: &RoomId) -> bool {
        let mut sessions = self.write();
        let Some(handle) = sessions.get_mut(&session_id) else {
            return false;
        };
        if !handle.present.remove(room_id) {
            return false;
        }
        let user_id = handle.user_id.clone();
        !present_elsewhere(&sessions, &user_id, room_id)
    }

    /// Sessions still being delivered to.
    pub fn session_count(&self) -> usize {
        self.read().values().filter(|handle| handle.is_open()).count()
    }

    fn deliver(&self, envelope: &Envelope) {
        let frame: Arc<str> = match envelope.to_json() {
            Ok(json) => json.into(),
            Err(e) => {
                warn!("Failed to serialize {:?} event: {}", envelope.scope, e);
                return;
            }
        };

        let mut dead = Vec::new();
        {
            let sessions = self.read();
            for (session_id, handle) in sessions.iter() {
                let Some(tx) = &handle.tx else { continue };
                let wanted = match &envelope.scope {
                    Scope::Room(room_id) => handle.subscriptions.contains(room_id),
                    Scope::User(user_id) => &handle.user_id == user_id,
                    Scope::Session(target) => target == session_id,
                };
                if !wanted {
                    continue;
                }
                match tx.try_send(frame.clone()) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        warn!("Session {} outbound queue full, dropping session", session_id);
                        dead.push(*session_id);
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        debug!("Session {} already closed", session_id);
                        dead.push(*session_id);
                    }
                }
            }
        }

        if !dead.is_empty() {
            // Dropping the sender closes the queue; the connection task sees
            // that, shuts the socket and disconnects the session.
            let mut sessions = self.write();
            for session_id in dead {
                if let Some(handle) = sessions.get_mut(&session_id) {
                    handle.tx = None;
                    handle.subscriptions.clear();
                }
            }
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<SessionId, SessionHandle>> {
        self.inner.sessions.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<SessionId, SessionHandle>> {
        self.inner.sessions.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl EventSink for BroadcastHub {
    fn publish(&self, envelope: Envelope) {
        self.deliver(&envelope);
    }
}

fn present_elsewhere(
    sessions: &HashMap<SessionId, SessionHandle>,
    user_id: &UserId,
    room_id: &RoomId,
) -> bool {
    sessions
        .values()
        .any(|handle| &handle.user_id == user_id && handle.present.contains(room_id))
}
