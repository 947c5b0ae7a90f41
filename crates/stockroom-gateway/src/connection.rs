use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use stockroom_engine::{Engine, EngineError, EventSink};
use stockroom_types::events::{Envelope, GatewayCommand, GatewayEvent};
use stockroom_types::models::Actor;
use stockroom_types::{RoomId, SessionId};

use crate::hub::BroadcastHub;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Serve one WebSocket. The token was validated at the HTTP upgrade, so
/// the session starts with `Ready` and goes straight into the event loop.
pub async fn handle_connection(
    socket: WebSocket,
    hub: BroadcastHub,
    engine: Arc<Engine>,
    actor: Actor,
) {
    let (mut sender, mut receiver) = socket.split();

    engine.observe(&actor).await;
    let (session_id, mut outbound) = hub.connect(actor.user_id.clone());
    info!("{} ({}) connected to gateway", actor.username, actor.user_id);

    let ready = Envelope::session(
        session_id,
        GatewayEvent::Ready {
            session_id,
            user_id: actor.user_id.clone(),
        },
    );
    let ready = match ready.to_json() {
        Ok(json) => json,
        Err(e) => {
            warn!("Failed to encode Ready for {}: {}", actor.user_id, e);
            hub.disconnect(session_id);
            return;
        }
    };
    if sender.send(Message::Text(ready.into())).await.is_err() {
        hub.disconnect(session_id);
        return;
    }

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward queued frames -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                frame = outbound.recv() => {
                    // None: the hub dropped this session
                    let Some(frame) = frame else { break };
                    if sender.send(Message::Text(frame.to_string().into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!(
                                "Heartbeat timeout (missed {} pongs), dropping connection",
                                missed_heartbeats
                            );
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
        let _ = sender.close().await;
    });

    // Read commands from client
    let session = Session {
        id: session_id,
        actor,
        hub,
        engine,
    };
    let reader = session.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => reader.handle_command(cmd).await,
                    Err(e) => {
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            reader.actor.username,
                            reader.actor.user_id,
                            e,
                            text.chars().take(200).collect::<String>()
                        );
                        reader.reply(GatewayEvent::Error {
                            code: "bad_command".into(),
                            message: e.to_string(),
                        });
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    session.close().await;
}

/// Per-connection command handling.
#[derive(Clone)]
struct Session {
    id: SessionId,
    actor: Actor,
    hub: BroadcastHub,
    engine: Arc<Engine>,
}

impl Session {
    async fn handle_command(&self, cmd: GatewayCommand) {
        let result = match cmd {
            GatewayCommand::JoinRoom { room_id } => self.join(room_id).await,
            GatewayCommand::LeaveRoom { room_id } => self.leave(room_id).await,
            GatewayCommand::Subscribe { room_ids } => self.subscribe(room_ids).await,
            GatewayCommand::Unsubscribe { room_ids } => {
                self.hub.unsubscribe(self.id, &room_ids);
                Ok(())
            }
            GatewayCommand::StartTyping { room_id } => {
                if self.hub.is_subscribed(self.id, &room_id) {
                    self.hub.publish(Envelope::room(
                        room_id.clone(),
                        GatewayEvent::TypingStarted {
                            room_id,
                            user_id: self.actor.user_id.clone(),
                        },
                    ));
                }
                Ok(())
            }
            GatewayCommand::Ping => {
                self.reply(GatewayEvent::Pong);
                Ok(())
            }
        };

        if let Err(e) = result {
            debug!("Command from {} failed: {}", self.actor.user_id, e);
            self.reply(GatewayEvent::Error {
                code: e.code().into(),
                message: e.to_string(),
            });
        }
    }

    /// Go online in a room and start receiving its events.
    async fn join(&self, room_id: RoomId) -> Result<(), EngineError> {
        let was_subscribed = self.hub.is_subscribed(self.id, &room_id);
        self.engine.can_view_room(&self.actor, &room_id).await?;
        // subscribed before joining so the session sees its own presence change
        self.hub.subscribe(self.id, [room_id.clone()]);

        // Presence is recorded on the session first so a disconnect always
        // knows to release it, even if the hub cuts the session off mid-join.
        if !self.hub.mark_present(self.id, room_id.clone()) {
            return Err(EngineError::Transient(format!(
                "session {} is closing",
                self.id
            )));
        }

        match self.engine.join_room(&room_id, &self.actor).await {
            Ok(online) => {
                info!("{} joined {} ({} online)", self.actor.user_id, room_id, online);
                Ok(())
            }
            Err(e) => {
                self.hub.release_presence(self.id, &room_id);
                if !was_subscribed {
                    self.hub.unsubscribe(self.id, &[room_id]);
                }
                Err(e)
            }
        }
    }

    async fn leave(&self, room_id: RoomId) -> Result<(), EngineError> {
        if self.hub.release_presence(self.id, &room_id) {
            self.engine.leave_room(&room_id, &self.actor.user_id).await?;
        }
        self.hub.unsubscribe(self.id, &[room_id]);
        Ok(())
    }

    /// Subscribe to every readable room in the list; the first unreadable one
    /// is reported and the rest are still applied.
    async fn subscribe(&self, room_ids: Vec<RoomId>) -> Result<(), EngineError> {
        let mut allowed = HashSet::new();
        let mut denied = None;
        for room_id in room_ids {
            match self.engine.can_view_room(&self.actor, &room_id).await {
                Ok(_) => {
                    allowed.insert(room_id);
                }
                Err(e) => {
                    denied.get_or_insert(e);
                }
            }
        }
        debug!("{} subscribing to {} rooms", self.actor.user_id, allowed.len());
        self.hub.subscribe(self.id, allowed);

        denied.map_or(Ok(()), Err)
    }

    fn reply(&self, event: GatewayEvent) {
        self.hub.publish(Envelope::session(self.id, event));
    }

    /// Forget the session and take its user offline wherever no other
    /// session keeps them present.
    async fn close(&self) {
        for room_id in self.hub.disconnect(self.id) {
            if let Err(e) = self.engine.leave_room(&room_id, &self.actor.user_id).await {
                debug!("Leaving {} on disconnect: {}", room_id, e);
            }
        }
        info!(
            "{} ({}) disconnected from gateway",
            self.actor.username, self.actor.user_id
        );
    }
}
