// WebSocket transport: clients open and watch rooms and send room commands.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use bestball_engine::draft::pick::{ParticipantId, PlayerId, RoomId};
use bestball_engine::draft::room::RoomConfig;
use bestball_engine::error::ErrorKind;
use bestball_engine::protocol::{RoomCommand, RoomEvent};
use bestball_engine::supervisor::{RoomHandle, RoomSnapshot, RoomSupervisor, SupervisorError};
use futures_util::stream::Stream;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::config::DraftDefaults;

// ---------------------------------------------------------------------------
// Wire messages
// ---------------------------------------------------------------------------

/// Requests a client can send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Stream the room's events to this connection, starting with a snapshot.
    Watch { room_id: RoomId },
    Command { command: RoomCommand },
    Snapshot { room_id: RoomId },
    /// A participant's queue, minus players already drafted.
    Queue {
        room_id: RoomId,
        participant_id: ParticipantId,
    },
    /// Start a new room. Omitted settings come from the `[draft]` config.
    OpenRoom {
        room_id: RoomId,
        participants: Vec<ParticipantId>,
        #[serde(default)]
        total_rounds: Option<u32>,
        #[serde(default)]
        pick_seconds: Option<u64>,
    },
}

/// Messages the server sends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Snapshot { snapshot: RoomSnapshot },
    Event { room_id: RoomId, event: RoomEvent },
    Queue {
        room_id: RoomId,
        participant_id: ParticipantId,
        player_ids: Vec<PlayerId>,
    },
    Ack,
    Rejected { kind: ErrorKind, message: String },
}

impl ServerMessage {
    fn rejected(error: &SupervisorError) -> Self {
        ServerMessage::Rejected {
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Per-connection state: the rooms being watched and the outbound queue.
pub struct Session {
    supervisor: Arc<RoomSupervisor>,
    defaults: DraftDefaults,
    out: mpsc::Sender<ServerMessage>,
    watchers: HashMap<RoomId, JoinHandle<()>>,
}

impl Session {
    pub fn new(
        supervisor: Arc<RoomSupervisor>,
        defaults: DraftDefaults,
        out: mpsc::Sender<ServerMessage>,
    ) -> Self {
        Self {
            supervisor,
            defaults,
            out,
            watchers: HashMap::new(),
        }
    }

    /// Handle one text frame and queue the reply. Returns `Err(())` once the
    /// outbound side is gone.
    pub async fn handle_text(&mut self, text: &str) -> Result<(), ()> {
        let reply = match serde_json::from_str::<ClientMessage>(text) {
            Ok(message) => match self.handle(message).await {
                Ok(Some(reply)) => reply,
                // Already queued by the handler.
                Ok(None) if self.out.is_closed() => return Err(()),
                Ok(None) => return Ok(()),
                Err(e) => {
                    debug!("Request rejected: {}", e);
                    ServerMessage::rejected(&e)
                }
            },
            Err(e) => {
                warn!("Unparseable client message: {}", e);
                ServerMessage::Rejected {
                    kind: ErrorKind::InvalidMessage,
                    message: e.to_string(),
                }
            }
        };
        self.out.send(reply).await.map_err(|_| ())
    }

    /// Run one request. `None` means the handler queued its own reply.
    async fn handle(&mut self, message: ClientMessage) -> Result<Option<ServerMessage>, SupervisorError> {
        let reply = match message {
            ClientMessage::Watch { room_id } => {
                self.watch(&room_id).await?;
                return Ok(None);
            }
            ClientMessage::Command { command } => {
                self.supervisor.execute(command).await?;
                ServerMessage::Ack
            }
            ClientMessage::Snapshot { room_id } => {
                let snapshot = self.supervisor.get_room(&room_id)?.snapshot().await?;
                ServerMessage::Snapshot { snapshot }
            }
            ClientMessage::Queue {
                room_id,
                participant_id,
            } => {
                let player_ids = self
                    .supervisor
                    .get_room(&room_id)?
                    .queue(&participant_id)
                    .await?;
                ServerMessage::Queue {
                    room_id,
                    participant_id,
                    player_ids,
                }
            }
            ClientMessage::OpenRoom {
                room_id,
                participants,
                total_rounds,
                pick_seconds,
            } => {
                let config = RoomConfig {
                    room_id,
                    participants,
                    total_rounds: total_rounds.unwrap_or(self.defaults.total_rounds),
                    pick_seconds: pick_seconds.unwrap_or(self.defaults.pick_seconds),
                };
                let handle = self.supervisor.start_room(config).await?;
                let snapshot = handle.snapshot().await?;
                ServerMessage::Snapshot { snapshot }
            }
        };
        Ok(Some(reply))
    }

    /// Queue the room's snapshot, then forward every event after it. The
    /// snapshot is queued before the forwarder starts, so it always arrives
    /// first. Watching a room again restarts the stream from a new snapshot.
    async fn watch(&mut self, room_id: &str) -> Result<(), SupervisorError> {
        let handle = self.supervisor.get_room(room_id)?;
        let (snapshot, events) = handle.watch().await?;

        if let Some(previous) = self.watchers.remove(room_id) {
            previous.abort();
        }
        if self.out.send(ServerMessage::Snapshot { snapshot }).await.is_ok() {
            self.forward(handle, events);
        }
        Ok(())
    }

    fn forward(&mut self, handle: RoomHandle, mut events: broadcast::Receiver<RoomEvent>) {
        let room_id = handle.room_id().to_string();
        let out = self.out.clone();
        let task = tokio::spawn(async move {
            loop {
                let message = match events.recv().await {
                    Ok(event) => ServerMessage::Event {
                        room_id: handle.room_id().to_string(),
                        event,
                    },
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(
                            "Watcher for room {} lagged by {} events, resending snapshot",
                            handle.room_id(),
                            missed
                        );
                        match handle.watch().await {
                            Ok((snapshot, fresh)) => {
                                events = fresh;
                                ServerMessage::Snapshot { snapshot }
                            }
                            Err(_) => break,
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                if out.send(message).await.is_err() {
                    break;
                }
            }
        });
        self.watchers.insert(room_id, task);
    }

    /// Ids of the rooms this session currently forwards.
    pub fn watching(&self) -> Vec<RoomId> {
        let mut ids: Vec<RoomId> = self.watchers.keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        for (_, task) in self.watchers.drain() {
            task.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// Bind `127.0.0.1:{port}` and serve clients until the task is cancelled.
pub async fn run(
    port: u16,
    supervisor: Arc<RoomSupervisor>,
    defaults: DraftDefaults,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(format!("127.0.0.1:{port}")).await?;
    serve(listener, supervisor, defaults).await
}

/// Accept connections on an already-bound listener. Each client gets its own
/// task.
pub async fn serve(
    listener: TcpListener,
    supervisor: Arc<RoomSupervisor>,
    defaults: DraftDefaults,
) -> anyhow::Result<()> {
    let local_addr = listener.local_addr()?;
    info!("WebSocket server listening on {local_addr}");

    loop {
        let (stream, addr) = listener.accept().await?;
        info!("Accepted TCP connection from {addr}");
        tokio::spawn(handle_connection(
            stream,
            addr,
            Arc::clone(&supervisor),
            defaults.clone(),
        ));
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    supervisor: Arc<RoomSupervisor>,
    defaults: DraftDefaults,
) {
    let addr = addr.to_string();
    let ws_stream = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("WebSocket handshake failed for {addr}: {e}");
            return;
        }
    };

    let (mut write, read) = ws_stream.split();
    let (out_tx, mut out_rx) = mpsc::channel::<ServerMessage>(256);

    let writer_addr = addr.clone();
    let writer = tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(e) => {
                    warn!("Failed to serialize message for {writer_addr}: {e}");
                    continue;
                }
            };
            if let Err(e) = write.send(Message::Text(text.into())).await {
                warn!("Failed to send to {writer_addr}: {e}");
                break;
            }
        }
        let _ = write.close().await;
    });

    let mut session = Session::new(supervisor, defaults, out_tx);
    let _ = process_message_stream(read, &mut session, &addr).await;
    drop(session);

    let _ = writer.await;
    info!("Client {addr} disconnected");
}

/// Feed raw WebSocket [`Message`] items from any [`Stream`] into `session`.
/// Generic over the stream so tests can drive it without sockets. Returns
/// `Err(())` if the session's outbound channel closed.
pub async fn process_message_stream<St>(
    mut stream: St,
    session: &mut Session,
    addr: &str,
) -> Result<(), ()>
where
    St: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    while let Some(msg_result) = stream.next().await {
        match msg_result {
            Ok(Message::Text(text)) => {
                session.handle_text(text.as_str()).await?;
            }
            Ok(Message::Close(_)) => {
                info!("Client {addr} sent close frame");
                break;
            }
            Err(e) => {
                warn!("WebSocket error from {addr}: {e}");
                break;
            }
            _ => {
                // Binary, Ping, Pong and raw frames carry no requests.
            }
        }
    }
    Ok(())
}
