// End-to-end tests for the WebSocket server.
//
// A real listener on an ephemeral port serves a supervisor backed by an
// in-memory database and the shipped sample player pool; clients connect
// with tokio-tungstenite.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bestball_engine::db::Database;
use bestball_engine::draft::room::RoomStatus;
use bestball_engine::error::ErrorKind;
use bestball_engine::pool::CsvPlayerPool;
use bestball_engine::protocol::RoomEvent;
use bestball_engine::queue::QueueStoreProvider;
use bestball_engine::supervisor::{EngineSettings, RoomSupervisor};
use bestball_server::config::DraftDefaults;
use bestball_server::ws_server::{self, ServerMessage};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ===========================================================================
// Test helpers
// ===========================================================================

async fn start_server() -> (String, Arc<Database>) {
    let db = Arc::new(Database::open(":memory:").unwrap());
    let pool = CsvPlayerPool::load(Path::new("data/players.csv")).unwrap();
    let supervisor = Arc::new(RoomSupervisor::new(
        Arc::clone(&db),
        Arc::new(pool),
        Arc::clone(&db) as Arc<dyn QueueStoreProvider>,
        EngineSettings::default(),
    ));
    let defaults = DraftDefaults {
        pick_seconds: 60,
        total_rounds: 3,
    };

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    tokio::spawn(ws_server::serve(listener, supervisor, defaults));
    (url, db)
}

async fn connect(url: &str) -> Client {
    let (client, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    client
}

async fn send(client: &mut Client, json: &str) {
    client.send(Message::Text(json.into())).await.unwrap();
}

async fn recv(client: &mut Client) -> ServerMessage {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for server")
            .expect("connection closed")
            .unwrap();
        if let Message::Text(text) = frame {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[tokio::test]
async fn open_watch_and_pick_over_websocket() {
    let (url, db) = start_server().await;
    let mut owner = connect(&url).await;
    let mut watcher = connect(&url).await;

    send(
        &mut owner,
        r#"{"type":"open_room","room_id":"ws-1","participants":["alice","bob"]}"#,
    )
    .await;
    match recv(&mut owner).await {
        ServerMessage::Snapshot { snapshot } => {
            assert_eq!(snapshot.status, RoomStatus::Drafting);
            assert_eq!(snapshot.draft.total_picks, 6);
            assert_eq!(snapshot.draft.on_the_clock.as_deref(), Some("alice"));
        }
        other => panic!("expected Snapshot, got {other:?}"),
    }

    send(&mut watcher, r#"{"type":"watch","room_id":"ws-1"}"#).await;
    assert!(matches!(recv(&mut watcher).await, ServerMessage::Snapshot { .. }));

    send(
        &mut owner,
        r#"{"type":"command","command":{"type":"submit_pick","room_id":"ws-1","participant_id":"alice","player_id":"nfl-007"}}"#,
    )
    .await;
    assert_eq!(recv(&mut owner).await, ServerMessage::Ack);

    match recv(&mut watcher).await {
        ServerMessage::Event {
            room_id,
            event: RoomEvent::PickCommitted { pick },
        } => {
            assert_eq!(room_id, "ws-1");
            assert_eq!(pick.pick_number, 1);
            assert_eq!(pick.participant_id, "alice");
            assert_eq!(pick.player_id.as_deref(), Some("nfl-007"));
        }
        other => panic!("expected PickCommitted, got {other:?}"),
    }
    match recv(&mut watcher).await {
        ServerMessage::Event {
            event:
                RoomEvent::ClockStarted {
                    pick_number,
                    participant_id,
                    ..
                },
            ..
        } => {
            assert_eq!(pick_number, 2);
            assert_eq!(participant_id, "bob");
        }
        other => panic!("expected ClockStarted, got {other:?}"),
    }

    assert_eq!(db.pick_count("ws-1").unwrap(), 1);
}

#[tokio::test]
async fn bad_requests_are_rejected_without_closing() {
    let (url, _db) = start_server().await;
    let mut client = connect(&url).await;

    send(&mut client, r#"{"type":"launch_rockets"}"#).await;
    assert!(matches!(
        recv(&mut client).await,
        ServerMessage::Rejected {
            kind: ErrorKind::InvalidMessage,
            ..
        }
    ));

    send(
        &mut client,
        r#"{"type":"open_room","room_id":"ws-2","participants":["a","b"]}"#,
    )
    .await;
    assert!(matches!(recv(&mut client).await, ServerMessage::Snapshot { .. }));

    send(
        &mut client,
        r#"{"type":"command","command":{"type":"submit_pick","room_id":"ws-2","participant_id":"a","player_id":"nfl-999"}}"#,
    )
    .await;
    assert!(matches!(
        recv(&mut client).await,
        ServerMessage::Rejected {
            kind: ErrorKind::PlayerUnavailable,
            ..
        }
    ));

    send(
        &mut client,
        r#"{"type":"command","command":{"type":"update_queue","room_id":"ws-2","participant_id":"b","player_ids":["nfl-001","nfl-001"]}}"#,
    )
    .await;
    assert!(matches!(
        recv(&mut client).await,
        ServerMessage::Rejected {
            kind: ErrorKind::DuplicateQueueEntry,
            ..
        }
    ));
}
