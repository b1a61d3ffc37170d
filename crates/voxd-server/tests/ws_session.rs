//! End-to-end test of the `/ws` handshake and supersession behavior (§4.4).
//! Boots the real router on an ephemeral port and drives it with a real
//! `tokio-tungstenite` client.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

use voxd_core::config::AppConfig;
use voxd_server::bootstrap::{bootstrap, CorsConfig};
use voxd_server::create_router;

fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.thermal.enabled = false;
    config
}

async fn start_server() -> String {
    let ctx = bootstrap(test_config()).await.expect("bootstrap should succeed");
    let app = create_router(ctx, &CorsConfig::AllowAll);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("ws://{addr}/ws")
}

#[tokio::test]
async fn connecting_without_a_session_id_creates_one() {
    let url = start_server().await;
    let (mut ws, _response) = tokio_tungstenite::connect_async(&url).await.unwrap();

    let first = ws.next().await.unwrap().unwrap();
    let json: serde_json::Value = match first {
        Message::Text(text) => serde_json::from_str(&text).unwrap(),
        other => panic!("expected a text frame, got {other:?}"),
    };
    assert_eq!(json["type"], "session_created");
    assert!(json["session_id"].as_str().unwrap().len() > 0);
}

#[tokio::test]
async fn a_text_message_produces_a_final_transcript_and_an_assistant_reply() {
    let url = start_server().await;
    let (mut ws, _response) = tokio_tungstenite::connect_async(&url).await.unwrap();

    // First frame is session_created.
    ws.next().await.unwrap().unwrap();

    ws.send(Message::Text(r#"{"type":"text","text":"hello there"}"#.into()))
        .await
        .unwrap();

    let mut saw_final = false;
    let mut saw_assistant_final = false;
    for _ in 0..20 {
        let Ok(Some(Ok(msg))) = tokio::time::timeout(Duration::from_secs(2), ws.next()).await else {
            break;
        };
        if let Message::Text(text) = msg {
            let json: serde_json::Value = serde_json::from_str(&text).unwrap();
            match json["type"].as_str() {
                Some("final") => saw_final = true,
                Some("assistant_final") => saw_assistant_final = true,
                _ => {}
            }
        }
        if saw_final && saw_assistant_final {
            break;
        }
    }

    assert!(saw_final, "expected a final transcript frame");
    assert!(saw_assistant_final, "expected an assistant_final frame");
}

#[tokio::test]
async fn a_malformed_frame_does_not_kill_the_connection() {
    let url = start_server().await;
    let (mut ws, _response) = tokio_tungstenite::connect_async(&url).await.unwrap();
    ws.next().await.unwrap().unwrap();

    ws.send(Message::Text("not json".into())).await.unwrap();

    // The connection must stay open: a follow-up `text` message still
    // produces a reply rather than the socket having been closed
    // server-side in response to the malformed frame.
    ws.send(Message::Text(r#"{"type":"text","text":"still here"}"#.into()))
        .await
        .unwrap();

    let mut saw_final = false;
    for _ in 0..20 {
        let Ok(Some(Ok(Message::Text(text)))) = tokio::time::timeout(Duration::from_secs(2), ws.next()).await else {
            break;
        };
        let json: serde_json::Value = serde_json::from_str(&text).unwrap();
        if json["type"] == "final" {
            saw_final = true;
            break;
        }
    }
    assert!(saw_final, "connection should still be alive after a malformed frame");
}

#[tokio::test]
async fn reconnecting_with_the_same_session_id_supersedes_the_old_connection() {
    let url = start_server().await;
    let (mut first, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    let created = first.next().await.unwrap().unwrap();
    let session_id = match created {
        Message::Text(text) => serde_json::from_str::<serde_json::Value>(&text).unwrap()["session_id"]
            .as_str()
            .unwrap()
            .to_string(),
        other => panic!("expected a text frame, got {other:?}"),
    };

    let second_url = format!("{url}?session_id={session_id}");
    let (mut second, _) = tokio_tungstenite::connect_async(&second_url).await.unwrap();
    let restored = second.next().await.unwrap().unwrap();
    match restored {
        Message::Text(text) => {
            let json: serde_json::Value = serde_json::from_str(&text).unwrap();
            assert_eq!(json["type"], "session_restored");
            assert_eq!(json["session_id"], session_id);
        }
        other => panic!("expected a text frame, got {other:?}"),
    }

    // The first connection should now observe the server closing it.
    let closed = tokio::time::timeout(Duration::from_secs(2), first.next()).await;
    assert!(
        matches!(closed, Ok(None) | Ok(Some(Err(_))) | Ok(Some(Ok(Message::Close(_))))),
        "superseded connection should close"
    );
}
