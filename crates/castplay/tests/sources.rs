//! Synthetic and live sources driven through a player.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use castplay::test_utils::RecordingTerminal;
use castplay::{EventKind, Player, PlayerConfig, PlayerEvent, PlayerState, Source};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

type TestPlayer = Player<RecordingTerminal>;

fn record_events(player: &TestPlayer) -> Arc<Mutex<Vec<PlayerEvent>>> {
    let log = Arc::new(Mutex::new(Vec::new()));
    for kind in EventKind::ALL {
        let log = Arc::clone(&log);
        player.on(kind, move |event| log.lock().unwrap().push(*event));
    }
    log
}

#[tokio::test(start_paused = true)]
async fn random_source_types_without_pausing() {
    let player: TestPlayer = Player::from_source("test://random", PlayerConfig::default()).unwrap();

    let info = player.init().await.unwrap();
    assert!(!info.pausable);
    assert!(!info.seekable);
    assert!(info.poster.is_none());

    player.start().await.unwrap();
    assert_eq!(player.size(), (80, 24));
    tokio::time::sleep(Duration::from_secs(5)).await;

    let fed = player.with_terminal(RecordingTerminal::fed_text).unwrap();
    assert!(!fed.is_empty());
    assert!(!player.pause());
    assert_eq!(player.state(), PlayerState::Playing);

    let elapsed = player.current_time().unwrap();
    assert!((elapsed - 5.0).abs() < 0.1, "elapsed {elapsed}");
    assert!(player.duration().is_none());
    assert!(player.progress().is_none());

    player.stop();
    let count = player.with_terminal(|t| t.fed().len()).unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(player.with_terminal(|t| t.fed().len()), Some(count));
}

#[tokio::test(start_paused = true)]
async fn clock_source_shows_a_poster() {
    let player: TestPlayer = Player::from_source("test://clock", PlayerConfig::default()).unwrap();

    let info = player.init().await.unwrap();
    let poster = info.poster.unwrap();
    assert_eq!(poster.lines.len(), 1);
    assert_eq!(poster.lines[0].text().len(), 5);
    assert_eq!(poster.cursor, None);
    assert_eq!(player.duration(), Some(1440.0));

    player.start().await.unwrap();
    assert_eq!(player.size(), (5, 1));
    let minutes = player.current_time().unwrap();
    assert!((0.0..1440.0).contains(&minutes));
}

#[tokio::test]
async fn unknown_sources_and_events_are_rejected() {
    let err = Player::<RecordingTerminal>::from_source("test://nope", PlayerConfig::default())
        .unwrap_err();
    assert!(err.is_config());

    let player: TestPlayer = Player::from_source("test://random", PlayerConfig::default()).unwrap();
    assert!(player.on_named("ended", |_| {}).is_ok());
    assert!(player.on_named("finished", |_| {}).unwrap_err().is_config());
}

#[tokio::test]
async fn websocket_stream_plays_and_ends() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        ws.send(Message::Text(r#"{"cols": 12, "rows": 4}"#.into()))
            .await
            .unwrap();
        ws.send(Message::Text(r#"[0.1, "o", "live"]"#.into()))
            .await
            .unwrap();
        ws.send(Message::Close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: "".into(),
        })))
        .await
        .unwrap();
        while ws.next().await.is_some() {}
    });

    let config = PlayerConfig::new().with_buffer_time(0.0);
    let player: TestPlayer = Player::from_source(&format!("ws://{addr}"), config).unwrap();
    let events = record_events(&player);

    let info = player.init().await.unwrap();
    assert!(!info.seekable);

    player.start().await.unwrap();
    for _ in 0..500 {
        if player.state() == PlayerState::Finished {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(player.state(), PlayerState::Finished);
    assert_eq!(player.size(), (12, 4));
    assert_eq!(
        player.with_terminal(RecordingTerminal::screen_text),
        Some("live".to_string())
    );
    assert_eq!(
        *events.lock().unwrap(),
        vec![
            PlayerEvent::Starting,
            PlayerEvent::TerminalUpdate,
            PlayerEvent::Play,
            PlayerEvent::Reset { cols: 12, rows: 4 },
            PlayerEvent::Ended,
        ]
    );
}

#[tokio::test]
async fn stopping_a_live_stream_ends_playback() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        if let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await {
            while ws.next().await.is_some() {}
        }
    });

    let config = PlayerConfig::new().with_buffer_time(0.0);
    let player: TestPlayer = Player::from_source(&format!("ws://{addr}"), config).unwrap();
    let events = record_events(&player);

    player.start().await.unwrap();
    player.stop();
    for _ in 0..500 {
        if player.state() == PlayerState::Finished {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(player.state(), PlayerState::Finished);
    let events = events.lock().unwrap();
    assert_eq!(events.last(), Some(&PlayerEvent::Ended));
    assert_eq!(
        events.iter().filter(|e| **e == PlayerEvent::Ended).count(),
        1
    );
}
