//! Live stream driver.
//!
//! Connects to a push source (WebSocket or server-sent events), feeds output
//! through a [`TimeShiftBuffer`] and reconnects with exponential backoff when
//! the connection drops.
//!
//! Messages are JSON. An object carrying a size resets the terminal:
//!
//! ```json
//! {"cols": 80, "rows": 24, "init": "\u001b[2J", "time": 12.5}
//! ```
//!
//! An array is an output event, `[time, "o", data]`. WebSocket binary frames
//! are raw output.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::StreamExt;
use reqwest_eventsource::{Error as SseError, Event, EventSource, retry};
use serde::Deserialize;
use serde_json::Value;
use tokio::task::AbortHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

use super::backoff::{Backoff, BackoffState};
use super::buffer::TimeShiftBuffer;
use super::{DriverContext, DriverInfo, DriverOptions};
use crate::error::PlayerError;
use crate::source::Transport;

/// Width used when a control message carries only a height.
const FALLBACK_COLS: usize = 80;
/// Height used when a control message carries only a width.
const FALLBACK_ROWS: usize = 24;

/// How a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Close {
    /// The server ended the stream on purpose.
    Clean,
    /// The connection failed or dropped.
    Unclean,
}

#[derive(Debug, Deserialize)]
struct ControlMessage {
    #[serde(alias = "width")]
    cols: Option<usize>,
    #[serde(alias = "height")]
    rows: Option<usize>,
    init: Option<String>,
    time: Option<f64>,
}

/// Stream time anchored to a clock reading.
#[derive(Debug, Clone, Copy)]
struct StreamClock {
    time: f64,
    at_ms: f64,
}

#[derive(Debug, Default)]
struct LiveState {
    task: Option<AbortHandle>,
    buffer: Option<TimeShiftBuffer>,
    stream_clock: Option<StreamClock>,
}

#[derive(Debug)]
struct Inner {
    transport: Transport,
    url: String,
    ctx: DriverContext,
    buffer_time: f64,
    reconnect: Backoff,
    info: DriverInfo,
    stopping: AtomicBool,
    state: Mutex<LiveState>,
}

/// Plays a live stream.
#[derive(Debug)]
pub struct LiveDriver {
    inner: Arc<Inner>,
}

impl LiveDriver {
    /// Create a driver. Nothing connects until [`LiveDriver::start`].
    #[must_use]
    pub fn new(
        transport: Transport,
        url: impl Into<String>,
        ctx: DriverContext,
        options: &DriverOptions,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                url: url.into(),
                ctx,
                buffer_time: options.buffer_time,
                reconnect: options.reconnect,
                info: DriverInfo {
                    cols: options.cols,
                    rows: options.rows,
                    duration: None,
                    poster: None,
                },
                stopping: AtomicBool::new(false),
                state: Mutex::new(LiveState::default()),
            }),
        }
    }

    /// What is known before connecting.
    #[must_use]
    pub fn info(&self) -> DriverInfo {
        self.inner.info.clone()
    }

    /// Connect and keep the connection alive until stopped.
    pub fn start(&self) {
        let mut state = self.inner.lock();
        if state.task.is_some() {
            return;
        }
        self.inner.stopping.store(false, Ordering::Release);
        let task = tokio::spawn(run(Arc::clone(&self.inner)));
        state.task = Some(task.abort_handle());
    }

    /// Close the connection and stop feeding.
    pub fn stop(&self) {
        self.inner.stopping.store(true, Ordering::Release);
        let was_running = {
            let mut state = self.inner.lock();
            if let Some(buffer) = state.buffer.take() {
                buffer.stop();
            }
            match state.task.take() {
                Some(task) => {
                    task.abort();
                    true
                }
                None => false,
            }
        };
        tracing::debug!(url = %self.inner.url, "live stream stopped");
        // Whoever takes the task reports the finish.
        if was_running {
            self.inner.ctx.finish();
        }
    }

    /// Current stream time in seconds, once the stream reported one.
    #[must_use]
    pub fn current_time(&self) -> Option<f64> {
        let clock = self.inner.lock().stream_clock?;
        Some(clock.time + (self.inner.ctx.now() - clock.at_ms) / 1000.0)
    }
}

impl Drop for LiveDriver {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, LiveState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }

    fn set_stream_time(&self, state: &mut LiveState, time: f64) {
        state.stream_clock = Some(StreamClock {
            time,
            at_ms: self.ctx.now(),
        });
    }

    fn replace_buffer(&self, base_time: f64) {
        let buffer = TimeShiftBuffer::starting_at(self.buffer_time, base_time, self.ctx.clone());
        let mut state = self.lock();
        if let Some(old) = state.buffer.replace(buffer) {
            old.stop();
        }
    }

    fn stop_buffer(&self) {
        if let Some(buffer) = self.lock().buffer.take() {
            buffer.stop();
        }
    }

    fn on_connect(&self, backoff: &mut BackoffState) {
        tracing::info!(url = %self.url, transport = ?self.transport, "connected");
        backoff.reset();
        self.ctx.set_waiting(false);
        self.replace_buffer(0.0);
    }

    fn handle_message(&self, text: &str) {
        match serde_json::from_str::<Value>(text) {
            Ok(Value::Array(event)) => self.handle_event(event),
            Ok(value @ Value::Object(_)) => match serde_json::from_value::<ControlMessage>(value) {
                Ok(control) if control.cols.is_some() || control.rows.is_some() => {
                    self.handle_control(control);
                }
                Ok(_) => tracing::debug!("ignoring object without dimensions"),
                Err(e) => tracing::warn!(error = %e, "malformed control message"),
            },
            Ok(_) => tracing::debug!("ignoring unexpected message"),
            Err(e) => {
                let err = PlayerError::from(e);
                tracing::warn!(error = %err, "unparseable message");
            }
        }
    }

    fn handle_control(&self, control: ControlMessage) {
        let cols = control.cols.unwrap_or(FALLBACK_COLS);
        let rows = control.rows.unwrap_or(FALLBACK_ROWS);
        let time = control.time.unwrap_or(0.0);
        tracing::debug!(cols, rows, time, "terminal reset");

        self.replace_buffer(time);
        {
            let mut state = self.lock();
            self.set_stream_time(&mut state, time);
        }
        self.ctx.reset(cols, rows, control.init.as_deref());
    }

    fn handle_event(&self, event: Vec<Value>) {
        let (time, code, data) =
            match serde_json::from_value::<(f64, String, String)>(Value::Array(event)) {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!(error = %e, "malformed event");
                    return;
                }
            };
        if code != "o" {
            return;
        }

        let mut state = self.lock();
        self.set_stream_time(&mut state, time);
        if let Some(buffer) = &state.buffer {
            buffer.push_event(time, data);
        }
    }

    fn handle_text(&self, text: String) {
        let state = self.lock();
        if let Some(buffer) = &state.buffer {
            buffer.push_text(text);
        }
    }

    async fn run_websocket(&self, backoff: &mut BackoffState) -> Close {
        let mut socket = match connect_async(self.url.as_str()).await {
            Ok((socket, _)) => socket,
            Err(e) => {
                let err = PlayerError::from(e);
                tracing::warn!(url = %self.url, error = %err, "connection failed");
                return Close::Unclean;
            }
        };
        self.on_connect(backoff);

        while let Some(message) = socket.next().await {
            match message {
                Ok(Message::Text(text)) => self.handle_message(&text),
                Ok(Message::Binary(data)) => {
                    self.handle_text(String::from_utf8_lossy(&data).into_owned());
                }
                Ok(Message::Close(frame)) => {
                    let clean = frame
                        .as_ref()
                        .is_none_or(|frame| frame.code == CloseCode::Normal);
                    tracing::debug!(?frame, clean, "close frame received");
                    return if clean { Close::Clean } else { Close::Unclean };
                }
                Ok(_) => {}
                Err(e) => {
                    let err = PlayerError::from(e);
                    tracing::warn!(url = %self.url, error = %err, "connection lost");
                    return Close::Unclean;
                }
            }
        }
        Close::Unclean
    }

    async fn run_event_source(&self, backoff: &mut BackoffState) -> Close {
        let request = reqwest::Client::new().get(self.url.as_str());
        let mut source = match EventSource::new(request) {
            Ok(source) => source,
            Err(e) => {
                tracing::warn!(url = %self.url, error = %e, "cannot build event stream request");
                return Close::Unclean;
            }
        };
        // Reconnection is driven by the backoff loop in `run`.
        source.set_retry_policy(Box::new(retry::Never));

        let close = loop {
            match source.next().await {
                Some(Ok(Event::Open)) => self.on_connect(backoff),
                Some(Ok(Event::Message(message))) => match message.event.as_str() {
                    "done" => break Close::Clean,
                    "message" => self.handle_message(&message.data),
                    other => tracing::debug!(event = other, "ignoring event"),
                },
                Some(Err(SseError::StreamEnded)) | None => break Close::Unclean,
                Some(Err(SseError::InvalidStatusCode(status, _))) => {
                    tracing::warn!(url = %self.url, %status, "event stream refused");
                    break Close::Unclean;
                }
                Some(Err(e)) => {
                    tracing::warn!(url = %self.url, error = %e, "connection lost");
                    break Close::Unclean;
                }
            }
        };
        source.close();
        close
    }
}

async fn run(inner: Arc<Inner>) {
    let mut backoff = BackoffState::new(inner.reconnect);
    loop {
        let close = match inner.transport {
            Transport::WebSocket => inner.run_websocket(&mut backoff).await,
            Transport::EventSource => inner.run_event_source(&mut backoff).await,
        };
        inner.stop_buffer();

        if inner.is_stopping() {
            return;
        }
        if close == Close::Clean {
            tracing::info!(url = %inner.url, "stream ended");
            let owned = inner.lock().task.take().is_some();
            if owned {
                inner.ctx.finish();
            }
            return;
        }

        inner.ctx.set_waiting(true);
        let attempt = backoff.attempt();
        let delay = backoff.next_delay();
        tracing::warn!(
            url = %inner.url,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "stream disrupted, reconnecting"
        );
        inner.ctx.clock().sleep(delay.as_secs_f64() * 1000.0).await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::SinkExt;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::protocol::CloseFrame;

    use super::*;
    use crate::driver::testing::{Call, TestHost};

    fn options() -> DriverOptions {
        DriverOptions {
            buffer_time: 0.0,
            ..DriverOptions::default()
        }
    }

    async fn wait_for(host: &TestHost, mut done: impl FnMut(&[Call]) -> bool) {
        for _ in 0..500 {
            if done(&host.calls()) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out, calls so far: {:?}", host.calls());
    }

    fn normal_close() -> Message {
        Message::Close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: "".into(),
        }))
    }

    #[tokio::test]
    async fn websocket_resets_then_streams() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            ws.send(Message::Text(
                r#"{"width": 20, "height": 5, "init": "hi"}"#.into(),
            ))
            .await
            .unwrap();
            ws.send(Message::Text(r#"[0.5, "o", "abc"]"#.into()))
                .await
                .unwrap();
            ws.send(Message::Text(r#"[0.6, "i", "ignored"]"#.into()))
                .await
                .unwrap();
            ws.send(Message::Binary(b"xyz".to_vec())).await.unwrap();
            ws.send(normal_close()).await.unwrap();
            // Drain until the client acknowledges the close.
            while ws.next().await.is_some() {}
        });

        let (host, ctx) = TestHost::context(1.0);
        let driver = LiveDriver::new(Transport::WebSocket, format!("ws://{addr}"), ctx, &options());
        driver.start();

        wait_for(&host, |calls| calls.contains(&Call::Finish)).await;
        assert_eq!(
            host.calls(),
            vec![
                Call::Waiting(false),
                Call::Reset(20, 5, Some("hi".into())),
                Call::Feed("abc".into()),
                Call::Feed("xyz".into()),
                Call::Finish,
            ]
        );
        assert!(driver.current_time().unwrap() >= 0.5);
    }

    #[tokio::test]
    async fn websocket_reconnects_after_drop() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            // First connection drops without a close frame.
            let (stream, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            drop(ws);

            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            ws.send(Message::Text(r#"[0, "o", "back"]"#.into()))
                .await
                .unwrap();
            ws.send(normal_close()).await.unwrap();
            while ws.next().await.is_some() {}
        });

        let (host, ctx) = TestHost::context(1.0);
        let driver = LiveDriver::new(Transport::WebSocket, format!("ws://{addr}"), ctx, &options());
        driver.start();

        wait_for(&host, |calls| calls.contains(&Call::Finish)).await;
        assert_eq!(
            host.calls(),
            vec![
                Call::Waiting(false),
                Call::Waiting(true),
                Call::Waiting(false),
                Call::Feed("back".into()),
                Call::Finish,
            ]
        );
    }

    #[tokio::test]
    async fn reconnect_delay_follows_playback_speed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            drop(ws);
            let dropped = std::time::Instant::now();

            let (stream, _) = listener.accept().await.unwrap();
            let _ = tx.send(dropped.elapsed());
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            ws.send(normal_close()).await.unwrap();
            while ws.next().await.is_some() {}
        });

        // The first backoff step is 250 ms; at 4x it shrinks to about 62 ms.
        let (host, ctx) = TestHost::context(4.0);
        let driver = LiveDriver::new(Transport::WebSocket, format!("ws://{addr}"), ctx, &options());
        driver.start();

        let gap = rx.await.unwrap();
        assert!(gap < Duration::from_millis(200), "reconnected after {gap:?}");
        wait_for(&host, |calls| calls.contains(&Call::Finish)).await;
    }

    #[tokio::test]
    async fn stopped_driver_does_not_reconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            while ws.next().await.is_some() {}
        });

        let (host, ctx) = TestHost::context(1.0);
        let driver = LiveDriver::new(Transport::WebSocket, format!("ws://{addr}"), ctx, &options());
        driver.start();
        wait_for(&host, |calls| calls.contains(&Call::Waiting(false))).await;

        driver.stop();
        driver.stop();
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(host.calls(), vec![Call::Waiting(false), Call::Finish]);
    }

    #[tokio::test]
    async fn event_source_streams_until_done() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 1024];
            let _ = tokio::io::AsyncReadExt::read(&mut stream, &mut request).await;
            let body = concat!(
                "HTTP/1.1 200 OK\r\n",
                "Content-Type: text/event-stream\r\n",
                "Connection: close\r\n\r\n",
                "data: {\"cols\": 8, \"rows\": 2}\n\n",
                "data: [1.0, \"o\", \"sse\"]\n\n",
                "event: done\ndata: end\n\n",
            );
            stream.write_all(body.as_bytes()).await.unwrap();
            stream.flush().await.unwrap();
            tokio::time::sleep(Duration::from_millis(200)).await;
        });

        let (host, ctx) = TestHost::context(1.0);
        let driver = LiveDriver::new(
            Transport::EventSource,
            format!("http://{addr}/stream"),
            ctx,
            &options(),
        );
        driver.start();

        wait_for(&host, |calls| calls.contains(&Call::Finish)).await;
        assert_eq!(
            host.calls(),
            vec![
                Call::Waiting(false),
                Call::Reset(8, 2, None),
                Call::Feed("sse".into()),
                Call::Finish,
            ]
        );
    }

    #[tokio::test]
    async fn event_source_retries_refused_requests() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut request = [0u8; 1024];
            let (mut stream, _) = listener.accept().await.unwrap();
            let _ = tokio::io::AsyncReadExt::read(&mut stream, &mut request).await;
            let refused = "HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";
            stream.write_all(refused.as_bytes()).await.unwrap();
            stream.flush().await.unwrap();
            drop(stream);

            let (mut stream, _) = listener.accept().await.unwrap();
            let _ = tokio::io::AsyncReadExt::read(&mut stream, &mut request).await;
            let body = concat!(
                "HTTP/1.1 200 OK\r\n",
                "Content-Type: text/event-stream\r\n",
                "Connection: close\r\n\r\n",
                "data: [0.5, \"o\", \"ok\"]\n\n",
                "event: done\ndata: end\n\n",
            );
            stream.write_all(body.as_bytes()).await.unwrap();
            stream.flush().await.unwrap();
            tokio::time::sleep(Duration::from_millis(200)).await;
        });

        let (host, ctx) = TestHost::context(1.0);
        let driver = LiveDriver::new(
            Transport::EventSource,
            format!("http://{addr}/stream"),
            ctx,
            &options(),
        );
        driver.start();

        wait_for(&host, |calls| calls.contains(&Call::Finish)).await;
        assert_eq!(
            host.calls(),
            vec![
                Call::Waiting(true),
                Call::Waiting(false),
                Call::Feed("ok".into()),
                Call::Finish,
            ]
        );
    }

    #[test]
    fn info_uses_configured_size() {
        let (_, ctx) = TestHost::context(1.0);
        let options = DriverOptions {
            cols: Some(100),
            ..DriverOptions::default()
        };
        let driver = LiveDriver::new(Transport::WebSocket, "ws://localhost:1", ctx, &options);
        assert_eq!(driver.info().cols, Some(100));
        assert_eq!(driver.info().duration, None);
        assert!(driver.current_time().is_none());
    }
}
