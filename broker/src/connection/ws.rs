use super::LeaveOnDrop;
use crate::error::{Error, ErrorKind, Result};
use crate::registry::RegistryHandle;
use crate::session::{Frame, Outbound, SessionId};
use axum::extract::ws::Message;
use futures::{Sink, SinkExt, Stream, StreamExt};
use log::*;
use std::fmt::Display;
use std::time::Duration;
use tokio::time::{interval_at, timeout, timeout_at, Instant, MissedTickBehavior};

/// Upper bound on frames folded into a single WebSocket message.
const MAX_COALESCED_FRAMES: usize = 256;

/// Ping timers reject a zero period.
const MIN_PING_PERIOD: Duration = Duration::from_millis(1);

#[derive(Debug, Clone)]
pub struct WsSettings {
    /// Time allowed to write a message to the peer.
    pub write_wait: Duration,
    /// Time allowed to read the next pong from the peer.
    pub pong_wait: Duration,
    /// Interval between pings. Must be less than `pong_wait`.
    pub ping_period: Duration,
    /// Maximum inbound message size in bytes.
    pub max_message_size: usize,
}

impl WsSettings {
    pub fn new(write_wait: Duration, pong_wait: Duration, max_message_size: usize) -> Self {
        Self {
            write_wait,
            pong_wait,
            ping_period: (pong_wait * 9 / 10).max(MIN_PING_PERIOD),
            max_message_size,
        }
    }
}

impl Default for WsSettings {
    fn default() -> Self {
        Self::new(Duration::from_secs(10), Duration::from_secs(60), 512)
    }
}

/// Runs a WebSocket session until either side gives up.
///
/// The reader and writer run as separate tasks. When the reader stops (client
/// close, error, oversized message or missed pong) the session leaves the
/// registry, which closes the outbound queue and lets the writer send a close
/// frame. When the writer fails first the reader is aborted.
pub async fn serve<S, E>(
    socket: S,
    registry: RegistryHandle,
    session_id: SessionId,
    outbound: Outbound,
    settings: WsSettings,
) where
    S: Stream<Item = core::result::Result<Message, E>> + Sink<Message, Error = E> + Send + 'static,
    E: Display + Send + 'static,
{
    let _guard = LeaveOnDrop::new(registry.clone(), session_id.clone());
    let (sink, stream) = socket.split();

    let mut writer = tokio::spawn(write_pump(
        sink,
        outbound,
        settings.clone(),
        session_id.clone(),
    ));
    let mut reader = tokio::spawn(read_pump(stream, settings, session_id.clone()));

    tokio::select! {
        _ = &mut reader => {
            registry.leave(&session_id);
            let _ = writer.await;
        }
        _ = &mut writer => {
            reader.abort();
        }
    }
    debug!("WebSocket session {session_id} finished");
}

/// Reads inbound messages. Only pongs matter: each one pushes the idle
/// deadline forward. Returns when the session should end.
async fn read_pump<R, E>(mut stream: R, settings: WsSettings, session_id: SessionId)
where
    R: Stream<Item = core::result::Result<Message, E>> + Unpin,
    E: Display,
{
    let mut deadline = Instant::now() + settings.pong_wait;
    loop {
        let next = match timeout_at(deadline, stream.next()).await {
            Ok(next) => next,
            Err(_) => {
                debug!(
                    "Session {session_id} sent no pong within {:?}",
                    settings.pong_wait
                );
                return;
            }
        };

        match next {
            Some(Ok(Message::Pong(_))) => deadline = Instant::now() + settings.pong_wait,
            Some(Ok(Message::Close(_))) | None => {
                debug!("Session {session_id} closed by client");
                return;
            }
            Some(Ok(message)) => {
                let size = payload_len(&message);
                if size > settings.max_message_size {
                    warn!(
                        "Session {session_id} sent a {size} byte message (limit {}); closing",
                        settings.max_message_size
                    );
                    return;
                }
                trace!("Session {session_id} sent a {size} byte message");
            }
            Some(Err(e)) => {
                warn!("WebSocket read error on session {session_id}: {e}");
                return;
            }
        }
    }
}

/// Drains the outbound queue onto the socket and keeps the peer alive with
/// pings while the queue is quiet.
async fn write_pump<W, E>(
    mut sink: W,
    mut outbound: Outbound,
    settings: WsSettings,
    session_id: SessionId,
) where
    W: Sink<Message, Error = E> + Unpin,
    E: Display,
{
    let mut ping = interval_at(Instant::now() + settings.ping_period, settings.ping_period);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(frame) = frame else {
                    // The registry dropped this session.
                    let _ = send(&mut sink, Message::Close(None), settings.write_wait).await;
                    debug!("Session {session_id} queue closed; sent close frame");
                    return;
                };
                let text = coalesce(frame, &mut outbound);
                if let Err(e) = send(&mut sink, Message::Text(text), settings.write_wait).await {
                    warn!("WebSocket write failed on session {session_id}: {e}");
                    return;
                }
                ping.reset();
            }
            _ = ping.tick() => {
                if let Err(e) = send(&mut sink, Message::Ping(Vec::new()), settings.write_wait).await {
                    warn!("WebSocket ping failed on session {session_id}: {e}");
                    return;
                }
            }
        }
    }
}

/// Joins `first` with any frames already waiting, newline separated and in
/// queue order.
fn coalesce(first: Frame, outbound: &mut Outbound) -> String {
    let mut text = String::from(&*first);
    for _ in 1..MAX_COALESCED_FRAMES {
        match outbound.try_recv() {
            Ok(next) => {
                text.push('\n');
                text.push_str(&next);
            }
            Err(_) => break,
        }
    }
    text
}

async fn send<W, E>(sink: &mut W, message: Message, write_wait: Duration) -> Result<()>
where
    W: Sink<Message, Error = E> + Unpin,
    E: Display,
{
    match timeout(write_wait, sink.send(message)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(Error::with_source(ErrorKind::Transport, e.to_string())),
        Err(_) => Err(Error::with_source(
            ErrorKind::Transport,
            format!("write timed out after {write_wait:?}"),
        )),
    }
}

fn payload_len(message: &Message) -> usize {
    match message {
        Message::Text(text) => text.len(),
        Message::Binary(data) | Message::Ping(data) | Message::Pong(data) => data.len(),
        Message::Close(_) => 0,
    }
}
