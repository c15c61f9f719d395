//! Chat session: one display name joined to one room over one WebSocket.
//!
//! Outbound commands go straight to the socket. Inbound frames are pulled by
//! [`ChatSession::next_event`], which is the only place the timeline is
//! appended to, so arrival order on the wire is timeline order.

mod events;
mod state;

pub use events::SessionEvent;
pub use state::SessionState;

use chat_protocol::{ClientFrame, RoomCode, ServerFrame, VoicePayload, VOICE_SENDER_LABEL};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use log::{debug, error, info, warn};
use std::path::PathBuf;
use std::time::Duration;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use crate::audio_resource::AudioResource;
use crate::config::ClientConfig;
use crate::error::{ChatError, Result};
use crate::identity::{DisplayName, KeyValueStore};
use crate::timeline::{ChatPayload, Timeline};
use crate::transport::{self, WsStream};

const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Per-session settings taken from [`ClientConfig`]
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub audio_dir: PathBuf,
    pub timeline_limit: Option<usize>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            audio_dir: std::env::temp_dir(),
            timeline_limit: None,
        }
    }
}

impl From<&ClientConfig> for SessionOptions {
    fn from(config: &ClientConfig) -> Self {
        Self {
            audio_dir: config.audio_dir.clone(),
            timeline_limit: config.timeline_limit,
        }
    }
}

pub struct ChatSession<S = WsStream> {
    room_code: RoomCode,
    display_name: DisplayName,
    state: SessionState,
    socket: Option<S>,
    timeline: Timeline,
    audio_dir: PathBuf,
    released: bool,
}

impl ChatSession<WsStream> {
    /// Join `room_code` under the display name remembered in `identity`.
    ///
    /// Refuses with [`ChatError::IdentityMissing`] before touching the
    /// network if no name is stored.
    pub async fn open(
        config: &ClientConfig,
        room_code: RoomCode,
        identity: &dyn KeyValueStore,
    ) -> Result<Self> {
        let display_name = identity.display_name().ok_or_else(|| {
            warn!("Refusing to open a session without a username");
            ChatError::IdentityMissing
        })?;
        Self::open_as(config, room_code, display_name).await
    }

    pub async fn open_as(
        config: &ClientConfig,
        room_code: RoomCode,
        display_name: DisplayName,
    ) -> Result<Self> {
        info!("💬 Opening session for room {} as {}", room_code, display_name);

        let socket = transport::connect(config).await.map_err(|e| {
            error!("❌ Could not connect for room {}: {}", room_code, e);
            e
        })?;

        Self::join(socket, room_code, display_name, SessionOptions::from(config)).await
    }
}

impl<S> ChatSession<S>
where
    S: Stream<Item = std::result::Result<Message, WsError>>
        + Sink<Message, Error = WsError>
        + Unpin,
{
    /// Send JOIN over an already connected socket
    pub async fn join(
        socket: S,
        room_code: RoomCode,
        display_name: DisplayName,
        options: SessionOptions,
    ) -> Result<Self> {
        let mut state = SessionState::Idle;
        state.advance(SessionState::Connecting);

        let mut session = Self {
            room_code,
            display_name,
            state,
            socket: Some(socket),
            timeline: Timeline::new().with_limit(options.timeline_limit),
            audio_dir: options.audio_dir,
            released: false,
        };

        let join = ClientFrame::Join {
            room_code: session.room_code.clone(),
            display_name: session.display_name.as_str().to_string(),
        };
        session.send_frame(&join).await?;
        session.state.advance(SessionState::Joined);

        info!(
            "✅ Joined room {} as {}",
            session.room_code, session.display_name
        );
        Ok(session)
    }

    /// Send a chat line. Bodies that are empty after trimming are rejected
    /// locally and never reach the wire.
    pub async fn send_text(&mut self, body: &str) -> Result<()> {
        self.ensure_joined()?;
        if body.trim().is_empty() {
            debug!("Not sending empty message");
            return Err(ChatError::EmptyMessage);
        }

        let frame = ClientFrame::Text {
            room_code: self.room_code.clone(),
            body: body.to_string(),
        };
        self.send_frame(&frame).await
    }

    /// Send a recorded voice message as a base64 `VOICE` frame
    pub async fn send_voice(&mut self, payload: &VoicePayload) -> Result<()> {
        self.ensure_joined()?;
        if payload.is_empty() {
            return Err(ChatError::EmptyMessage);
        }

        let frame = ClientFrame::Voice {
            room_code: self.room_code.clone(),
            payload: payload.clone(),
        };
        self.send_frame(&frame).await?;
        info!("🎤 Sent voice message ({} base64 bytes)", payload.len());
        Ok(())
    }

    /// Wait for the next inbound event.
    ///
    /// Chat and voice frames are appended to the timeline before their
    /// [`SessionEvent::Message`] is returned. Malformed frames are logged and
    /// skipped. After a terminal event, or once the session is closed, this
    /// returns `None`.
    ///
    /// Cancel safe: dropping the future between frames loses nothing.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        loop {
            if self.state.is_terminal() {
                return None;
            }
            let socket = self.socket.as_mut()?;

            match socket.next().await {
                Some(Ok(Message::Text(text))) => match ServerFrame::from_text(text.as_str()) {
                    Ok(frame) => {
                        if let Some(event) = self.handle_frame(frame) {
                            return Some(event);
                        }
                    }
                    Err(e) => {
                        warn!("⚠️  Dropping malformed frame ({} bytes): {}", text.len(), e);
                    }
                },
                Some(Ok(Message::Binary(data))) => {
                    let frame = ServerFrame::from_binary(data.as_slice().to_vec());
                    if let Some(event) = self.handle_frame(frame) {
                        return Some(event);
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|frame| frame.reason.to_string())
                        .filter(|reason| !reason.is_empty());
                    info!("🔌 Server closed room {} ({:?})", self.room_code, reason);
                    self.finish(SessionState::Closed);
                    return Some(SessionEvent::Closed { reason });
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    error!("❌ WebSocket error in room {}: {}", self.room_code, e);
                    self.finish(SessionState::Error);
                    return Some(SessionEvent::Error(e.into()));
                }
                None => {
                    info!("🔌 Connection for room {} ended", self.room_code);
                    self.finish(SessionState::Closed);
                    return Some(SessionEvent::Closed { reason: None });
                }
            }
        }
    }

    /// Tear the session down: close the connection and release every audio
    /// resource. Safe to call repeatedly; returns how many resources this
    /// call released.
    pub async fn close(&mut self) -> usize {
        if let Some(mut socket) = self.socket.take() {
            match tokio::time::timeout(CLOSE_TIMEOUT, socket.close()).await {
                Ok(Ok(())) => debug!("Close handshake sent for room {}", self.room_code),
                Ok(Err(e)) => debug!("Close handshake failed: {}", e),
                Err(_) => warn!("Timed out closing connection for room {}", self.room_code),
            }
        }
        self.state.advance(SessionState::Closed);
        self.release()
    }

    fn handle_frame(&mut self, frame: ServerFrame) -> Option<SessionEvent> {
        let join_rejected = frame.is_join_rejection();

        match frame {
            ServerFrame::Chat { sender, content } => {
                debug!("📥 Text from {} ({} chars)", sender, content.len());
                let id = self.timeline.append(sender, ChatPayload::Text(content));
                Some(SessionEvent::Message(id))
            }
            ServerFrame::Voice(data) => match AudioResource::materialize(&data, &self.audio_dir) {
                Ok(audio) => {
                    debug!("📥 Voice message ({} bytes)", data.len());
                    let id = self
                        .timeline
                        .append(VOICE_SENDER_LABEL, ChatPayload::Voice(audio));
                    Some(SessionEvent::Message(id))
                }
                Err(e) => {
                    warn!("⚠️  Dropping voice message ({} bytes): {}", data.len(), e);
                    None
                }
            },
            ServerFrame::Notice(notice) if join_rejected => {
                warn!("❌ Server rejected room {}: {}", self.room_code, notice);
                self.finish(SessionState::Error);
                Some(SessionEvent::Error(ChatError::JoinRejected(notice)))
            }
            ServerFrame::Notice(notice) => {
                info!("ℹ️  Server notice: {}", notice);
                Some(SessionEvent::Notice(notice))
            }
        }
    }

    async fn send_frame(&mut self, frame: &ClientFrame) -> Result<()> {
        let state = self.state;
        let Some(socket) = self.socket.as_mut() else {
            return Err(ChatError::NotJoined { state });
        };

        debug!("📤 Sending {} frame", frame.command());
        if let Err(e) = socket.send(Message::Text(frame.encode().into())).await {
            error!("❌ Failed to send {} frame: {}", frame.command(), e);
            self.finish(SessionState::Error);
            return Err(e.into());
        }
        Ok(())
    }
}

impl<S> ChatSession<S> {
    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn room_code(&self) -> &RoomCode {
        &self.room_code
    }

    pub fn display_name(&self) -> &DisplayName {
        &self.display_name
    }

    /// Messages received so far. Stays readable after a transport error,
    /// cleared by [`ChatSession::close`].
    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    fn ensure_joined(&self) -> Result<()> {
        if self.state.can_send() {
            Ok(())
        } else {
            Err(ChatError::NotJoined { state: self.state })
        }
    }

    /// Enter a terminal state and stop reading from the connection
    fn finish(&mut self, next: SessionState) {
        self.state.advance(next);
        self.socket = None;
    }

    fn release(&mut self) -> usize {
        if self.released {
            return 0;
        }
        self.released = true;

        let released = self.timeline.release_all();
        if released > 0 {
            info!("🧹 Released {} voice messages from room {}", released, self.room_code);
        }
        released
    }
}

impl<S> Drop for ChatSession<S> {
    fn drop(&mut self) {
        self.release();
    }
}
