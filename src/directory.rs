//! Room directory: lists the rooms the server knows about and creates new ones.
//!
//! Every `LIST_CHATROOMS` reply is a full snapshot. [`RoomList`] replaces its
//! contents wholesale and never merges.

use chat_protocol::{parse_room_list, ClientFrame, ProtocolError, RoomCode, RoomDescriptor};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use log::{debug, info, warn};
use std::time::Duration;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use crate::config::ClientConfig;
use crate::error::{ChatError, Result};
use crate::transport::{self, WsStream};

/// Most recent room snapshot
#[derive(Debug, Clone, Default)]
pub struct RoomList {
    rooms: Vec<RoomDescriptor>,
    updates: u64,
}

impl RoomList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the held list with the rooms in `frame`.
    ///
    /// On error the previous list is kept untouched.
    pub fn apply(&mut self, frame: &str) -> std::result::Result<usize, ProtocolError> {
        let rooms = parse_room_list(frame)?;
        self.rooms = rooms;
        self.updates += 1;
        Ok(self.rooms.len())
    }

    pub fn rooms(&self) -> &[RoomDescriptor] {
        &self.rooms
    }

    /// How many snapshots have been applied
    pub fn updates(&self) -> u64 {
        self.updates
    }
}

pub struct RoomDirectory<S = WsStream> {
    socket: Option<S>,
    list: RoomList,
}

impl RoomDirectory<WsStream> {
    /// Connect and request the room list
    pub async fn open(config: &ClientConfig) -> Result<Self> {
        let socket = transport::connect(config).await?;
        Self::attach(socket).await
    }
}

impl<S> RoomDirectory<S>
where
    S: Stream<Item = std::result::Result<Message, WsError>>
        + Sink<Message, Error = WsError>
        + Unpin,
{
    /// Use an already connected socket and send the first `LIST_CHATROOMS`
    pub async fn attach(socket: S) -> Result<Self> {
        let mut directory = Self {
            socket: Some(socket),
            list: RoomList::new(),
        };
        directory.refresh().await?;
        Ok(directory)
    }

    /// Ask the server for a fresh snapshot
    pub async fn refresh(&mut self) -> Result<()> {
        let socket = self.socket.as_mut().ok_or(ChatError::ConnectionClosed)?;
        debug!("📤 Requesting room list");
        socket
            .send(Message::Text(ClientFrame::ListRooms.encode().into()))
            .await?;
        Ok(())
    }

    /// Wait for the next valid snapshot and return a copy of it.
    ///
    /// Malformed replies are logged and skipped. Returns `Ok(None)` once the
    /// server closes the connection.
    pub async fn next_snapshot(&mut self) -> Result<Option<Vec<RoomDescriptor>>> {
        loop {
            let Some(socket) = self.socket.as_mut() else {
                return Ok(None);
            };

            match socket.next().await {
                Some(Ok(Message::Text(text))) => match self.list.apply(text.as_str()) {
                    Ok(count) => {
                        info!("📋 Room list updated: {} rooms", count);
                        return Ok(Some(self.list.rooms().to_vec()));
                    }
                    Err(e) => warn!("⚠️  Ignoring malformed room list: {}", e),
                },
                Some(Ok(Message::Binary(data))) => {
                    warn!("⚠️  Ignoring {} byte binary frame on directory", data.len());
                }
                Some(Ok(Message::Close(_))) | None => {
                    info!("🔌 Directory connection closed");
                    self.socket = None;
                    return Ok(None);
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    self.socket = None;
                    return Err(e.into());
                }
            }
        }
    }

    /// Current list of rooms, empty until the first snapshot arrives
    pub fn rooms(&self) -> &[RoomDescriptor] {
        self.list.rooms()
    }

    pub fn list(&self) -> &RoomList {
        &self.list
    }

    /// Turn the directory into a stream of snapshots ending when the
    /// connection does
    pub fn snapshots(mut self) -> impl Stream<Item = Result<Vec<RoomDescriptor>>> {
        async_stream::stream! {
            loop {
                match self.next_snapshot().await {
                    Ok(Some(rooms)) => yield Ok(rooms),
                    Ok(None) => break,
                    Err(e) => {
                        yield Err(e);
                        break;
                    }
                }
            }
            self.close().await;
        }
    }

    /// Release the connection. Safe to call more than once.
    pub async fn close(&mut self) {
        if let Some(mut socket) = self.socket.take() {
            if let Err(e) = socket.close().await {
                debug!("Directory close handshake failed: {}", e);
            }
        }
    }
}

/// Ask the server for a new room and return its code
pub async fn create_room(config: &ClientConfig) -> Result<RoomCode> {
    let mut socket = transport::connect(config).await?;
    let result = request_room(&mut socket, config.connect_timeout).await;
    if let Err(e) = socket.close(None).await {
        debug!("Close after CREATE failed: {}", e);
    }
    result
}

/// Send `CREATE` and wait up to `timeout` for the room code reply
pub async fn request_room<S>(socket: &mut S, timeout: Duration) -> Result<RoomCode>
where
    S: Stream<Item = std::result::Result<Message, WsError>>
        + Sink<Message, Error = WsError>
        + Unpin,
{
    debug!("📤 Requesting a new room");
    socket
        .send(Message::Text(ClientFrame::Create.encode().into()))
        .await?;

    let reply = tokio::time::timeout(timeout, async {
        loop {
            match socket.next().await {
                Some(Ok(Message::Text(text))) => return Ok(text.to_string()),
                Some(Ok(Message::Close(_))) | None => return Err(ChatError::ConnectionClosed),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(ChatError::from(e)),
            }
        }
    })
    .await
    .map_err(|_| ChatError::ConnectionClosed)??;

    // The code is the first whitespace-separated token of the reply
    let token = reply.split_whitespace().next().unwrap_or_default();
    let room_code = RoomCode::new(token)?;
    info!("🆕 Created room {}", room_code);
    Ok(room_code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_protocol::encode_room_list;
    use futures_util::stream;

    fn snapshot(codes: &[&str]) -> String {
        let rooms: Vec<RoomDescriptor> = codes
            .iter()
            .map(|code| RoomDescriptor::new(RoomCode::new(*code).unwrap(), 1))
            .collect();
        encode_room_list(&rooms).unwrap()
    }

    #[test]
    fn test_apply_replaces_list() {
        let mut list = RoomList::new();
        assert_eq!(list.apply(&snapshot(&["1000", "1001"])).unwrap(), 2);
        assert_eq!(list.apply(&snapshot(&["2000"])).unwrap(), 1);

        let codes: Vec<&str> = list.rooms().iter().map(|r| r.room_code.as_str()).collect();
        assert_eq!(codes, vec!["2000"]);
        assert_eq!(list.updates(), 2);
    }

    #[test]
    fn test_non_list_payload_keeps_list() {
        let mut list = RoomList::new();
        list.apply(&snapshot(&["1000"])).unwrap();

        assert!(list.apply(r#"{"room_code":"9999"}"#).is_err());
        assert!(list.apply("Invalid room code").is_err());
        assert!(list.apply(r#"[{"no_code":true}]"#).is_err());

        assert_eq!(list.rooms().len(), 1);
        assert_eq!(list.rooms()[0].room_code.as_str(), "1000");
        assert_eq!(list.updates(), 1);
    }

    #[test]
    fn test_empty_array_clears_list() {
        let mut list = RoomList::new();
        list.apply(&snapshot(&["1000"])).unwrap();
        assert_eq!(list.apply("[]").unwrap(), 0);
        assert!(list.rooms().is_empty());
    }

    #[tokio::test]
    async fn test_request_room_reads_first_token() {
        // Sink half discards, stream half replays the server reply
        let replies = stream::iter(vec![Ok::<_, WsError>(Message::Text(
            "1042\n".to_string().into(),
        ))]);
        let mut socket = SinkStream {
            inbound: Box::pin(replies),
        };

        let code = request_room(&mut socket, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(code.as_str(), "1042");
    }

    #[tokio::test]
    async fn test_request_room_without_reply() {
        let mut socket = SinkStream {
            inbound: Box::pin(stream::empty::<std::result::Result<Message, WsError>>()),
        };
        assert!(matches!(
            request_room(&mut socket, Duration::from_secs(1)).await,
            Err(ChatError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_next_snapshot_skips_malformed_frames() {
        let replies = stream::iter(vec![
            Ok::<_, WsError>(Message::Text(snapshot(&["1000"]).into())),
            Ok(Message::Text("Invalid room code".to_string().into())),
            Ok(Message::Binary(vec![1, 2, 3].into())),
            Ok(Message::Text(r#"{"room_code":"9999"}"#.to_string().into())),
            Ok(Message::Text(snapshot(&["2000", "2001"]).into())),
        ]);
        let socket = SinkStream {
            inbound: Box::pin(replies),
        };
        let mut directory = RoomDirectory::attach(socket).await.unwrap();

        let first = directory.next_snapshot().await.unwrap().unwrap();
        assert_eq!(first.len(), 1);

        let second = directory.next_snapshot().await.unwrap().unwrap();
        let codes: Vec<&str> = second.iter().map(|r| r.room_code.as_str()).collect();
        assert_eq!(codes, vec!["2000", "2001"]);
        assert_eq!(directory.list().updates(), 2);

        assert!(directory.next_snapshot().await.unwrap().is_none());
        assert_eq!(directory.rooms().len(), 2);
    }

    struct SinkStream {
        inbound: std::pin::Pin<
            Box<dyn Stream<Item = std::result::Result<Message, WsError>> + Send>,
        >,
    }

    impl Stream for SinkStream {
        type Item = std::result::Result<Message, WsError>;

        fn poll_next(
            mut self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<Option<Self::Item>> {
            self.inbound.as_mut().poll_next(cx)
        }
    }

    impl Sink<Message> for SinkStream {
        type Error = WsError;

        fn poll_ready(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::result::Result<(), WsError>> {
            std::task::Poll::Ready(Ok(()))
        }

        fn start_send(
            self: std::pin::Pin<&mut Self>,
            _item: Message,
        ) -> std::result::Result<(), WsError> {
            Ok(())
        }

        fn poll_flush(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::result::Result<(), WsError>> {
            std::task::Poll::Ready(Ok(()))
        }

        fn poll_close(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::result::Result<(), WsError>> {
            std::task::Poll::Ready(Ok(()))
        }
    }
}
