//! In-process room server speaking the chat wire protocol.
//!
//! Behaves like the production server: `CREATE` hands out a fresh code,
//! `JOIN` replays the room history, `MSG` and `VOICE` are broadcast to every
//! member (sender included) and `LIST_CHATROOMS` answers with a JSON array.
//! Tests can also inject arbitrary frames and drop every connection.

use chat_protocol::{
    encode_room_list, ClientFrame, RoomCode, RoomDescriptor, ServerFrame, INVALID_ROOM_NOTICE,
    NOT_IN_ROOM_NOTICE,
};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use std::collections::{BTreeMap, HashMap};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_util::sync::CancellationToken;

use crate::config::{ClientConfig, ConfigError};

/// First code handed out by `CREATE`
const FIRST_ROOM_CODE: u32 = 1000;

#[derive(Debug)]
struct Member {
    client_id: usize,
    username: String,
}

#[derive(Debug, Default)]
struct Room {
    members: Vec<Member>,
    history: Vec<ServerFrame>,
}

#[derive(Debug)]
struct ServerState {
    rooms: BTreeMap<RoomCode, Room>,
    clients: HashMap<usize, mpsc::UnboundedSender<Message>>,
    received: Vec<ClientFrame>,
    next_client_id: usize,
    next_room_code: u32,
}

impl ServerState {
    fn new() -> Self {
        Self {
            rooms: BTreeMap::new(),
            clients: HashMap::new(),
            received: Vec::new(),
            next_client_id: 1,
            next_room_code: FIRST_ROOM_CODE,
        }
    }

    fn allocate_room(&mut self) -> RoomCode {
        loop {
            let candidate = RoomCode::new(self.next_room_code.to_string());
            self.next_room_code += 1;
            if let Ok(code) = candidate {
                if !self.rooms.contains_key(&code) {
                    self.rooms.insert(code.clone(), Room::default());
                    return code;
                }
            }
        }
    }

    fn send(&self, client_id: usize, message: Message) {
        if let Some(tx) = self.clients.get(&client_id) {
            let _ = tx.send(message);
        }
    }

    fn remove_client(&mut self, client_id: usize) {
        self.clients.remove(&client_id);
        for room in self.rooms.values_mut() {
            room.members.retain(|member| member.client_id != client_id);
        }
    }

    fn handle_frame(&mut self, client_id: usize, frame: ClientFrame) {
        self.received.push(frame.clone());

        match frame {
            ClientFrame::Create => {
                let code = self.allocate_room();
                info!("🆕 Client {} created room {}", client_id, code);
                self.send(client_id, Message::Text(code.to_string().into()));
            }
            ClientFrame::Join {
                room_code,
                display_name,
            } => {
                let Self { rooms, clients, .. } = self;
                match rooms.get_mut(&room_code) {
                    Some(room) => {
                        room.members.push(Member {
                            client_id,
                            username: display_name.clone(),
                        });
                        if let Some(tx) = clients.get(&client_id) {
                            for frame in &room.history {
                                let _ = tx.send(to_message(frame));
                            }
                        }
                        info!("👋 {} joined room {}", display_name, room_code);
                    }
                    None => {
                        debug!("Client {} tried unknown room {}", client_id, room_code);
                        if let Some(tx) = clients.get(&client_id) {
                            let _ = tx.send(Message::Text(INVALID_ROOM_NOTICE.to_string().into()));
                        }
                    }
                }
            }
            ClientFrame::Text { room_code, body } => {
                self.broadcast_from(client_id, &room_code, |sender| ServerFrame::Chat {
                    sender,
                    content: body,
                });
            }
            ClientFrame::Voice { room_code, payload } => match payload.decode() {
                Ok(bytes) => {
                    self.broadcast_from(client_id, &room_code, |_| ServerFrame::Voice(bytes))
                }
                Err(e) => warn!("⚠️  Client {} sent undecodable voice: {}", client_id, e),
            },
            ClientFrame::ListRooms => {
                let listing: Vec<RoomDescriptor> = self
                    .rooms
                    .iter()
                    .map(|(code, room)| {
                        RoomDescriptor::new(code.clone(), room.members.len() as u32)
                    })
                    .collect();
                match encode_room_list(&listing) {
                    Ok(json) => self.send(client_id, Message::Text(json.into())),
                    Err(e) => error!("❌ Failed to encode room list: {}", e),
                }
            }
        }
    }

    /// Broadcast on behalf of a member, or tell the client it is not one
    fn broadcast_from(
        &mut self,
        client_id: usize,
        room_code: &RoomCode,
        build: impl FnOnce(String) -> ServerFrame,
    ) {
        let sender = self.rooms.get(room_code).and_then(|room| {
            room.members
                .iter()
                .find(|member| member.client_id == client_id)
                .map(|member| member.username.clone())
        });

        match sender {
            Some(sender) => {
                let frame = build(sender);
                self.broadcast(room_code, frame);
            }
            None => self.send(client_id, Message::Text(NOT_IN_ROOM_NOTICE.to_string().into())),
        }
    }

    fn broadcast(&mut self, room_code: &RoomCode, frame: ServerFrame) {
        let Self { rooms, clients, .. } = self;
        let Some(room) = rooms.get_mut(room_code) else {
            return;
        };

        let message = to_message(&frame);
        for member in &room.members {
            if let Some(tx) = clients.get(&member.client_id) {
                let _ = tx.send(message.clone());
            }
        }
        room.history.push(frame);
    }
}

fn to_message(frame: &ServerFrame) -> Message {
    match frame {
        ServerFrame::Voice(data) => Message::Binary(data.clone().into()),
        other => Message::Text(other.encode_text().unwrap_or_default().into()),
    }
}

/// Room server bound to a local port, torn down on [`MockChatServer::shutdown`]
/// or drop
pub struct MockChatServer {
    addr: SocketAddr,
    state: Arc<Mutex<ServerState>>,
    cancel: CancellationToken,
    accept_task: Option<JoinHandle<()>>,
}

impl MockChatServer {
    /// Bind to a random local port
    pub async fn start() -> io::Result<Self> {
        Self::bind("127.0.0.1:0").await
    }

    pub async fn bind(address: &str) -> io::Result<Self> {
        let listener = TcpListener::bind(address).await?;
        let addr = listener.local_addr()?;
        info!("💬 Mock chat server listening on ws://{}", addr);

        let state = Arc::new(Mutex::new(ServerState::new()));
        let cancel = CancellationToken::new();
        let accept_task = tokio::spawn(accept_loop(listener, Arc::clone(&state), cancel.clone()));

        Ok(Self {
            addr,
            state,
            cancel,
            accept_task: Some(accept_task),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Client configuration pointing at this server
    pub fn client_config(&self) -> Result<ClientConfig, ConfigError> {
        ClientConfig::default().with_server_url(&self.url())
    }

    /// Create a room without going through a client
    pub async fn create_room(&self) -> RoomCode {
        self.state.lock().await.allocate_room()
    }

    /// Open a room under a caller-chosen code. Returns false if it exists.
    pub async fn add_room(&self, room_code: RoomCode) -> bool {
        let mut state = self.state.lock().await;
        if state.rooms.contains_key(&room_code) {
            return false;
        }
        state.rooms.insert(room_code, Room::default());
        true
    }

    pub async fn room_codes(&self) -> Vec<RoomCode> {
        self.state.lock().await.rooms.keys().cloned().collect()
    }

    pub async fn member_count(&self, room_code: &RoomCode) -> usize {
        self.state
            .lock()
            .await
            .rooms
            .get(room_code)
            .map_or(0, |room| room.members.len())
    }

    /// Every well-formed frame received so far, in arrival order
    pub async fn received_frames(&self) -> Vec<ClientFrame> {
        self.state.lock().await.received.clone()
    }

    /// Wait until at least `count` frames have arrived
    pub async fn wait_for_frames(&self, count: usize, timeout: Duration) -> Vec<ClientFrame> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let frames = self.received_frames().await;
            if frames.len() >= count || tokio::time::Instant::now() >= deadline {
                return frames;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Wait until `room_code` has at least `count` members
    pub async fn wait_for_members(
        &self,
        room_code: &RoomCode,
        count: usize,
        timeout: Duration,
    ) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.member_count(room_code).await >= count {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Send `frame` to every member of `room_code` and record it in the
    /// room history
    pub async fn inject(&self, room_code: &RoomCode, frame: ServerFrame) {
        self.state.lock().await.broadcast(room_code, frame);
    }

    /// Send a raw message to every member of `room_code`, bypassing history
    pub async fn inject_raw(&self, room_code: &RoomCode, message: Message) {
        let state = self.state.lock().await;
        if let Some(room) = state.rooms.get(room_code) {
            for member in &room.members {
                state.send(member.client_id, message.clone());
            }
        }
    }

    /// Close every client connection; the listener keeps running
    pub async fn disconnect_all(&self) {
        let mut state = self.state.lock().await;
        info!("🔌 Disconnecting {} clients", state.clients.len());
        for tx in state.clients.values() {
            let _ = tx.send(Message::Close(None));
        }
        for room in state.rooms.values_mut() {
            room.members.clear();
        }
    }

    /// Stop accepting and drop every connection
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.accept_task.take() {
            if let Err(e) = task.await {
                debug!("Accept loop ended abnormally: {}", e);
            }
        }
        info!("🛑 Mock chat server stopped");
    }
}

impl Drop for MockChatServer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn accept_loop(
    listener: TcpListener,
    state: Arc<Mutex<ServerState>>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let client_id = {
                        let mut state = state.lock().await;
                        let id = state.next_client_id;
                        state.next_client_id += 1;
                        id
                    };
                    debug!("📡 Client {} connected from {}", client_id, peer);

                    let state = Arc::clone(&state);
                    let cancel = cancel.clone();
                    tokio::spawn(async move {
                        let result =
                            handle_client(stream, client_id, Arc::clone(&state), cancel).await;
                        if let Err(e) = result {
                            debug!("Client {} error: {}", client_id, e);
                        }
                        state.lock().await.remove_client(client_id);
                        debug!("🔌 Client {} disconnected", client_id);
                    });
                }
                Err(e) => error!("Connection error: {}", e),
            }
        }
    }
}

async fn handle_client(
    stream: TcpStream,
    client_id: usize,
    state: Arc<Mutex<ServerState>>,
    cancel: CancellationToken,
) -> Result<(), WsError> {
    let socket = accept_async(stream).await?;
    let (mut write, mut read) = socket.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    state.lock().await.clients.insert(client_id, tx);

    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let closing = matches!(message, Message::Close(_));
            if write.send(message).await.is_err() || closing {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            message = read.next() => match message {
                Some(Ok(Message::Text(text))) => match ClientFrame::decode(text.as_str()) {
                    Ok(frame) => state.lock().await.handle_frame(client_id, frame),
                    Err(e) => warn!("⚠️  Client {} sent malformed frame: {}", client_id, e),
                },
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    writer.abort();
                    return Err(e);
                }
            }
        }
    }

    writer.abort();
    Ok(())
}
