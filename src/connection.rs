//! The serverbound connection: handshake, login and the play-state plumbing.
//!
//! [`connect`] drives the login state machine (encryption and compression included) and hands
//! back a [`Connection`]: a frame reader for the network task plus a cloneable [`PacketSender`]
//! that serializes all writes behind one lock. The CFB8 write cipher is stateful, so out-of-order
//! writes would corrupt the stream; the sender lock is what keeps them ordered.

use crate::authentication::SessionToken;
use crate::crypto::{self, CipherStream};
use chronicle_packets::frame::{self, PacketFrame};
use chronicle_packets::login::clientbound::{
    DisconnectPacket, EncryptionRequestPacket, LoginSuccessPacket, SetCompressionPacket,
};
use chronicle_packets::login::serverbound::{EncryptionResponsePacket, LoginStartPacket};
use chronicle_packets::play::serverbound as play_out;
use chronicle_packets::play::{
    ChatMessagePacket, KeepAlivePacket, PlayerPositionAndLookPacket,
};
use chronicle_packets::registry::{Clientbound, PacketTable, ProtocolVersion, Serverbound};
use chronicle_packets::{
    AsyncReadPacket, AsyncWritePacket, Packet, ReadPacket, State, VarInt, WritePacket,
};
use chronicle_packets::handshake::HandshakePacket;
use std::io::Cursor;
use std::sync::Arc;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info};
use uuid::Uuid;

/// The shared http client (for session server requests).
static HTTP_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .build()
        .expect("failed to create http client")
});

const SESSION_JOIN_URL: &str = "https://sessionserver.mojang.com/session/minecraft/join";

/// The internal error type for all errors related to the server connection.
#[derive(thiserror::Error, Debug)]
pub enum ConnectionError {
    /// An error occurred while reading or writing to the underlying byte stream.
    #[error("error reading or writing data: {0}")]
    Io(#[from] std::io::Error),

    /// The wire codec rejected a frame.
    #[error("codec failure: {0}")]
    Codec(#[from] chronicle_packets::Error),

    /// Establishing stream encryption failed.
    #[error("could not encrypt connection: {0}")]
    Crypto(#[from] crypto::Error),

    /// The TCP connect did not complete within the configured timeout.
    #[error("connect to {address} timed out")]
    ConnectTimeout { address: String },

    /// The server refused the login or kicked us in play state.
    #[error("disconnected by server: {reason}")]
    Disconnect { reason: String },

    /// The session server did not accept our join request.
    #[error("session server rejected the join (status {status})")]
    AuthRejected { status: u16 },

    /// The session server could not be reached.
    #[error("session server request failed: {0}")]
    SessionRequest(#[from] reqwest::Error),

    /// The negotiated protocol has no packet tables.
    #[error("no packet table for protocol {protocol}")]
    ProtocolMismatch { protocol: i32 },

    /// The server sent a packet that is not valid in the current state.
    #[error("unexpected packet 0x{id:02X} during login")]
    UnexpectedPacket { id: VarInt },
}

impl ConnectionError {
    /// Whether this error is an ordinary socket close rather than a protocol failure.
    pub fn is_connection_closed(&self) -> bool {
        match self {
            ConnectionError::Codec(err) => err.is_connection_closed(),
            ConnectionError::Io(err) => {
                matches!(
                    err.kind(),
                    std::io::ErrorKind::UnexpectedEof
                        | std::io::ErrorKind::ConnectionReset
                        | std::io::ErrorKind::ConnectionAborted
                        | std::io::ErrorKind::BrokenPipe
                )
            }
            _ => false,
        }
    }
}

pub type BoxedReader = Box<dyn AsyncRead + Unpin + Send + Sync>;
pub type BoxedWriter = Box<dyn AsyncWrite + Unpin + Send + Sync>;

/// The write capability handed to the chat dispatcher, the recorder and the command executor.
///
/// All writes funnel through one mutex so the encryption stream stays ordered.
#[derive(Clone)]
pub struct PacketSender {
    writer: Arc<tokio::sync::Mutex<BoxedWriter>>,
    compression: Option<VarInt>,
    protocol: i32,
}

impl PacketSender {
    pub(crate) fn new(writer: BoxedWriter, compression: Option<VarInt>, protocol: i32) -> Self {
        Self {
            writer: Arc::new(tokio::sync::Mutex::new(writer)),
            compression,
            protocol,
        }
    }

    pub fn protocol(&self) -> i32 {
        self.protocol
    }

    /// Writes one serverbound play packet, resolving its id under the negotiated protocol.
    pub async fn send(&self, packet: Serverbound, body: &[u8]) -> Result<(), ConnectionError> {
        let id = packet
            .id(self.protocol)
            .ok_or(ConnectionError::ProtocolMismatch {
                protocol: self.protocol,
            })?;

        let mut writer = self.writer.lock().await;
        frame::write_frame(&mut *writer, self.compression, id, body).await?;
        writer.flush().await?;

        Ok(())
    }

    pub async fn send_chat(&self, message: &str) -> Result<(), ConnectionError> {
        let mut body = Vec::new();
        play_out::ChatMessagePacket {
            message: message.to_string(),
        }
        .write(&mut body)
        .await?;
        self.send(Serverbound::ChatMessage, &body).await
    }

    pub async fn send_keep_alive(&self, id: i64) -> Result<(), ConnectionError> {
        let mut body = Vec::new();
        play_out::KeepAlivePacket { id }
            .write(&mut body, self.protocol)
            .await?;
        self.send(Serverbound::KeepAlive, &body).await
    }

    pub async fn send_teleport_confirm(&self, teleport_id: VarInt) -> Result<(), ConnectionError> {
        let mut body = Vec::new();
        play_out::TeleportConfirmPacket { teleport_id }
            .write(&mut body)
            .await?;
        self.send(Serverbound::TeleportConfirm, &body).await
    }

    pub async fn send_position_and_look(
        &self,
        position: &PlayerPositionAndLookPacket,
    ) -> Result<(), ConnectionError> {
        let mut body = Vec::new();
        play_out::PositionAndLookPacket {
            x: position.x,
            feet_y: position.y,
            z: position.z,
            yaw: position.yaw,
            pitch: position.pitch,
            on_ground: true,
        }
        .write(&mut body)
        .await?;
        self.send(Serverbound::PositionAndLook, &body).await
    }

    pub async fn send_respawn(&self) -> Result<(), ConnectionError> {
        let mut body = Vec::new();
        play_out::ClientStatusPacket {
            action_id: play_out::ClientStatusPacket::RESPAWN,
        }
        .write(&mut body)
        .await?;
        self.send(Serverbound::ClientStatus, &body).await
    }

    pub async fn send_spectate(&self, target: Uuid) -> Result<(), ConnectionError> {
        let mut body = Vec::new();
        play_out::SpectatePacket { target }.write(&mut body).await?;
        self.send(Serverbound::Spectate, &body).await
    }

    /// Closes the underlying socket.
    pub async fn shutdown(&self) -> Result<(), ConnectionError> {
        let mut writer = self.writer.lock().await;
        writer.shutdown().await?;
        Ok(())
    }
}

/// An established play-state connection.
pub struct Connection {
    /// The read half, consumed by the network task.
    pub reader: BoxedReader,
    /// The shared write capability.
    pub sender: PacketSender,
    /// The negotiated protocol number.
    pub protocol: i32,
    /// The resolved packet table for this protocol.
    pub table: Arc<PacketTable>,
    /// The compression threshold, if the server enabled compression.
    pub compression: Option<VarInt>,
    /// The profile name confirmed by the server.
    pub user_name: String,
    /// The profile id confirmed by the server.
    pub user_id: Uuid,
}

/// Everything needed to establish one connection.
pub struct ConnectOptions<'a> {
    pub address: &'a str,
    pub port: u16,
    pub username: &'a str,
    pub version: &'a ProtocolVersion,
    pub token: Option<&'a SessionToken>,
    pub online_mode: bool,
    pub connect_timeout: Duration,
}

/// Opens the socket and drives handshake and login until the connection enters the play state.
pub async fn connect(options: ConnectOptions<'_>) -> Result<Connection, ConnectionError> {
    let protocol = options.version.protocol;
    let table = Arc::new(
        PacketTable::new(protocol).map_err(|_| ConnectionError::ProtocolMismatch { protocol })?,
    );

    let address = format!("{}:{}", options.address, options.port);
    info!(address = address.as_str(), version = options.version.name, "connecting");
    let stream = tokio::time::timeout(options.connect_timeout, TcpStream::connect(&address))
        .await
        .map_err(|_| ConnectionError::ConnectTimeout {
            address: address.clone(),
        })??;
    stream.set_nodelay(true)?;

    let mut stream = CipherStream::new(stream);
    let mut compression: Option<VarInt> = None;

    // handshake and login start are always sent uncompressed
    stream
        .write_packet(HandshakePacket {
            protocol_version: protocol,
            server_address: options.address.to_string(),
            server_port: options.port,
            next_state: State::Login,
        })
        .await?;
    stream
        .write_packet(LoginStartPacket {
            user_name: options.username.to_string(),
        })
        .await?;

    // drive the login state machine until the server reports success
    let success = loop {
        let frame = frame::read_frame(&mut stream, compression).await?;
        let mut body = Cursor::new(frame.body);

        match frame.id {
            DisconnectPacket::ID => {
                let packet = DisconnectPacket::read_from_buffer(&mut body).await?;
                return Err(ConnectionError::Disconnect {
                    reason: packet.reason,
                });
            }
            EncryptionRequestPacket::ID => {
                let packet = EncryptionRequestPacket::read_from_buffer(&mut body).await?;
                debug!("received encryption request, negotiating ciphers");

                let shared_secret = crypto::generate_shared_secret();
                if options.online_mode {
                    if let Some(token) = options.token {
                        join_session(token, &packet, &shared_secret).await?;
                    }
                }

                let response = EncryptionResponsePacket {
                    shared_secret: crypto::encrypt_with_server_key(
                        &packet.public_key,
                        &shared_secret,
                    )?,
                    verify_token: crypto::encrypt_with_server_key(
                        &packet.public_key,
                        &packet.verify_token,
                    )?,
                };
                let mut response_body = Vec::new();
                response.write_to_buffer(&mut response_body).await?;
                frame::write_frame(
                    &mut stream,
                    compression,
                    EncryptionResponsePacket::ID,
                    &response_body,
                )
                .await?;
                stream.enable_encryption(&shared_secret)?;
            }
            SetCompressionPacket::ID => {
                let packet = SetCompressionPacket::read_from_buffer(&mut body).await?;
                debug!(threshold = packet.threshold, "enabling compression");
                compression = (packet.threshold >= 0).then_some(packet.threshold);
            }
            id if id == LoginSuccessPacket::ID => {
                break LoginSuccessPacket::read_versioned(&mut body, protocol).await?;
            }
            id => return Err(ConnectionError::UnexpectedPacket { id }),
        }
    };

    info!(
        user = success.user_name.as_str(),
        protocol, "login successful, entering play state"
    );

    let (reader, writer) = tokio::io::split(stream);
    Ok(Connection {
        reader: Box::new(reader),
        sender: PacketSender::new(Box::new(writer), compression, protocol),
        protocol,
        table,
        compression,
        user_name: success.user_name,
        user_id: success.user_id,
    })
}

/// Registers the pending encrypted session with the session server.
async fn join_session(
    token: &SessionToken,
    request: &EncryptionRequestPacket,
    shared_secret: &[u8],
) -> Result<(), ConnectionError> {
    let hash = crypto::session_hash(&request.server_id, shared_secret, &request.public_key);
    let response = HTTP_CLIENT
        .post(SESSION_JOIN_URL)
        .json(&serde_json::json!({
            "accessToken": token.access_token,
            "selectedProfile": token.player_id.simple().to_string(),
            "serverId": hash,
        }))
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(ConnectionError::AuthRejected {
            status: response.status().as_u16(),
        });
    }

    Ok(())
}

/// An observation the play loop surfaces to the lifecycle controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayEvent {
    /// Nothing the controller needs to act on.
    None,
    /// The server accepted us into the world.
    GameJoin,
    /// A world time tick arrived (decays the chat spam counter).
    TimeUpdate,
    /// A chat message arrived.
    Chat { json: String },
    /// The server kicked us.
    Disconnect { reason: String },
}

/// Applies the built-in protocol reactions for one inbound frame.
///
/// Keep-alives are echoed verbatim and server teleports are confirmed and answered with a
/// position report so the server considers the player spawned.
pub async fn react(
    frame: &PacketFrame,
    table: &PacketTable,
    sender: &PacketSender,
) -> Result<PlayEvent, ConnectionError> {
    let Some(name) = table.name_of(frame.id) else {
        return Ok(PlayEvent::None);
    };

    let mut body = Cursor::new(frame.body.as_slice());
    match name {
        Clientbound::KeepAlive => {
            let packet = KeepAlivePacket::read(&mut body, sender.protocol()).await?;
            sender.send_keep_alive(packet.id).await?;
            Ok(PlayEvent::None)
        }
        Clientbound::PlayerPositionAndLook => {
            let packet = PlayerPositionAndLookPacket::read(&mut body, sender.protocol()).await?;
            sender.send_teleport_confirm(packet.teleport_id).await?;
            sender.send_position_and_look(&packet).await?;
            Ok(PlayEvent::None)
        }
        Clientbound::JoinGame => Ok(PlayEvent::GameJoin),
        Clientbound::TimeUpdate => Ok(PlayEvent::TimeUpdate),
        Clientbound::ChatMessage => {
            let packet = ChatMessagePacket::read(&mut body, sender.protocol()).await?;
            Ok(PlayEvent::Chat { json: packet.json })
        }
        Clientbound::Disconnect => {
            let reason = body.read_string().await?;
            Ok(PlayEvent::Disconnect { reason })
        }
        _ => Ok(PlayEvent::None),
    }
}
