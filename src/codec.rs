//! Length-prefixed binary frame codec (spec §4.1, §6).
//!
//! Wire format: 4-byte big-endian unsigned length `L` of the payload,
//! followed by a 1-byte message type tag, followed by `L - 1` bytes of
//! postcard-encoded payload. This mirrors `Carbonfreezer-multiplayer`'s
//! tag-byte-plus-payload convention, generalised from a fixed const-per-tag
//! layout to a self-describing postcard payload per tag.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

use crate::room::{ChartDescriptor, RoomId, ScoreRecord};

/// Header length (length prefix) in bytes.
const LENGTH_PREFIX_BYTES: usize = 4;

#[derive(Debug, Error)]
pub enum FrameCodecError {
    #[error("declared frame length {0} exceeds the configured maximum {1}")]
    FrameTooLarge(u32, u32),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed payload for tag {tag}: {source}")]
    Malformed {
        tag: u8,
        #[source]
        source: postcard::Error,
    },
    #[error("empty frame (missing message type byte)")]
    Empty,
}

/// A decoded frame before its payload has been matched against a known tag.
/// Carrying the raw tag lets the dispatcher treat "unknown tag" as a
/// non-fatal, loggable event rather than a hard protocol violation (spec
/// §4.1: "surfaced as a distinct error kind... logged and discarded without
/// closing the session unless repeated").
pub struct RawFrame {
    pub tag: u8,
    pub payload: Bytes,
}

/// Frame decoder/encoder. `max_frame_len` is the configured maximum
/// declared payload length (spec default 1 MiB).
pub struct FrameCodec {
    max_frame_len: u32,
}

impl FrameCodec {
    pub fn new(max_frame_len: u32) -> Self {
        Self { max_frame_len }
    }
}

impl Decoder for FrameCodec {
    type Item = RawFrame;
    type Error = FrameCodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < LENGTH_PREFIX_BYTES {
            return Ok(None);
        }
        let len = u32::from_be_bytes(src[..LENGTH_PREFIX_BYTES].try_into().unwrap());
        if len > self.max_frame_len {
            // The declared length alone is enough to fail the connection;
            // we must not wait for (or allocate) the body.
            return Err(FrameCodecError::FrameTooLarge(len, self.max_frame_len));
        }
        let total = LENGTH_PREFIX_BYTES + len as usize;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_PREFIX_BYTES);
        let mut body = src.split_to(len as usize).freeze();
        if body.is_empty() {
            return Err(FrameCodecError::Empty);
        }
        let tag = body[0];
        body.advance(1);
        Ok(Some(RawFrame { tag, payload: body }))
    }
}

impl Encoder<(u8, Bytes)> for FrameCodec {
    type Error = FrameCodecError;

    fn encode(&mut self, item: (u8, Bytes), dst: &mut BytesMut) -> Result<(), Self::Error> {
        let (tag, payload) = item;
        let len = 1 + payload.len();
        dst.reserve(LENGTH_PREFIX_BYTES + len);
        dst.put_u32(len as u32);
        dst.put_u8(tag);
        dst.put_slice(&payload);
        Ok(())
    }
}

/// Wraps an outbound message with the session's per-connection monotonic
/// sequence (spec §3 "Sequence counters": "Outbound frames carry a
/// per-session monotonic sequence"). The tag still identifies the inner
/// message type; `seq` travels inside the payload.
#[derive(serde::Serialize)]
#[cfg_attr(test, derive(serde::Deserialize, Debug))]
struct OutboundEnvelope {
    seq: u32,
    message: ServerMessage,
}

/// Encodes a typed outbound message, stamped with `seq`, to its
/// `(tag, payload)` wire pair.
pub fn encode_server_message(msg: &ServerMessage, seq: u32) -> Result<(u8, Bytes), FrameCodecError> {
    let tag = msg.tag();
    let envelope = OutboundEnvelope { seq, message: msg.clone() };
    let bytes = postcard::to_allocvec(&envelope).map_err(|source| FrameCodecError::Malformed { tag, source })?;
    Ok((tag, Bytes::from(bytes)))
}

/// Decodes a raw frame into a typed inbound message. Returns `Ok(None)` for
/// a recognised-but-unknown tag, matching spec §4.1's "discard, don't
/// close" contract; returns `Err` only for tags we know but whose payload
/// fails to parse (a genuine protocol violation).
pub fn decode_client_message(frame: &RawFrame) -> Result<Option<ClientMessage>, FrameCodecError> {
    macro_rules! parse {
        ($variant:expr) => {
            postcard::from_bytes(&frame.payload)
                .map(|v| Some($variant(v)))
                .map_err(|source| FrameCodecError::Malformed { tag: frame.tag, source })
        };
    }
    match frame.tag {
        TAG_HELLO => parse!(|v: HelloBody| ClientMessage::Hello(v)),
        TAG_AUTHENTICATE => parse!(|v: AuthenticateBody| ClientMessage::Authenticate(v)),
        TAG_PING => Ok(Some(ClientMessage::Ping)),
        TAG_CREATE_ROOM => parse!(|v: CreateRoomBody| ClientMessage::CreateRoom(v)),
        TAG_JOIN_ROOM => parse!(|v: JoinRoomBody| ClientMessage::JoinRoom(v)),
        TAG_LEAVE_ROOM => Ok(Some(ClientMessage::LeaveRoom)),
        TAG_SELECT_CHART => parse!(|v: SelectChartBody| ClientMessage::SelectChart(v)),
        TAG_READY => Ok(Some(ClientMessage::Ready)),
        TAG_CANCEL_READY => Ok(Some(ClientMessage::CancelReady)),
        TAG_SUBMIT_SCORE => parse!(|v: SubmitScoreBody| ClientMessage::SubmitScore(v)),
        TAG_GAME_END => parse!(|v: GameEndBody| ClientMessage::GameEnd(v)),
        TAG_CHAT => parse!(|v: ChatBody| ClientMessage::Chat(v)),
        TAG_ACK => parse!(|v: AckBody| ClientMessage::Ack(v)),
        _ => Ok(None),
    }
}

pub const PROTOCOL_VERSION: u16 = 1;

// --- Client -> Server tags -------------------------------------------------
pub const TAG_HELLO: u8 = 0;
pub const TAG_AUTHENTICATE: u8 = 1;
pub const TAG_PING: u8 = 2;
pub const TAG_CREATE_ROOM: u8 = 3;
pub const TAG_JOIN_ROOM: u8 = 4;
pub const TAG_LEAVE_ROOM: u8 = 5;
pub const TAG_SELECT_CHART: u8 = 6;
pub const TAG_READY: u8 = 7;
pub const TAG_CANCEL_READY: u8 = 8;
pub const TAG_SUBMIT_SCORE: u8 = 9;
pub const TAG_GAME_END: u8 = 10;
pub const TAG_CHAT: u8 = 11;
pub const TAG_ACK: u8 = 12;

// --- Server -> Client tags --------------------------------------------------
pub const TAG_HELLO_ACK: u8 = 0;
pub const TAG_AUTHENTICATE_RESULT: u8 = 1;
pub const TAG_PONG: u8 = 2;
pub const TAG_ROOM_STATE_UPDATE: u8 = 3;
pub const TAG_START_PLAYING: u8 = 4;
pub const TAG_KICKED: u8 = 5;
pub const TAG_SERVER_MESSAGE: u8 = 6;
pub const TAG_ERROR: u8 = 7;
pub const TAG_RESULTS: u8 = 8;

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct HelloBody {
    pub version: u16,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AuthenticateBody {
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CreateRoomBody {
    pub name: String,
    pub capacity: u8,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct JoinRoomBody {
    pub room_id: RoomId,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SelectChartBody {
    pub chart: ChartDescriptor,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SubmitScoreBody {
    pub score: ScoreRecord,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct GameEndBody {
    pub aborted: bool,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ChatBody {
    pub text: String,
}

/// Client acknowledgement of an outbound sequence (spec §3 "Sequence
/// counters"). `seq` is the highest outbound sequence the client has
/// processed so far.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AckBody {
    pub seq: u32,
}

/// Typed inbound (client -> server) messages, decoded from a [`RawFrame`].
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum ClientMessage {
    Hello(HelloBody),
    Authenticate(AuthenticateBody),
    Ping,
    CreateRoom(CreateRoomBody),
    JoinRoom(JoinRoomBody),
    LeaveRoom,
    SelectChart(SelectChartBody),
    Ready,
    CancelReady,
    SubmitScore(SubmitScoreBody),
    GameEnd(GameEndBody),
    Chat(ChatBody),
    Ack(AckBody),
}

/// Typed outbound (server -> client) messages.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum ServerMessage {
    HelloAck { version: u16 },
    AuthenticateResult(Result<crate::identity::User, ProtocolErrorWire>),
    Pong,
    RoomStateUpdate(crate::room::RoomSnapshot),
    StartPlaying,
    Results(crate::room::ResultsSnapshot),
    Kicked { reason: String },
    /// Corresponds to the wire tag `ServerMessage` in spec §6 — a
    /// server-originated announcement, distinct from the Rust enum name.
    Announcement(String),
    Error(ProtocolErrorWire),
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ProtocolErrorWire {
    pub code: u16,
    pub message: String,
}

impl From<crate::error::ProtocolErrorCode> for ProtocolErrorWire {
    fn from(code: crate::error::ProtocolErrorCode) -> Self {
        Self {
            code: code as u16,
            message: code.message().to_string(),
        }
    }
}

impl ServerMessage {
    fn tag(&self) -> u8 {
        match self {
            ServerMessage::HelloAck { .. } => TAG_HELLO_ACK,
            ServerMessage::AuthenticateResult(_) => TAG_AUTHENTICATE_RESULT,
            ServerMessage::Pong => TAG_PONG,
            ServerMessage::RoomStateUpdate(_) => TAG_ROOM_STATE_UPDATE,
            ServerMessage::StartPlaying => TAG_START_PLAYING,
            ServerMessage::Results(_) => TAG_RESULTS,
            ServerMessage::Kicked { .. } => TAG_KICKED,
            ServerMessage::Announcement(_) => TAG_SERVER_MESSAGE,
            ServerMessage::Error(_) => TAG_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_hello() {
        let mut codec = FrameCodec::new(1 << 20);
        let mut buf = BytesMut::new();
        let payload = postcard::to_allocvec(&HelloBody { version: 1 }).unwrap();
        codec
            .encode((TAG_HELLO, Bytes::from(payload)), &mut buf)
            .unwrap();
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.tag, TAG_HELLO);
        let msg = decode_client_message(&frame).unwrap().unwrap();
        match msg {
            ClientMessage::Hello(HelloBody { version }) => assert_eq!(version, 1),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn oversized_length_prefix_rejected_before_body_read() {
        let mut codec = FrameCodec::new(1 << 20);
        let mut buf = BytesMut::new();
        buf.put_u32(0xFFFF_FFFF);
        let err = codec.decode(&mut buf).unwrap_err();
        assert!(matches!(err, FrameCodecError::FrameTooLarge(_, _)));
    }

    #[test]
    fn unknown_tag_is_not_fatal() {
        let mut codec = FrameCodec::new(1 << 20);
        let mut buf = BytesMut::new();
        codec.encode((250, Bytes::from_static(b"x")), &mut buf).unwrap();
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decode_client_message(&frame).unwrap(), None);
    }

    #[test]
    fn need_more_bytes_returns_none() {
        let mut codec = FrameCodec::new(1 << 20);
        let mut buf = BytesMut::new();
        buf.put_u32(10);
        buf.put_slice(b"abc");
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn outbound_frames_carry_increasing_sequence() {
        let (_, payload1) = encode_server_message(&ServerMessage::Pong, 1).unwrap();
        let (_, payload2) = encode_server_message(&ServerMessage::Pong, 2).unwrap();
        let env1: OutboundEnvelope = postcard::from_bytes(&payload1).unwrap();
        let env2: OutboundEnvelope = postcard::from_bytes(&payload2).unwrap();
        assert_eq!(env1.seq, 1);
        assert_eq!(env2.seq, 2);
    }

    #[test]
    fn ack_round_trips() {
        let mut codec = FrameCodec::new(1 << 20);
        let mut buf = BytesMut::new();
        let payload = postcard::to_allocvec(&AckBody { seq: 7 }).unwrap();
        codec.encode((TAG_ACK, Bytes::from(payload)), &mut buf).unwrap();
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        match decode_client_message(&frame).unwrap().unwrap() {
            ClientMessage::Ack(AckBody { seq }) => assert_eq!(seq, 7),
            _ => panic!("wrong variant"),
        }
    }
}
