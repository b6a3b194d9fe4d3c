use thiserror::Error;

/// Protocol/header-size tag carried in the first byte of every frame.
pub const PROTOCOL_TAG: u8 = 0x11;

/// Flag bits (low half of the second control byte).
pub mod flags {
    /// A 4-byte big-endian sequence number follows the fixed header.
    pub const HAS_SEQUENCE: u8 = 0b0001;
    /// This is the last message of the session.
    pub const IS_LAST: u8 = 0b0010;
    /// The sequence number is to be read as negative (server final marker).
    pub const NEGATIVE_SEQUENCE: u8 = 0b0100;
}

/// Message type nibble (high half of the second control byte).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    /// Client → server: recognition configuration (JSON body)
    ClientConfig = 0b0001,
    /// Client → server: one audio chunk or the end-of-stream sentinel
    ClientAudio = 0b0010,
    /// Server → client: recognition result
    ServerResult = 0b1001,
    /// Server → client: fatal error with code and message
    ServerError = 0b1111,
}

impl MessageType {
    fn from_nibble(nibble: u8) -> Option<Self> {
        match nibble {
            0b0001 => Some(MessageType::ClientConfig),
            0b0010 => Some(MessageType::ClientAudio),
            0b1001 => Some(MessageType::ServerResult),
            0b1111 => Some(MessageType::ServerError),
            _ => None,
        }
    }
}

/// Serialization nibble (high half of the third control byte).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Serialization {
    Raw = 0b0000,
    Json = 0b0001,
}

/// Compression nibble (low half of the third control byte).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Compression {
    None = 0b0000,
    Gzip = 0b0001,
}

impl Compression {
    pub fn from_nibble(nibble: u8) -> Option<Self> {
        match nibble {
            0b0000 => Some(Compression::None),
            0b0001 => Some(Compression::Gzip),
            _ => None,
        }
    }
}

/// Unrecoverable framing failure. The byte stream has no resynchronization
/// marker, so these fail the session; payload-level problems (gzip, JSON)
/// are handled per message by the caller instead.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("unsupported protocol tag 0x{0:02x}")]
    BadTag(u8),
    #[error("unknown message type 0b{0:04b}")]
    UnknownType(u8),
    #[error("unexpected message type {0:?} for this direction")]
    UnexpectedType(MessageType),
}

/// Client → server frame (config or audio).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientFrame {
    pub message_type: MessageType,
    pub flags: u8,
    pub serialization: u8,
    pub compression: u8,
    pub payload: Vec<u8>,
}

impl ClientFrame {
    /// True for the zero-length end-of-stream sentinel.
    pub fn is_end_of_stream(&self) -> bool {
        self.message_type == MessageType::ClientAudio
            && self.flags & flags::IS_LAST != 0
            && self.payload.is_empty()
    }
}

/// Server → client recognition result frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultFrame {
    pub flags: u8,
    pub serialization: u8,
    pub compression: u8,
    pub sequence: Option<i32>,
    pub payload: Vec<u8>,
}

impl ResultFrame {
    /// True when the server marks this as the session's last result, via the
    /// is-last flag, the negative-sequence flag, or a sequence number sent
    /// pre-negated in two's complement.
    pub fn is_final(&self) -> bool {
        self.flags & (flags::IS_LAST | flags::NEGATIVE_SEQUENCE) != 0
            || self.sequence.is_some_and(|seq| seq < 0)
    }
}

/// Server → client error frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorFrame {
    pub flags: u8,
    pub sequence: Option<i32>,
    pub code: u32,
    pub message: String,
}

/// A decoded server-direction message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    Result(ResultFrame),
    Error(ErrorFrame),
}

/// Encode one client → server frame: 4 control bytes, a 4-byte big-endian
/// payload length, then the payload. Output size is 8 + payload length.
pub fn encode_client_frame(
    message_type: MessageType,
    frame_flags: u8,
    serialization: Serialization,
    compression: Compression,
    payload: &[u8],
) -> Vec<u8> {
    let mut frame = Vec::with_capacity(8 + payload.len());
    frame.extend_from_slice(&control_bytes(
        message_type,
        frame_flags,
        serialization as u8,
        compression as u8,
    ));
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Encode a server result frame. The header length word mirrors the payload
/// length; the optional sequence and the authoritative payload length follow
/// it. Passing a sequence sets the has-sequence flag.
pub fn encode_server_result(
    frame_flags: u8,
    serialization: Serialization,
    compression: Compression,
    sequence: Option<u32>,
    payload: &[u8],
) -> Vec<u8> {
    let mut frame_flags = frame_flags;
    if sequence.is_some() {
        frame_flags |= flags::HAS_SEQUENCE;
    }

    let mut frame = Vec::with_capacity(16 + payload.len());
    frame.extend_from_slice(&control_bytes(
        MessageType::ServerResult,
        frame_flags,
        serialization as u8,
        compression as u8,
    ));
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    if let Some(seq) = sequence {
        frame.extend_from_slice(&seq.to_be_bytes());
    }
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Encode a server error frame: optional sequence, then error code, message
/// length, and the UTF-8 message. Passing a sequence sets the has-sequence
/// flag, as in [`encode_server_result`].
pub fn encode_server_error(code: u32, message: &str, sequence: Option<u32>) -> Vec<u8> {
    let frame_flags = if sequence.is_some() {
        flags::HAS_SEQUENCE
    } else {
        0
    };

    let text = message.as_bytes();
    let mut frame = Vec::with_capacity(20 + text.len());
    frame.extend_from_slice(&control_bytes(
        MessageType::ServerError,
        frame_flags,
        Serialization::Raw as u8,
        Compression::None as u8,
    ));
    frame.extend_from_slice(&(text.len() as u32).to_be_bytes());
    if let Some(seq) = sequence {
        frame.extend_from_slice(&seq.to_be_bytes());
    }
    frame.extend_from_slice(&code.to_be_bytes());
    frame.extend_from_slice(&(text.len() as u32).to_be_bytes());
    frame.extend_from_slice(text);
    frame
}

/// Decode one server frame from the front of `buf`.
///
/// Returns the message plus the bytes consumed, or `Ok(None)` while the
/// buffer does not yet hold a complete frame. Frame boundaries come from the
/// declared length fields alone; the transport may deliver fragments.
pub fn decode_server_frame(buf: &[u8]) -> Result<Option<(ServerMessage, usize)>, FrameError> {
    let header = match decode_control(buf)? {
        Some(header) => header,
        None => return Ok(None),
    };

    match header.message_type {
        MessageType::ServerResult => decode_result(buf, header),
        MessageType::ServerError => decode_error(buf, header),
        other => Err(FrameError::UnexpectedType(other)),
    }
}

/// Decode one client frame from the front of `buf`. Used by the server side
/// of the protocol (and by test doubles standing in for it).
pub fn decode_client_frame(buf: &[u8]) -> Result<Option<(ClientFrame, usize)>, FrameError> {
    let header = match decode_control(buf)? {
        Some(header) => header,
        None => return Ok(None),
    };

    match header.message_type {
        MessageType::ClientConfig | MessageType::ClientAudio => {}
        other => return Err(FrameError::UnexpectedType(other)),
    }

    let payload_len = match read_u32(buf, 4) {
        Some(len) => len as usize,
        None => return Ok(None),
    };
    if buf.len() < 8 + payload_len {
        return Ok(None);
    }

    Ok(Some((
        ClientFrame {
            message_type: header.message_type,
            flags: header.flags,
            serialization: header.serialization,
            compression: header.compression,
            payload: buf[8..8 + payload_len].to_vec(),
        },
        8 + payload_len,
    )))
}

struct ControlHeader {
    message_type: MessageType,
    flags: u8,
    serialization: u8,
    compression: u8,
}

/// Parse the 4 control bytes and require the full 8-byte fixed header.
fn decode_control(buf: &[u8]) -> Result<Option<ControlHeader>, FrameError> {
    if buf.len() < 4 {
        return Ok(None);
    }
    if buf[0] != PROTOCOL_TAG {
        return Err(FrameError::BadTag(buf[0]));
    }
    let type_nibble = buf[1] >> 4;
    let message_type =
        MessageType::from_nibble(type_nibble).ok_or(FrameError::UnknownType(type_nibble))?;
    if buf.len() < 8 {
        return Ok(None);
    }
    Ok(Some(ControlHeader {
        message_type,
        flags: buf[1] & 0x0f,
        serialization: buf[2] >> 4,
        compression: buf[2] & 0x0f,
    }))
}

fn decode_result(
    buf: &[u8],
    header: ControlHeader,
) -> Result<Option<(ServerMessage, usize)>, FrameError> {
    let mut offset = 8usize;
    let sequence = match decode_sequence(buf, &mut offset, header.flags) {
        Some(sequence) => sequence,
        None => return Ok(None),
    };

    let payload_len = match read_u32(buf, offset) {
        Some(len) => len as usize,
        None => return Ok(None),
    };
    offset += 4;

    if buf.len() < offset + payload_len {
        return Ok(None);
    }

    Ok(Some((
        ServerMessage::Result(ResultFrame {
            flags: header.flags,
            serialization: header.serialization,
            compression: header.compression,
            sequence,
            payload: buf[offset..offset + payload_len].to_vec(),
        }),
        offset + payload_len,
    )))
}

fn decode_error(
    buf: &[u8],
    header: ControlHeader,
) -> Result<Option<(ServerMessage, usize)>, FrameError> {
    let mut offset = 8usize;
    let sequence = match decode_sequence(buf, &mut offset, header.flags) {
        Some(sequence) => sequence,
        None => return Ok(None),
    };

    let code = match read_u32(buf, offset) {
        Some(code) => code,
        None => return Ok(None),
    };
    let message_len = match read_u32(buf, offset + 4) {
        Some(len) => len as usize,
        None => return Ok(None),
    };
    offset += 8;

    if buf.len() < offset + message_len {
        return Ok(None);
    }
    let message = String::from_utf8_lossy(&buf[offset..offset + message_len]).into_owned();

    Ok(Some((
        ServerMessage::Error(ErrorFrame {
            flags: header.flags,
            sequence,
            code,
            message,
        }),
        offset + message_len,
    )))
}

/// Optional sequence field directly after the fixed header. Outer `Option`
/// is buffer completeness; inner is flag presence.
fn decode_sequence(buf: &[u8], offset: &mut usize, frame_flags: u8) -> Option<Option<i32>> {
    if frame_flags & flags::HAS_SEQUENCE == 0 {
        return Some(None);
    }
    let raw = read_u32(buf, *offset)?;
    *offset += 4;
    Some(Some(signed_sequence(
        raw,
        frame_flags & flags::NEGATIVE_SEQUENCE != 0,
    )))
}

/// Apply the negative-sequence flag to a raw wire value. Servers may send
/// the magnitude with the flag set, or a pre-negated two's-complement value;
/// both decode to the same negative number.
fn signed_sequence(raw: u32, negative: bool) -> i32 {
    let value = raw as i32;
    if negative {
        -value.saturating_abs()
    } else {
        value
    }
}

fn read_u32(buf: &[u8], offset: usize) -> Option<u32> {
    let bytes = buf.get(offset..offset + 4)?;
    Some(u32::from_be_bytes(bytes.try_into().ok()?))
}

fn control_bytes(
    message_type: MessageType,
    frame_flags: u8,
    serialization: u8,
    compression: u8,
) -> [u8; 4] {
    [
        PROTOCOL_TAG,
        ((message_type as u8) << 4) | (frame_flags & 0x0f),
        (serialization << 4) | (compression & 0x0f),
        0x00,
    ]
}
