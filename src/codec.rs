//! Fixed 16-byte header framing on top of an async byte stream.
//!
//! Wire layout (network byte order), mirroring the C `struct header` this
//! protocol was modeled on — the two-byte gap between `size` and
//! `timestamp_sec` is the compiler padding that keeps `timestamp_sec`
//! 4-byte aligned in the original struct; this implementation keeps the
//! gap explicit instead of leaving it as an accidental side effect.
//!
//! ```text
//!  0       1       2       3
//!  +-------+-------+-------+-------+
//!  | type  |  id   | role  |reserv.|
//!  +-------+-------+-------+-------+
//!  |     size      |    (pad)      |
//!  +-------+-------+-------+-------+
//!  |         timestamp_sec         |
//!  +-------+-------+-------+-------+
//!  |        timestamp_nsec         |
//!  +-------+-------+-------+-------+
//! ```

use std::time::{SystemTime, UNIX_EPOCH};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Result, ServerError};

pub const HEADER_LEN: usize = 16;

/// Upper bound on a single frame's payload. Oversize `size` fields are a
/// transport error, not a protocol error — the peer is no longer trusted
/// to be speaking this protocol.
pub const MAX_PAYLOAD_SIZE: usize = 4096;

/// Role a client plays within a particular game.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    None,
    First,
    Second,
}

impl Role {
    pub fn other(self) -> Role {
        match self {
            Role::None => Role::None,
            Role::First => Role::Second,
            Role::Second => Role::First,
        }
    }

    pub fn to_wire(self) -> u8 {
        match self {
            Role::None => 0,
            Role::First => 1,
            Role::Second => 2,
        }
    }

    pub fn from_wire(v: u8) -> Option<Role> {
        match v {
            0 => Some(Role::None),
            1 => Some(Role::First),
            2 => Some(Role::Second),
            _ => None,
        }
    }
}

/// Packet type codes. Client→server and server→client codes share one
/// numbering space; the session loop only ever decodes the client→server
/// subset, and only ever encodes the server→client subset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    // client -> server
    Login,
    Users,
    Invite,
    Revoke,
    Decline,
    Accept,
    Move,
    Resign,
    // server -> client
    Ack,
    Nack,
    Invited,
    Revoked,
    Declined,
    Accepted,
    Moved,
    Resigned,
    Ended,
}

impl PacketType {
    pub fn to_wire(self) -> u8 {
        match self {
            PacketType::Login => 0,
            PacketType::Users => 1,
            PacketType::Invite => 2,
            PacketType::Revoke => 3,
            PacketType::Decline => 4,
            PacketType::Accept => 5,
            PacketType::Move => 6,
            PacketType::Resign => 7,
            PacketType::Ack => 8,
            PacketType::Nack => 9,
            PacketType::Invited => 10,
            PacketType::Revoked => 11,
            PacketType::Declined => 12,
            PacketType::Accepted => 13,
            PacketType::Moved => 14,
            PacketType::Resigned => 15,
            PacketType::Ended => 16,
        }
    }

    pub fn from_wire(v: u8) -> Option<PacketType> {
        Some(match v {
            0 => PacketType::Login,
            1 => PacketType::Users,
            2 => PacketType::Invite,
            3 => PacketType::Revoke,
            4 => PacketType::Decline,
            5 => PacketType::Accept,
            6 => PacketType::Move,
            7 => PacketType::Resign,
            8 => PacketType::Ack,
            9 => PacketType::Nack,
            10 => PacketType::Invited,
            11 => PacketType::Revoked,
            12 => PacketType::Declined,
            13 => PacketType::Accepted,
            14 => PacketType::Moved,
            15 => PacketType::Resigned,
            16 => PacketType::Ended,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Header {
    pub kind: u8,
    pub id: u8,
    pub role: u8,
    pub reserved: u8,
    pub size: u16,
    pub timestamp_sec: u32,
    pub timestamp_nsec: u32,
}

impl Header {
    /// Builds a header for sending; stamps the current wall-clock time and
    /// zeroes `reserved`, per the wire contract.
    pub fn new(kind: PacketType, id: u8, role: Role, size: u16) -> Self {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
        Header {
            kind: kind.to_wire(),
            id,
            role: role.to_wire(),
            reserved: 0,
            size,
            timestamp_sec: now.as_secs() as u32,
            timestamp_nsec: now.subsec_nanos(),
        }
    }

    fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0] = self.kind;
        buf[1] = self.id;
        buf[2] = self.role;
        buf[3] = self.reserved;
        buf[4..6].copy_from_slice(&self.size.to_be_bytes());
        // buf[6..8] is the padding gap, left zeroed.
        buf[8..12].copy_from_slice(&self.timestamp_sec.to_be_bytes());
        buf[12..16].copy_from_slice(&self.timestamp_nsec.to_be_bytes());
        buf
    }

    /// Converts raw bytes into field values only after the full header has
    /// been read — never byte-swap into a buffer that hasn't been filled
    /// yet (see SPEC_FULL.md §9, "original bug").
    fn decode(buf: &[u8; HEADER_LEN]) -> Self {
        Header {
            kind: buf[0],
            id: buf[1],
            role: buf[2],
            reserved: buf[3],
            size: u16::from_be_bytes([buf[4], buf[5]]),
            timestamp_sec: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
            timestamp_nsec: u32::from_be_bytes([buf[12], buf[13], buf[14], buf[15]]),
        }
    }
}

/// Writes a header and optional payload as one logical frame. Callers are
/// responsible for serializing concurrent writers (the `Client` write lock).
pub async fn send<W: AsyncWrite + Unpin>(
    w: &mut W,
    header: &Header,
    payload: &[u8],
) -> Result<()> {
    debug_assert_eq!(header.size as usize, payload.len());
    w.write_all(&header.encode()).await?;
    if !payload.is_empty() {
        w.write_all(payload).await?;
    }
    w.flush().await?;
    Ok(())
}

/// Reads exactly one frame. Returns `Ok(None)` on a clean EOF that occurs
/// before any header byte is read (the peer half-closed). A short read
/// mid-header or mid-payload is a transport error, not an EOF signal.
pub async fn recv<R: AsyncRead + Unpin>(r: &mut R) -> Result<Option<(Header, Vec<u8>)>> {
    let mut hdr_buf = [0u8; HEADER_LEN];
    let mut filled = 0;
    while filled < HEADER_LEN {
        let n = r.read(&mut hdr_buf[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(ServerError::Transport(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "eof mid-header",
            )));
        }
        filled += n;
    }
    let header = Header::decode(&hdr_buf);

    let size = header.size as usize;
    if size > MAX_PAYLOAD_SIZE {
        return Err(ServerError::Transport(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "oversize payload",
        )));
    }

    let mut payload = vec![0u8; size];
    let mut filled = 0;
    while filled < size {
        let n = r.read(&mut payload[filled..]).await?;
        if n == 0 {
            return Err(ServerError::Transport(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "eof mid-payload",
            )));
        }
        filled += n;
    }

    Ok(Some((header, payload)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn header_round_trip_preserves_fields() {
        let header = Header::new(PacketType::Move, 7, Role::First, 3);
        let payload = b"5X\n".to_vec();

        let mut buf = Vec::new();
        send(&mut buf, &header, &payload).await.unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let (decoded, decoded_payload) = recv(&mut cursor).await.unwrap().unwrap();

        assert_eq!(decoded.kind, PacketType::Move.to_wire());
        assert_eq!(decoded.id, 7);
        assert_eq!(decoded.role, Role::First.to_wire());
        assert_eq!(decoded.size, 3);
        assert_eq!(decoded_payload, payload);
    }

    #[tokio::test]
    async fn clean_eof_before_any_byte_is_reported_as_none() {
        let mut cursor = std::io::Cursor::new(Vec::<u8>::new());
        let result = recv(&mut cursor).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn eof_mid_header_is_a_transport_error() {
        let mut cursor = std::io::Cursor::new(vec![0u8; 4]);
        let result = recv(&mut cursor).await;
        assert!(matches!(result, Err(ServerError::Transport(_))));
    }

    #[tokio::test]
    async fn oversize_payload_is_rejected() {
        let header = Header::new(PacketType::Move, 0, Role::None, 0);
        let mut buf = header.encode().to_vec();
        buf[4..6].copy_from_slice(&((MAX_PAYLOAD_SIZE + 1) as u16).to_be_bytes());
        let mut cursor = std::io::Cursor::new(buf);
        let result = recv(&mut cursor).await;
        assert!(matches!(result, Err(ServerError::Transport(_))));
    }
}
