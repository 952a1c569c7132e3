//! Wire protocol between snapshot clients and the server
//!
//! Each frame is a big-endian `u32` length followed by that many bytes of
//! bincode. A client sends one [`Request`] and reads [`Frame`]s until a
//! terminal one (`Result` or `Error`); any number of `Message` frames may
//! come first.

use bytes::{BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};
use crate::info::MessageLevel;

/// Largest accepted frame payload
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

const FRAME_PREFIX_LEN: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    CanCreateSnapshots,
    ListProviders { filter_id: String },
    ListSets { filter_id: String },
    ListSnapshots { filter_id: String },
    SimplifyId { id: String },
    DeleteSet { id: String, force: bool },
    DeleteSnapshot { id: String, force: bool },
    ListMountPoints { volume: String },
    StartBackup {
        provider_id: String,
        timeout_secs: u64,
        simple: bool,
    },
    TryToCreateTemporarySnapshot { session_id: u32, dir: String },
    CloseBackup { session_id: u32 },
}

impl Request {
    /// Operation name, for logs and timeout errors
    pub fn name(&self) -> &'static str {
        match self {
            Request::CanCreateSnapshots => "CanCreateSnapshots",
            Request::ListProviders { .. } => "ListProviders",
            Request::ListSets { .. } => "ListSets",
            Request::ListSnapshots { .. } => "ListSnapshots",
            Request::SimplifyId { .. } => "SimplifyId",
            Request::DeleteSet { .. } => "DeleteSet",
            Request::DeleteSnapshot { .. } => "DeleteSnapshot",
            Request::ListMountPoints { .. } => "ListMountPoints",
            Request::StartBackup { .. } => "StartBackup",
            Request::TryToCreateTemporarySnapshot { .. } => "TryToCreateTemporarySnapshot",
            Request::CloseBackup { .. } => "CloseBackup",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reply {
    CanCreate(bool),
    Providers(Vec<WireProvider>),
    Sets(Vec<WireSet>),
    Snapshots(Vec<WireSnapshot>),
    SimpleId(String),
    Deleted(bool),
    MountPoints(Vec<String>),
    BackupStarted { session_id: u32, case_sensitive: bool },
    SnapshotPath(String),
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Frame {
    /// Progress forwarded while the request runs
    Message { level: MessageLevel, text: String },
    Result(Reply),
    /// The request failed; carries the server-side error message
    Error(String),
}

impl Frame {
    /// Whether this frame ends the reply stream
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Frame::Message { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireProvider {
    pub id: String,
    pub name: String,
    pub version: String,
    pub provider_type: String,
}

/// Instant since the Unix epoch, at full precision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireTime {
    pub secs: i64,
    /// Sub-second part
    pub nanos: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireSetInfo {
    pub id: String,
    pub creation_time: WireTime,
    pub snapshot_count_on_creation: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireSet {
    pub info: WireSetInfo,
    pub snapshots: Vec<WireSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireSnapshot {
    pub id: String,
    pub original_path: String,
    pub snapshot_path: String,
    pub creation_time: WireTime,
    /// Omitted for snapshots nested inside a [`WireSet`]
    pub set: Option<WireSetInfo>,
    pub provider: Option<WireProvider>,
    pub state: String,
    pub attributes: String,
}

/// Length-prefixed encoding of `value`
pub fn encode<T: Serialize>(value: &T) -> Result<Bytes> {
    let payload = bincode::serialize(value)?;
    if payload.len() > MAX_FRAME_LEN {
        return Err(Error::Protocol(format!("frame too large: {} bytes", payload.len())));
    }

    let mut buf = BytesMut::with_capacity(FRAME_PREFIX_LEN + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.put_slice(&payload);
    Ok(buf.freeze())
}

pub async fn write_frame<W, T>(writer: &mut W, value: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let frame = encode(value)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Next frame, or `None` if the peer closed the connection between frames
pub async fn read_frame<R, T>(reader: &mut R) -> Result<Option<T>>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let len = match reader.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    if len > MAX_FRAME_LEN {
        return Err(Error::Protocol(format!("frame too large: {} bytes", len)));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;

    Ok(Some(bincode::deserialize(&payload)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_has_big_endian_length_prefix() {
        let frame = encode(&Request::CanCreateSnapshots).unwrap();
        let len = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
        assert_eq!(len, frame.len() - FRAME_PREFIX_LEN);
    }

    #[tokio::test]
    async fn test_stream_of_frames() {
        let (mut client, mut server) = tokio::io::duplex(1024);

        write_frame(
            &mut client,
            &Frame::Message {
                level: MessageLevel::Details,
                text: "working".into(),
            },
        )
        .await
        .unwrap();
        write_frame(&mut client, &Frame::Result(Reply::Deleted(true)))
            .await
            .unwrap();
        drop(client);

        let first: Frame = read_frame(&mut server).await.unwrap().unwrap();
        assert!(!first.is_terminal());
        let second: Frame = read_frame(&mut server).await.unwrap().unwrap();
        assert_eq!(second, Frame::Result(Reply::Deleted(true)));
        assert!(second.is_terminal());
        assert!(read_frame::<_, Frame>(&mut server).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_u32(MAX_FRAME_LEN as u32 + 1).await.unwrap();

        let err = read_frame::<_, Frame>(&mut server).await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[tokio::test]
    async fn test_truncated_payload_is_io_error() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_u32(10).await.unwrap();
        client.write_all(&[1, 2, 3]).await.unwrap();
        drop(client);

        let err = read_frame::<_, Frame>(&mut server).await.unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_request_names() {
        let request = Request::CloseBackup { session_id: 3 };
        assert_eq!(request.name(), "CloseBackup");
    }
}
