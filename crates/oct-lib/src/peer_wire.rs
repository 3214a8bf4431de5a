//! Framed messages between daemons (and between the CLI and a daemon).
//!
//! The frame layout is the same for every message:
//!
//! ```text
//! len,msg_id,payload
//! u32    u8        x
//! ```
//!
//! `len` counts the id byte plus the payload. Payload structs are speedy
//! big-endian records.

use std::io::Cursor;

use bytes::{Buf, BufMut, BytesMut};
use speedy::{BigEndian, Readable, Writable};
use tokio::io;
use tokio_util::codec::{Decoder, Encoder};

/// Requests and replies carried on one connection. Every request has
/// exactly one reply; failures come back as [`Message::Error`].
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    GetVersion,
    Version(VersionInfo),
    StartDownload(StartDownloadRequest),
    /// The download finished; progress was streamed to the request's FIFOs.
    Started,
    StopDownload(StopDownloadRequest),
    Stopped(StoppedReply),
    GetTorrent(GetTorrentRequest),
    Torrent(TorrentReply),
    Status(StatusRequest),
    StatusReply(StatusReply),
    Error(ErrorReply),
}

#[derive(Debug, Clone, PartialEq, Readable, Writable)]
pub struct VersionInfo {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub revision: String,
}

#[derive(Debug, Clone, PartialEq, Readable, Writable)]
pub struct StartDownloadRequest {
    pub source: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// FIFO paths that receive the report stream.
    pub stdout: Option<String>,
    pub stderr: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Readable, Writable)]
pub struct StopDownloadRequest {
    pub source: String,
    pub clean: bool,
}

#[derive(Debug, Clone, PartialEq, Readable, Writable)]
pub struct StoppedReply {
    pub ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Readable, Writable)]
pub struct GetTorrentRequest {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Readable, Writable)]
pub struct TorrentReply {
    pub torrent: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Readable, Writable)]
pub struct StatusRequest {
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Readable, Writable)]
pub struct LayerDownState {
    pub id: String,
    pub state: String,
    pub completed: u64,
    pub size: u64,
    pub seeding: bool,
}

#[derive(Debug, Clone, PartialEq, Readable, Writable)]
pub struct StatusReply {
    pub layers: Vec<LayerDownState>,
}

#[derive(Debug, Clone, PartialEq, Readable, Writable)]
pub struct ErrorReply {
    pub message: String,
}

#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum MessageId {
    GetVersion = 1,
    Version = 2,
    StartDownload = 3,
    Started = 4,
    StopDownload = 5,
    Stopped = 6,
    GetTorrent = 7,
    Torrent = 8,
    Status = 9,
    StatusReply = 10,
    Error = 11,
}

impl TryFrom<u8> for MessageId {
    type Error = io::Error;

    fn try_from(k: u8) -> Result<Self, io::Error> {
        use MessageId::*;
        match k {
            k if k == GetVersion as u8 => Ok(GetVersion),
            k if k == Version as u8 => Ok(Version),
            k if k == StartDownload as u8 => Ok(StartDownload),
            k if k == Started as u8 => Ok(Started),
            k if k == StopDownload as u8 => Ok(StopDownload),
            k if k == Stopped as u8 => Ok(Stopped),
            k if k == GetTorrent as u8 => Ok(GetTorrent),
            k if k == Torrent as u8 => Ok(Torrent),
            k if k == Status as u8 => Ok(Status),
            k if k == StatusReply as u8 => Ok(StatusReply),
            k if k == Error as u8 => Ok(Error),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "unknown message id",
            )),
        }
    }
}

#[derive(Debug)]
pub struct PeerCodec;

fn put_frame(buf: &mut BytesMut, id: MessageId, payload: &[u8]) {
    buf.put_u32(1 + payload.len() as u32);
    buf.put_u8(id as u8);
    buf.extend_from_slice(payload);
}

// From message to bytes
impl Encoder<Message> for PeerCodec {
    type Error = io::Error;

    fn encode(
        &mut self,
        item: Message,
        buf: &mut BytesMut,
    ) -> Result<(), Self::Error> {
        let ctx = BigEndian {};
        match item {
            Message::GetVersion => put_frame(buf, MessageId::GetVersion, &[]),
            Message::Version(v) => put_frame(
                buf,
                MessageId::Version,
                &v.write_to_vec_with_ctx(ctx)?,
            ),
            Message::StartDownload(r) => put_frame(
                buf,
                MessageId::StartDownload,
                &r.write_to_vec_with_ctx(ctx)?,
            ),
            Message::Started => put_frame(buf, MessageId::Started, &[]),
            Message::StopDownload(r) => put_frame(
                buf,
                MessageId::StopDownload,
                &r.write_to_vec_with_ctx(ctx)?,
            ),
            Message::Stopped(r) => put_frame(
                buf,
                MessageId::Stopped,
                &r.write_to_vec_with_ctx(ctx)?,
            ),
            Message::GetTorrent(r) => put_frame(
                buf,
                MessageId::GetTorrent,
                &r.write_to_vec_with_ctx(ctx)?,
            ),
            Message::Torrent(r) => put_frame(
                buf,
                MessageId::Torrent,
                &r.write_to_vec_with_ctx(ctx)?,
            ),
            Message::Status(r) => put_frame(
                buf,
                MessageId::Status,
                &r.write_to_vec_with_ctx(ctx)?,
            ),
            Message::StatusReply(r) => put_frame(
                buf,
                MessageId::StatusReply,
                &r.write_to_vec_with_ctx(ctx)?,
            ),
            Message::Error(r) => put_frame(
                buf,
                MessageId::Error,
                &r.write_to_vec_with_ctx(ctx)?,
            ),
        }
        Ok(())
    }
}

// From bytes to message
impl Decoder for PeerCodec {
    type Item = Message;
    type Error = io::Error;

    fn decode(
        &mut self,
        buf: &mut BytesMut,
    ) -> Result<Option<Self::Item>, Self::Error> {
        // the length header must be present at the minimum
        if buf.remaining() < 4 {
            return Ok(None);
        }

        // peek the length without consuming it, the full frame may not be
        // buffered yet
        let mut tmp_buf = Cursor::new(&buf);
        let msg_len = tmp_buf.get_u32() as usize;

        if buf.remaining() < 4 + msg_len {
            return Ok(None);
        }
        buf.advance(4);

        if msg_len == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "empty frame",
            ));
        }

        let msg_id = MessageId::try_from(buf.get_u8())?;
        let mut payload = vec![0u8; msg_len - 1];
        buf.copy_to_slice(&mut payload);

        let ctx = BigEndian {};
        let msg = match msg_id {
            MessageId::GetVersion => Message::GetVersion,
            MessageId::Version => Message::Version(
                VersionInfo::read_from_buffer_with_ctx(ctx, &payload)?,
            ),
            MessageId::StartDownload => Message::StartDownload(
                StartDownloadRequest::read_from_buffer_with_ctx(
                    ctx, &payload,
                )?,
            ),
            MessageId::Started => Message::Started,
            MessageId::StopDownload => Message::StopDownload(
                StopDownloadRequest::read_from_buffer_with_ctx(
                    ctx, &payload,
                )?,
            ),
            MessageId::Stopped => Message::Stopped(
                StoppedReply::read_from_buffer_with_ctx(ctx, &payload)?,
            ),
            MessageId::GetTorrent => Message::GetTorrent(
                GetTorrentRequest::read_from_buffer_with_ctx(ctx, &payload)?,
            ),
            MessageId::Torrent => Message::Torrent(
                TorrentReply::read_from_buffer_with_ctx(ctx, &payload)?,
            ),
            MessageId::Status => Message::Status(
                StatusRequest::read_from_buffer_with_ctx(ctx, &payload)?,
            ),
            MessageId::StatusReply => Message::StatusReply(
                StatusReply::read_from_buffer_with_ctx(ctx, &payload)?,
            ),
            MessageId::Error => Message::Error(
                ErrorReply::read_from_buffer_with_ctx(ctx, &payload)?,
            ),
        };

        Ok(Some(msg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(msg: Message) -> Message {
        let mut buf = BytesMut::new();
        PeerCodec.encode(msg, &mut buf).unwrap();
        PeerCodec.decode(&mut buf).unwrap().unwrap()
    }

    #[test]
    fn get_torrent() {
        let msg = Message::GetTorrent(GetTorrentRequest {
            id: "e3b0c44298fc".to_owned(),
        });
        assert_eq!(round_trip(msg.clone()), msg);
    }

    #[test]
    fn start_download() {
        let msg = Message::StartDownload(StartDownloadRequest {
            source: "docker.io/library/busybox:latest".to_owned(),
            username: Some("user".to_owned()),
            password: None,
            stdout: Some("/tmp/ctr-x/stdout".to_owned()),
            stderr: Some("/tmp/ctr-x/stderr".to_owned()),
        });
        assert_eq!(round_trip(msg.clone()), msg);
    }

    #[test]
    fn status_reply() {
        let msg = Message::StatusReply(StatusReply {
            layers: vec![LayerDownState {
                id: "aaaa".to_owned(),
                state: "started".to_owned(),
                completed: 10,
                size: 20,
                seeding: true,
            }],
        });
        assert_eq!(round_trip(msg.clone()), msg);
    }

    #[test]
    fn payload_free_messages() {
        assert_eq!(round_trip(Message::GetVersion), Message::GetVersion);
        assert_eq!(round_trip(Message::Started), Message::Started);
    }

    #[test]
    fn pipelined_frames_decode_one_by_one() {
        let mut buf = BytesMut::new();
        PeerCodec.encode(Message::GetVersion, &mut buf).unwrap();
        PeerCodec
            .encode(
                Message::Torrent(TorrentReply { torrent: vec![1, 2, 3] }),
                &mut buf,
            )
            .unwrap();

        assert_eq!(
            PeerCodec.decode(&mut buf).unwrap(),
            Some(Message::GetVersion)
        );
        assert_eq!(
            PeerCodec.decode(&mut buf).unwrap(),
            Some(Message::Torrent(TorrentReply { torrent: vec![1, 2, 3] }))
        );
        assert_eq!(PeerCodec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn partial_frame_waits_for_more() {
        let mut buf = BytesMut::new();
        PeerCodec
            .encode(
                Message::GetTorrent(GetTorrentRequest { id: "ab".repeat(32) }),
                &mut buf,
            )
            .unwrap();

        let mut partial = buf.split_to(6);
        assert_eq!(PeerCodec.decode(&mut partial).unwrap(), None);
        partial.unsplit(buf);
        assert!(PeerCodec.decode(&mut partial).unwrap().is_some());
    }
}
