//! # Wire codec for commit frames.
//!
//! A frame is a fixed 12-byte header followed by the opaque payload:
//!
//! ```text
//!  0               8           12                      12 + len
//!  ┌───────────────┬───────────┬─────────────────────────┐
//!  │ seq (u64, BE) │ len (u32) │ payload (len bytes)     │
//!  └───────────────┴───────────┴─────────────────────────┘
//! ```
//!
//! - [`FrameCodec`] implements `tokio_util`'s `Decoder`/`Encoder`.
//! - [`FramedUpstream`] turns any byte-stream [`Connect`]or into an [`Upstream`].
//! - [`pump`] writes a [`Subscription`] into a frame sink and tears the session
//!   down with [`RelayError::ConnectionFailure`] when a write fails.
//!
//! Payloads larger than the codec's limit are rejected on both sides.

use std::borrow::Cow;
use std::io;

use async_trait::async_trait;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures::{Sink, SinkExt, StreamExt};
use tokio::io::AsyncRead;
use tokio_util::codec::{Decoder, Encoder, FramedRead};

use crate::buffer::CommitEvent;
use crate::core::Subscription;
use crate::error::RelayError;
use crate::upstream::{RecordStream, Upstream, UpstreamRecord};

/// Header size: `seq` + payload length.
pub const HEADER_LEN: usize = 12;

/// Default payload limit (16 MiB).
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// One decoded frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    /// Sequence number.
    pub seq: u64,
    /// Opaque payload.
    pub payload: Bytes,
}

impl From<&CommitEvent> for Frame {
    fn from(ev: &CommitEvent) -> Self {
        Self {
            seq: ev.seq,
            payload: ev.payload.clone(),
        }
    }
}

impl From<Frame> for UpstreamRecord {
    fn from(f: Frame) -> Self {
        UpstreamRecord::new(f.seq, f.payload)
    }
}

/// Length-delimited codec for [`Frame`]s.
#[derive(Clone, Copy, Debug)]
pub struct FrameCodec {
    max_payload: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self {
            max_payload: DEFAULT_MAX_PAYLOAD,
        }
    }
}

impl FrameCodec {
    /// Codec with the default payload limit.
    pub fn new() -> Self {
        Self::default()
    }

    /// Codec rejecting payloads above `max_payload` bytes (capped at `u32::MAX`).
    pub fn with_max_payload(max_payload: usize) -> Self {
        Self {
            max_payload: max_payload.min(u32::MAX as usize),
        }
    }

    fn check_len(&self, len: usize) -> io::Result<()> {
        if len > self.max_payload {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("frame payload {len} exceeds limit {}", self.max_payload),
            ));
        }
        Ok(())
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> io::Result<Option<Frame>> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }
        let mut header = &src[..HEADER_LEN];
        let seq = header.get_u64();
        let len = header.get_u32() as usize;
        self.check_len(len)?;

        let total = HEADER_LEN + len;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        let payload = src.split_to(len).freeze();
        Ok(Some(Frame { seq, payload }))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = io::Error;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> io::Result<()> {
        self.check_len(frame.payload.len())?;
        dst.reserve(HEADER_LEN + frame.payload.len());
        dst.put_u64(frame.seq);
        dst.put_u32(frame.payload.len() as u32);
        dst.extend_from_slice(&frame.payload);
        Ok(())
    }
}

/// Opens byte-stream connections to the upstream source.
///
/// `resume_after` is the relay's last accepted sequence; how it is conveyed
/// (query string, handshake frame...) is up to the implementation.
#[async_trait]
pub trait Connect: Send + Sync + 'static {
    /// Connection type.
    type Io: AsyncRead + Send + Unpin + 'static;

    /// Opens one connection.
    async fn connect(&self, resume_after: Option<u64>) -> io::Result<Self::Io>;
}

/// [`Upstream`] decoding [`FrameCodec`] frames from a [`Connect`]or.
pub struct FramedUpstream<C> {
    name: Cow<'static, str>,
    connector: C,
    codec: FrameCodec,
}

impl<C: Connect> FramedUpstream<C> {
    /// Wraps `connector` with the default codec.
    pub fn new(name: impl Into<Cow<'static, str>>, connector: C) -> Self {
        Self {
            name: name.into(),
            connector,
            codec: FrameCodec::default(),
        }
    }

    /// Replaces the codec (e.g. to change the payload limit).
    pub fn with_codec(mut self, codec: FrameCodec) -> Self {
        self.codec = codec;
        self
    }
}

#[async_trait]
impl<C: Connect> Upstream for FramedUpstream<C> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self, last_good: Option<u64>) -> Result<RecordStream, RelayError> {
        let io = self
            .connector
            .connect(last_good)
            .await
            .map_err(|e| RelayError::upstream(format!("connect: {e}")))?;

        let records = FramedRead::new(io, self.codec).map(|res| {
            res.map(UpstreamRecord::from)
                .map_err(|e| RelayError::upstream(e.to_string()))
        });
        Ok(records.boxed())
    }
}

/// Writes every batch of `sub` into `sink` until the session ends.
///
/// Returns the number of events written when the session ends cleanly, the
/// session's error if it was closed with one, or
/// [`RelayError::ConnectionFailure`] if writing fails (the session is then
/// closed with that reason).
pub async fn pump<S>(mut sub: Subscription, sink: &mut S) -> Result<u64, RelayError>
where
    S: Sink<Frame, Error = io::Error> + Unpin,
{
    let mut written = 0u64;
    loop {
        let batch = match sub.next_batch().await {
            None => return Ok(written),
            Some(Err(e)) => return Err(e),
            Some(Ok(batch)) => batch,
        };

        let mut frames = futures::stream::iter(batch.iter().map(frame_of));
        if let Err(e) = sink.send_all(&mut frames).await {
            let err = RelayError::connection(e.to_string());
            sub.fail(err.clone());
            return Err(err);
        }
        written += batch.len() as u64;
    }
}

// A named fn rather than a closure keeps `pump`'s future `Send`
// (closures here trip rustc's higher-ranked lifetime inference).
fn frame_of(ev: &std::sync::Arc<CommitEvent>) -> io::Result<Frame> {
    Ok(Frame::from(ev.as_ref()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_waits_for_full_frame() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        codec
            .encode(
                Frame {
                    seq: 42,
                    payload: Bytes::from_static(b"hello"),
                },
                &mut buf,
            )
            .unwrap();
        assert_eq!(buf.len(), HEADER_LEN + 5);

        let mut partial = buf.split_to(HEADER_LEN + 2);
        assert_eq!(codec.decode(&mut partial).unwrap(), None);
        partial.unsplit(buf);

        let frame = codec.decode(&mut partial).unwrap().unwrap();
        assert_eq!(frame.seq, 42);
        assert_eq!(&frame.payload[..], b"hello");
        assert!(partial.is_empty());
    }

    #[test]
    fn test_oversized_frames_rejected() {
        let mut codec = FrameCodec::with_max_payload(4);
        let mut buf = BytesMut::new();
        let err = codec
            .encode(
                Frame {
                    seq: 1,
                    payload: Bytes::from_static(b"too long"),
                },
                &mut buf,
            )
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);

        buf.put_u64(1);
        buf.put_u32(1_000);
        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn test_decodes_back_to_back_frames() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        for seq in 1..=3u64 {
            codec
                .encode(
                    Frame {
                        seq,
                        payload: Bytes::from(vec![seq as u8; seq as usize]),
                    },
                    &mut buf,
                )
                .unwrap();
        }
        let mut seqs = Vec::new();
        while let Some(f) = codec.decode(&mut buf).unwrap() {
            assert_eq!(f.payload.len() as u64, f.seq);
            seqs.push(f.seq);
        }
        assert_eq!(seqs, vec![1, 2, 3]);
    }
}
