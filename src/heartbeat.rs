use std::net::SocketAddr;

use log::{debug, warn};
use tokio::net::TcpStream;
use tokio_util::{
    bytes::BytesMut,
    codec::{Decoder, Encoder, FramedWrite},
};

use crate::{
    constants::{TAG_NO_REPLY, TAG_REPLY_RECEIVED, TAG_STOPPED},
    error::{Error, Result},
};

/// Liveness signal sent from the prober to the watchdog, one per completed cycle.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum HeartbeatEvent {
    /// The target answered (echo reply or unreachable notice).
    ReplyReceived,
    /// The cycle timed out without an answer.
    NoReply,
    /// The prober was interrupted by the user and is shutting down.
    Stopped,
    /// Reading the heartbeat connection failed. Never sent on the wire.
    ConnectionError,
}

impl HeartbeatEvent {
    fn tag(self) -> Option<u8> {
        match self {
            HeartbeatEvent::ReplyReceived => Some(TAG_REPLY_RECEIVED),
            HeartbeatEvent::NoReply => Some(TAG_NO_REPLY),
            HeartbeatEvent::Stopped => Some(TAG_STOPPED),
            HeartbeatEvent::ConnectionError => None,
        }
    }

    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            TAG_REPLY_RECEIVED => Some(HeartbeatEvent::ReplyReceived),
            TAG_NO_REPLY => Some(HeartbeatEvent::NoReply),
            TAG_STOPPED => Some(HeartbeatEvent::Stopped),
            _ => None,
        }
    }
}

/// Frames heartbeat events as a single tag byte each.
///
/// Unknown bytes are skipped, so a corrupted byte never merges or reorders the events
/// around it.
#[derive(Copy, Clone, Debug, Default)]
pub struct HeartbeatCodec;

impl Decoder for HeartbeatCodec {
    type Item = HeartbeatEvent;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<HeartbeatEvent>> {
        while !src.is_empty() {
            let tag = src.split_to(1)[0];
            match HeartbeatEvent::from_tag(tag) {
                Some(event) => return Ok(Some(event)),
                None => warn!("skipping unknown heartbeat byte {:#04x}", tag),
            }
        }
        Ok(None)
    }
}

impl Encoder<HeartbeatEvent> for HeartbeatCodec {
    type Error = Error;

    fn encode(&mut self, event: HeartbeatEvent, dst: &mut BytesMut) -> Result<()> {
        let tag = event.tag().ok_or_else(|| {
            Error::Opaque(format!("{:?} cannot be sent as a heartbeat", event).into())
        })?;
        dst.extend_from_slice(&[tag]);
        Ok(())
    }
}

pub type HeartbeatSender = FramedWrite<TcpStream, HeartbeatCodec>;

/// Opens the prober's end of the heartbeat channel.
pub async fn connect(addr: SocketAddr) -> Result<HeartbeatSender> {
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    debug!("heartbeat channel connected to {}", addr);
    Ok(FramedWrite::new(stream, HeartbeatCodec))
}
