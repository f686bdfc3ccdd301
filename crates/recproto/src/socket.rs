//! ZMQ socket setup shared by the daemon and its clients.
//!
//! All sockets get LINGER = 0 so a closing peer never blocks on undelivered
//! frames.

use bytes::Bytes;
use tmq::{dealer::Dealer, router::Router};

pub use tmq::{Context as ZmqContext, Multipart, TmqError};

/// Bind the daemon's ROUTER socket.
pub fn create_router_and_bind(context: &ZmqContext, endpoint: &str) -> Result<Router, TmqError> {
    tmq::router(context).set_linger(0).bind(endpoint)
}

/// Connect a client DEALER socket under the given routing identity.
pub fn create_dealer_and_connect(
    context: &ZmqContext,
    endpoint: &str,
    identity: &[u8],
) -> Result<Dealer, TmqError> {
    tmq::dealer(context)
        .set_linger(0)
        .set_identity(identity)
        .connect(endpoint)
}

/// Convert tmq Multipart to frames for parsing
pub fn multipart_to_frames(mp: Multipart) -> Vec<Bytes> {
    mp.into_iter().map(|msg| Bytes::from(msg.to_vec())).collect()
}

/// Convert frames to tmq Multipart for sending
pub fn frames_to_multipart(frames: &[Bytes]) -> Multipart {
    frames
        .iter()
        .map(|f| f.to_vec())
        .collect::<Vec<_>>()
        .into()
}
