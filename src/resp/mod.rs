//! The RESP wire layer: framing inbound command arrays and serializing the
//! replies the dispatcher produces.

mod codec;
mod reply;

pub use codec::{CommandFrame, ReplyEncoder, RequestDecoder};
pub use reply::Reply;
