//! Wire vocabulary shared by the `ddbusd` listener and the tools that talk
//! to it.
//!
//! Every connection carries JSON Lines: one [`Envelope`] per line. The
//! [`codec`] module frames envelopes onto byte streams and enforces
//! [`MAX_FRAME_BYTES`].

pub mod codec;
mod frame;
mod ids;

pub use codec::{FrameError, FrameReader, MAX_FRAME_BYTES, write_frame};
pub use frame::{Envelope, Frame, ResponseBody, ResultCode};
pub use ids::{ClientId, RequestId};
