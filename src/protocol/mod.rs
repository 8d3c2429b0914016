//! STOMP wire protocol
//!
//! - [`ring_buffer`]: fixed-capacity receive buffer with peek/commit reads
//! - [`frame`]: the frame type and its command set
//! - [`codec`]: incremental decoder and encoder

pub mod codec;
pub mod constants;
pub mod frame;
pub mod ring_buffer;

pub use codec::{decode, encode};
pub use frame::{Command, Frame, Headers};
pub use ring_buffer::{BufferError, RingBuffer};
