//! Tagged stdio packet framing for attach sessions.
//!
//! Every packet read from an attach socket carries:
//! - a 1-byte stream tag ([`STDOUT`] or [`STDERR`]; [`STDIN`] is reserved)
//! - up to [`BUF_SIZE`] payload bytes
//!
//! The [`Demuxer`] routes each packet's payload to the matching output sink.

pub mod codec;
pub mod demux;
pub mod error;
pub mod tag;

pub use codec::{encode_packet, split_packet, BUF_SIZE, PACKET_SIZE};
pub use demux::{DemuxStats, Demuxer, Sink};
pub use error::{FrameError, Result};
pub use tag::{tag_name, StreamTag, STDERR, STDIN, STDOUT};
