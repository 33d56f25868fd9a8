/// Errors that can occur while framing or demultiplexing attach packets.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// A packet arrived for a stream with no configured sink, or with an
    /// unrecognised tag.
    #[error("output destination cannot be nil (packet tag {tag})")]
    NilDestination { tag: u8 },

    /// The sink accepted fewer bytes than the packet payload.
    #[error("short write to {stream} ({written} of {expected} bytes)")]
    ShortWrite {
        stream: &'static str,
        expected: usize,
        written: usize,
    },

    /// Writing or flushing a sink failed.
    #[error("write {stream}: {source}")]
    Write {
        stream: &'static str,
        source: std::io::Error,
    },

    /// Reading from the attach socket failed.
    #[error("read attach socket: {0}")]
    Read(std::io::Error),

    /// The payload does not fit in one packet.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },
}

impl FrameError {
    /// Whether this error is a protocol violation rather than an I/O failure.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, FrameError::NilDestination { .. })
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
