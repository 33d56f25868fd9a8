//! Stream tags carried in the first byte of every attach packet.

/// Reserved for client-to-server stdin; never received on the client side.
pub const STDIN: u8 = 1;

/// Container stdout.
pub const STDOUT: u8 = 2;

/// Container stderr.
pub const STDERR: u8 = 3;

/// A recognised stream tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamTag {
    Stdin,
    Stdout,
    Stderr,
}

impl StreamTag {
    /// Parse a tag byte.
    pub fn from_byte(tag: u8) -> Option<Self> {
        match tag {
            STDIN => Some(Self::Stdin),
            STDOUT => Some(Self::Stdout),
            STDERR => Some(Self::Stderr),
            _ => None,
        }
    }

    /// Wire value of this tag.
    pub fn as_byte(self) -> u8 {
        match self {
            Self::Stdin => STDIN,
            Self::Stdout => STDOUT,
            Self::Stderr => STDERR,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Stdin => "stdin",
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

/// Returns a human-readable name for a tag byte.
pub fn tag_name(tag: u8) -> &'static str {
    StreamTag::from_byte(tag).map_or("unknown", StreamTag::name)
}
