use thiserror::Error;

/// All errors produced by the strandstream core: varint/frame codec, path
/// table, assembler, and writer.
#[derive(Debug, Error)]
pub enum StrandError {
    #[error("varint encodes a value too large for the 8-byte class")]
    VarintOverflow,

    #[error("varint is not minimally encoded")]
    VarintNotMinimal,

    #[error("buffer too short to decode a varint")]
    VarintTruncated,

    #[error("frame length {len} exceeds maximum {max}")]
    FrameTooLarge { len: u64, max: u64 },

    #[error("frame length is zero")]
    FrameEmpty,

    #[error("path index {0} is out of range")]
    InvalidPathIndex(usize),

    #[error("path index {0} is not sane for sending")]
    PathNotSane(usize),

    #[error("no path table slot was available for a new path")]
    PathTableFull,

    #[error("no primary path is currently selectable")]
    NoUsablePath,

    #[error("stream table is full; dropping stream {0}")]
    StreamTableFull(u64),

    #[error("send on path {path} rejected by transport: {reason}")]
    SendRejected { path: usize, reason: &'static str },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("qlog serialization error: {0}")]
    Qlog(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, StrandError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages_are_stable() {
        let e = StrandError::FrameTooLarge { len: 20, max: 10 };
        assert_eq!(e.to_string(), "frame length 20 exceeds maximum 10");
    }
}
