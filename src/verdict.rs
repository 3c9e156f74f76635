//! Verdict type and its binary encoding
//!
//! Layout of an encoded verdict:
//!
//! | bytes  | field                                     |
//! |--------|-------------------------------------------|
//! | 0..8   | elapsed time, `i64` little-endian         |
//! | 8      | success flag, `0x01` / `0x00`             |
//! | 9..    | comment, raw UTF-8, no length prefix      |
//!
//! The comment has no delimiter, so decoding needs the total frame length
//! from the transport (see `server::protocol`).

/// Size of the fixed part of an encoded verdict
pub const VERDICT_HEADER_LEN: usize = 9;

/// Outcome of judging one submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub success: bool,
    /// Elapsed time in milliseconds
    pub elapsed_time: i64,
    pub comment: String,
}

impl Verdict {
    pub fn new(success: bool, elapsed_time: i64, comment: impl Into<String>) -> Self {
        Self {
            success,
            elapsed_time,
            comment: comment.into(),
        }
    }

    /// Encode into the wire layout
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(VERDICT_HEADER_LEN + self.comment.len());
        bytes.extend_from_slice(&self.elapsed_time.to_le_bytes());
        bytes.push(u8::from(self.success));
        bytes.extend_from_slice(self.comment.as_bytes());
        bytes
    }

    /// Decode a complete frame; `bytes` must be exactly one encoded verdict
    pub fn decode(bytes: &[u8]) -> Result<Self, VerdictDecodeError> {
        if bytes.len() < VERDICT_HEADER_LEN {
            return Err(VerdictDecodeError::Truncated(bytes.len()));
        }

        let mut elapsed = [0u8; 8];
        elapsed.copy_from_slice(&bytes[..8]);

        let success = match bytes[8] {
            0x00 => false,
            0x01 => true,
            other => return Err(VerdictDecodeError::InvalidFlag(other)),
        };

        let comment = std::str::from_utf8(&bytes[VERDICT_HEADER_LEN..])
            .map_err(|_| VerdictDecodeError::InvalidComment)?
            .to_string();

        Ok(Self {
            success,
            elapsed_time: i64::from_le_bytes(elapsed),
            comment,
        })
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let outcome = if self.success { "AC" } else { "WA" };
        write!(f, "{} in {}ms", outcome, self.elapsed_time)
    }
}

/// Verdict decoding errors
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum VerdictDecodeError {
    #[error("Verdict frame too short: {0} bytes")]
    Truncated(usize),

    #[error("Invalid success flag: {0:#04x}")]
    InvalidFlag(u8),

    #[error("Comment is not valid UTF-8")]
    InvalidComment,
}
