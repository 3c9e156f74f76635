//! Session wire protocol
//!
//! Request: `opcode: u8`, `problem_number: u32 LE`.
//! Response: `kind: u8`, `length: u32 LE`, `payload`. A verdict payload is
//! the encoded verdict; a failure payload is `"<CODE>: <message>"`.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::constants::{frame_kinds, opcodes};
use crate::error::JudgeError;
use crate::models::ProblemNumber;

/// Failure code sent for requests the server cannot parse
pub const BAD_REQUEST: &str = "BAD_REQUEST";

/// Failure code sent in place of a response that does not fit in a frame
pub const RESPONSE_TOO_LARGE: &str = "RESPONSE_TOO_LARGE";

/// Largest response payload a client accepts
pub const MAX_PAYLOAD_LEN: u32 = 16 * 1024 * 1024;

/// Protocol errors
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Unknown opcode {0:#04x}")]
    UnknownOpcode(u8),

    #[error("Unknown frame kind {0:#04x}")]
    UnknownFrameKind(u8),

    #[error("Frame payload of {0} bytes is too large")]
    FrameTooLarge(usize),

    #[error("Malformed failure payload")]
    MalformedFailure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    /// Run the solution and judge it
    Run(ProblemNumber),
    /// Reset execution state ahead of a debug run
    Prepare(ProblemNumber),
    /// Judge the last run again
    Check(ProblemNumber),
}

impl Request {
    pub fn problem(&self) -> ProblemNumber {
        match self {
            Request::Run(problem) | Request::Prepare(problem) | Request::Check(problem) => *problem,
        }
    }

    pub fn encode(&self) -> [u8; 5] {
        let opcode = match self {
            Request::Run(_) => opcodes::RUN,
            Request::Prepare(_) => opcodes::PREPARE,
            Request::Check(_) => opcodes::CHECK,
        };
        let mut bytes = [0u8; 5];
        bytes[0] = opcode;
        bytes[1..].copy_from_slice(&self.problem().to_le_bytes());
        bytes
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Encoded verdict bytes
    Verdict(Vec<u8>),
    /// Judging itself failed
    Failure { code: String, message: String },
    Ack,
}

impl Response {
    pub fn failure(code: impl Into<String>, message: impl Into<String>) -> Self {
        Response::Failure {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Frame the response. Fails when the payload exceeds `MAX_PAYLOAD_LEN`.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let (kind, payload) = match self {
            Response::Verdict(bytes) => (frame_kinds::VERDICT, bytes.clone()),
            Response::Failure { code, message } => {
                (frame_kinds::FAILURE, format!("{}: {}", code, message).into_bytes())
            }
            Response::Ack => (frame_kinds::ACK, Vec::new()),
        };

        let len = u32::try_from(payload.len())
            .ok()
            .filter(|len| *len <= MAX_PAYLOAD_LEN)
            .ok_or(ProtocolError::FrameTooLarge(payload.len()))?;

        let mut frame = Vec::with_capacity(5 + payload.len());
        frame.push(kind);
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(&payload);
        Ok(frame)
    }
}

impl From<&JudgeError> for Response {
    fn from(err: &JudgeError) -> Self {
        Response::failure(err.error_code(), err.to_string())
    }
}

/// Read the next request. `Ok(None)` when the peer closed between requests.
pub async fn read_request<R>(reader: &mut R) -> Result<Option<Request>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let opcode = match reader.read_u8().await {
        Ok(opcode) => opcode,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let request: fn(ProblemNumber) -> Request = match opcode {
        opcodes::RUN => Request::Run,
        opcodes::PREPARE => Request::Prepare,
        opcodes::CHECK => Request::Check,
        other => return Err(ProtocolError::UnknownOpcode(other)),
    };
    let problem = reader.read_u32_le().await?;
    Ok(Some(request(problem)))
}

pub async fn write_response<W>(writer: &mut W, response: &Response) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    let frame = match response.encode() {
        Ok(frame) => frame,
        Err(ProtocolError::FrameTooLarge(len)) => {
            tracing::warn!(len, "Response does not fit in a frame, sending a failure instead");
            Response::failure(
                RESPONSE_TOO_LARGE,
                format!("response of {} bytes exceeds the frame limit", len),
            )
            .encode()?
        }
        Err(e) => return Err(e),
    };
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Client side: read one response frame
pub async fn read_response<R>(reader: &mut R) -> Result<Response, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let kind = reader.read_u8().await?;
    let len = reader.read_u32_le().await?;
    if len > MAX_PAYLOAD_LEN {
        return Err(ProtocolError::FrameTooLarge(len as usize));
    }

    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await?;

    match kind {
        frame_kinds::VERDICT => Ok(Response::Verdict(payload)),
        frame_kinds::ACK => Ok(Response::Ack),
        frame_kinds::FAILURE => {
            let text = String::from_utf8(payload).map_err(|_| ProtocolError::MalformedFailure)?;
            let (code, message) = text
                .split_once(": ")
                .ok_or(ProtocolError::MalformedFailure)?;
            Ok(Response::failure(code, message))
        }
        other => Err(ProtocolError::UnknownFrameKind(other)),
    }
}
