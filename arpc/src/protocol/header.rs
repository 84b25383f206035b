use crate::error::{ArpcError, Result};
use crate::types::{CorrelationId, FunctionId};

/// Size of the wire header in bytes.
pub const HEADER_SIZE: usize = 13;

/// What the payload following a header carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageKind {
    /// Encoded arguments for `function_id`.
    Request = 0x01,
    /// Encoded result of a request, correlated by `correlation`.
    Answer = 0x02,
    /// Encoded failure text. Only sent when `report_failures` is enabled.
    Exception = 0x03,
}

impl MessageKind {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x01 => Some(MessageKind::Request),
            0x02 => Some(MessageKind::Answer),
            0x03 => Some(MessageKind::Exception),
            _ => None,
        }
    }
}

/// 13-byte header sent on the header channel ahead of every payload.
///
/// ```text
/// [0..8]  correlation: u64 LE   (caller's id, echoed on answers)
/// [8..12] function_id: u32 LE   (target on requests, echoed on answers)
/// [12]    kind: u8
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub correlation: CorrelationId,
    pub function_id: FunctionId,
    pub kind: MessageKind,
}

impl MessageHeader {
    pub fn request(function_id: FunctionId, correlation: CorrelationId) -> Self {
        Self {
            correlation,
            function_id,
            kind: MessageKind::Request,
        }
    }

    /// Answer header for `self`, echoing its correlation and function id.
    pub fn answer(&self) -> Self {
        Self {
            kind: MessageKind::Answer,
            ..*self
        }
    }

    /// Exception header for `self`, echoing its correlation and function id.
    pub fn exception(&self) -> Self {
        Self {
            kind: MessageKind::Exception,
            ..*self
        }
    }

    /// Encode header to 13 bytes (little-endian).
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..8].copy_from_slice(&self.correlation.to_le_bytes());
        buf[8..12].copy_from_slice(&self.function_id.to_le_bytes());
        buf[12] = self.kind as u8;
        buf
    }

    /// Decode a header received on the header channel.
    ///
    /// Any length other than `HEADER_SIZE` is protocol corruption.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let buf: &[u8; HEADER_SIZE] = buf
            .try_into()
            .map_err(|_| ArpcError::MalformedHeader { len: buf.len() })?;
        let mut correlation = [0u8; 8];
        correlation.copy_from_slice(&buf[0..8]);
        let function_id = u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]);
        let kind =
            MessageKind::from_u8(buf[12]).ok_or(ArpcError::UnknownMessageKind { kind: buf[12] })?;
        Ok(Self {
            correlation: u64::from_le_bytes(correlation),
            function_id,
            kind,
        })
    }
}
