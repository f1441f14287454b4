//! Protocol codec for encoding/decoding messages
//!
//! Handles the canonical 38-byte header layout and the exact-length
//! contract of in-band payloads.

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;

use super::{
    Command, Frame, Message, Param, ParamKind, ParamType, SessionCommand, HEADER_SIZE,
    MAX_FRAME_SIZE, NUM_PARAMS,
};

/// Bits of the parameter type field that must stay zero
const RESERVED_TYPE_BITS: u16 = 0xFF00;

/// Codec errors
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Malformed header: {0}")]
    MalformedHeader(String),

    #[error("Wrong parameter variant: expected {expected}, found {found}")]
    WrongVariant { expected: ParamKind, found: ParamKind },

    #[error("Payload length mismatch in slot {slot}: declared {declared}, got {actual}")]
    PayloadLengthMismatch {
        slot: usize,
        declared: u64,
        actual: usize,
    },

    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: u64, max: usize },
}

/// Encode the fixed header of a message
pub fn encode_header(message: &Message, buf: &mut BytesMut) {
    buf.reserve(HEADER_SIZE);
    buf.put_u16_le(message.session_command.id());
    buf.put_u16_le(message.command.map(Command::id).unwrap_or(0));
    buf.put_u16_le(message.param_types());

    for param in &message.params {
        let (first, second) = match *param {
            Param::None => (0, 0),
            Param::Value { a, b, .. } => (a, b),
            Param::Memref { offset, size, .. } => (offset, size),
        };
        buf.put_u64_le(first);
        buf.put_u64_le(second);
    }
}

/// Decode a fixed header from the front of `bytes`
pub fn decode_header(bytes: &[u8]) -> Result<Message, CodecError> {
    if bytes.len() < HEADER_SIZE {
        return Err(CodecError::MalformedHeader(format!(
            "need {} bytes, got {}",
            HEADER_SIZE,
            bytes.len()
        )));
    }

    let mut buf = &bytes[..HEADER_SIZE];
    let session_id = buf.get_u16_le();
    let command_id = buf.get_u16_le();
    let param_types = buf.get_u16_le();

    if param_types & RESERVED_TYPE_BITS != 0 {
        return Err(CodecError::MalformedHeader(format!(
            "reserved parameter type bits set: {:#06x}",
            param_types
        )));
    }

    let session_command = SessionCommand::from_id(session_id).ok_or_else(|| {
        CodecError::MalformedHeader(format!("unknown session command {}", session_id))
    })?;

    let command = match session_command {
        SessionCommand::Invoke => Some(Command::from_id(command_id).ok_or_else(|| {
            CodecError::MalformedHeader(format!("unknown command {}", command_id))
        })?),
        _ => None,
    };

    let mut params = [Param::None; NUM_PARAMS];
    for (slot, param) in params.iter_mut().enumerate() {
        let tag = ((param_types >> (slot * 4)) & 0xF) as u8;
        let param_type = ParamType::from_tag(tag).ok_or_else(|| {
            CodecError::MalformedHeader(format!("unknown parameter type {} in slot {}", tag, slot))
        })?;

        let first = buf.get_u64_le();
        let second = buf.get_u64_le();

        *param = match (param_type.kind(), param_type.direction()) {
            (ParamKind::Value, Some(direction)) => Param::Value {
                direction,
                a: first,
                b: second,
            },
            (ParamKind::Memref, Some(direction)) => Param::Memref {
                direction,
                offset: first,
                size: second,
            },
            _ => Param::None,
        };
    }

    Ok(Message {
        session_command,
        command,
        params,
    })
}

/// Total bytes the manager accounts for a frame: the header plus every memref
pub fn frame_size(message: &Message) -> u64 {
    message.params.iter().fold(HEADER_SIZE as u64, |acc, param| {
        let size = param.as_memref().map(|(_, size)| size).unwrap_or(0);
        acc.saturating_add(size)
    })
}

/// Reject frames the manager would refuse
pub fn check_frame_size(message: &Message) -> Result<(), CodecError> {
    let size = frame_size(message);
    if size > MAX_FRAME_SIZE as u64 {
        return Err(CodecError::FrameTooLarge {
            size,
            max: MAX_FRAME_SIZE,
        });
    }
    Ok(())
}

fn payload_lengths(
    message: &Message,
    len_of: fn(&Param) -> u64,
) -> Result<[usize; NUM_PARAMS], CodecError> {
    check_frame_size(message)?;
    let mut lengths = [0usize; NUM_PARAMS];
    for (slot, param) in message.params.iter().enumerate() {
        // Bounded by MAX_FRAME_SIZE above
        lengths[slot] = len_of(param) as usize;
    }
    Ok(lengths)
}

/// Payload bytes following a request header, per slot
pub fn input_lengths(message: &Message) -> Result<[usize; NUM_PARAMS], CodecError> {
    payload_lengths(message, Param::input_len)
}

/// Payload bytes following a response header, per slot
pub fn output_lengths(message: &Message) -> Result<[usize; NUM_PARAMS], CodecError> {
    payload_lengths(message, Param::output_len)
}

fn encode_with(
    frame: &Frame,
    buf: &mut BytesMut,
    lengths: [usize; NUM_PARAMS],
) -> Result<(), CodecError> {
    for (slot, (payload, declared)) in frame.payloads.iter().zip(lengths).enumerate() {
        if payload.len() != declared {
            return Err(CodecError::PayloadLengthMismatch {
                slot,
                declared: declared as u64,
                actual: payload.len(),
            });
        }
    }

    encode_header(&frame.message, buf);
    for payload in &frame.payloads {
        buf.put_slice(payload);
    }
    Ok(())
}

/// Encode a request: header followed by the input payloads, in slot order
pub fn encode_request(frame: &Frame, buf: &mut BytesMut) -> Result<(), CodecError> {
    let lengths = input_lengths(&frame.message)?;
    encode_with(frame, buf, lengths)
}

/// Encode a response: header followed by the output payloads, in slot order
#[cfg(test)]
pub fn encode_response(frame: &Frame, buf: &mut BytesMut) -> Result<(), CodecError> {
    let lengths = output_lengths(&frame.message)?;
    encode_with(frame, buf, lengths)
}
