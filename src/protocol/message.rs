//! Protocol message definitions
//!
//! Typed view of the fixed header: session and command identifiers, the
//! 4-bit parameter type tags and the two tagged parameter slots.

use std::fmt;

use bytes::Bytes;

use super::{CodecError, NUM_PARAMS};

/// Session-level command carried in the first header field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum SessionCommand {
    /// Create a session, or resume one when credentials are supplied
    Open = 1,
    /// Run a resource command inside the active session
    Invoke = 2,
    /// Tear down the active session
    Close = 3,
}

impl SessionCommand {
    pub fn id(self) -> u16 {
        self as u16
    }

    pub fn from_id(id: u16) -> Option<Self> {
        match id {
            1 => Some(SessionCommand::Open),
            2 => Some(SessionCommand::Invoke),
            3 => Some(SessionCommand::Close),
            _ => None,
        }
    }
}

/// Resource command, only meaningful with [`SessionCommand::Invoke`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Command {
    Open = 1337,
    Store = 1338,
    Retrieve = 1339,
    Map = 1340,
    Check = 1341,
    Close = 1342,
}

impl Command {
    pub fn id(self) -> u16 {
        self as u16
    }

    pub fn from_id(id: u16) -> Option<Self> {
        match id {
            1337 => Some(Command::Open),
            1338 => Some(Command::Store),
            1339 => Some(Command::Retrieve),
            1340 => Some(Command::Map),
            1341 => Some(Command::Check),
            1342 => Some(Command::Close),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Command::Open => "open",
            Command::Store => "store",
            Command::Retrieve => "retrieve",
            Command::Map => "map",
            Command::Check => "check",
            Command::Close => "close",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Which side supplies the data of a parameter slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Supplied by the caller in the request
    Input,
    /// Supplied by the manager in the response
    Output,
    /// Supplied in both directions
    InOut,
}

impl Direction {
    fn bits(self) -> u8 {
        match self {
            Direction::Input => 0b01,
            Direction::Output => 0b10,
            Direction::InOut => 0b11,
        }
    }

    pub fn is_input(self) -> bool {
        matches!(self, Direction::Input | Direction::InOut)
    }

    pub fn is_output(self) -> bool {
        matches!(self, Direction::Output | Direction::InOut)
    }
}

/// 4-bit parameter type tag as it appears on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ParamType {
    None = 0,
    ValueInput = 1,
    ValueOutput = 2,
    ValueInout = 3,
    MemrefInput = 5,
    MemrefOutput = 6,
    MemrefInout = 7,
}

const MEMREF_BIT: u8 = 0b100;

impl ParamType {
    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(ParamType::None),
            1 => Some(ParamType::ValueInput),
            2 => Some(ParamType::ValueOutput),
            3 => Some(ParamType::ValueInout),
            5 => Some(ParamType::MemrefInput),
            6 => Some(ParamType::MemrefOutput),
            7 => Some(ParamType::MemrefInout),
            _ => None,
        }
    }

    fn compose(kind: ParamKind, direction: Direction) -> Self {
        let tag = match kind {
            ParamKind::None => return ParamType::None,
            ParamKind::Value => direction.bits(),
            ParamKind::Memref => MEMREF_BIT | direction.bits(),
        };
        // Every (kind, direction) pair maps onto a defined tag
        ParamType::from_tag(tag).unwrap_or(ParamType::None)
    }

    pub fn kind(self) -> ParamKind {
        match self {
            ParamType::None => ParamKind::None,
            ParamType::ValueInput | ParamType::ValueOutput | ParamType::ValueInout => {
                ParamKind::Value
            }
            ParamType::MemrefInput | ParamType::MemrefOutput | ParamType::MemrefInout => {
                ParamKind::Memref
            }
        }
    }

    pub fn direction(self) -> Option<Direction> {
        match self.tag() & 0b11 {
            0b01 => Some(Direction::Input),
            0b10 => Some(Direction::Output),
            0b11 => Some(Direction::InOut),
            _ => None,
        }
    }
}

/// Variant of a parameter slot, without direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamKind {
    None,
    Value,
    Memref,
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamKind::None => f.write_str("none"),
            ParamKind::Value => f.write_str("value"),
            ParamKind::Memref => f.write_str("memref"),
        }
    }
}

/// One of the two parameter slots of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Param {
    /// Unused slot, encoded as zeroes
    #[default]
    None,
    /// Scalar pair, used for status codes and small results
    Value { direction: Direction, a: u64, b: u64 },
    /// Describes an in-band payload of `size` bytes next to the header.
    /// `offset` is always sent as zero.
    Memref {
        direction: Direction,
        offset: u64,
        size: u64,
    },
}

impl Param {
    pub fn value(direction: Direction, a: u64, b: u64) -> Self {
        Param::Value { direction, a, b }
    }

    /// Zeroed value slot the manager fills in
    pub fn value_output() -> Self {
        Param::value(Direction::Output, 0, 0)
    }

    pub fn memref(direction: Direction, size: u64) -> Self {
        Param::Memref {
            direction,
            offset: 0,
            size,
        }
    }

    pub fn kind(&self) -> ParamKind {
        match self {
            Param::None => ParamKind::None,
            Param::Value { .. } => ParamKind::Value,
            Param::Memref { .. } => ParamKind::Memref,
        }
    }

    pub fn direction(&self) -> Option<Direction> {
        match self {
            Param::None => None,
            Param::Value { direction, .. } | Param::Memref { direction, .. } => Some(*direction),
        }
    }

    pub fn param_type(&self) -> ParamType {
        match self.direction() {
            Some(direction) => ParamType::compose(self.kind(), direction),
            None => ParamType::None,
        }
    }

    /// The `(a, b)` pair of a value slot
    pub fn as_value(&self) -> Result<(u64, u64), CodecError> {
        match self {
            Param::Value { a, b, .. } => Ok((*a, *b)),
            other => Err(CodecError::WrongVariant {
                expected: ParamKind::Value,
                found: other.kind(),
            }),
        }
    }

    /// The `(offset, size)` pair of a memref slot
    pub fn as_memref(&self) -> Result<(u64, u64), CodecError> {
        match self {
            Param::Memref { offset, size, .. } => Ok((*offset, *size)),
            other => Err(CodecError::WrongVariant {
                expected: ParamKind::Memref,
                found: other.kind(),
            }),
        }
    }

    /// Bytes the caller must send after the request header for this slot
    pub fn input_len(&self) -> u64 {
        match self {
            Param::Memref {
                direction, size, ..
            } if direction.is_input() => *size,
            _ => 0,
        }
    }

    /// Bytes the manager sends after the response header for this slot
    pub fn output_len(&self) -> u64 {
        match self {
            Param::Memref {
                direction, size, ..
            } if direction.is_output() => *size,
            _ => 0,
        }
    }
}

/// The typed content of a 38-byte header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Message {
    pub session_command: SessionCommand,
    /// Present only for [`SessionCommand::Invoke`]; sent as 0 otherwise
    pub command: Option<Command>,
    pub params: [Param; NUM_PARAMS],
}

impl Message {
    /// Session-level message (open/close), command id left at 0
    pub fn session(session_command: SessionCommand, params: [Param; NUM_PARAMS]) -> Self {
        Self {
            session_command,
            command: None,
            params,
        }
    }

    pub fn invoke(command: Command, params: [Param; NUM_PARAMS]) -> Self {
        Self {
            session_command: SessionCommand::Invoke,
            command: Some(command),
            params,
        }
    }

    /// Packed type tags: slot 0 in bits 0..4, slot 1 in bits 4..8
    pub fn param_types(&self) -> u16 {
        self.params
            .iter()
            .enumerate()
            .fold(0u16, |acc, (slot, param)| {
                acc | (u16::from(param.param_type().tag()) << (slot * 4))
            })
    }

    pub fn param(&self, slot: usize) -> &Param {
        &self.params[slot]
    }

    /// Human-readable name for logging
    pub fn label(&self) -> &'static str {
        match (self.session_command, self.command) {
            (SessionCommand::Invoke, Some(command)) => command.name(),
            (SessionCommand::Invoke, None) => "invoke",
            (SessionCommand::Open, _) => "session-open",
            (SessionCommand::Close, _) => "session-close",
        }
    }
}

/// A message together with the in-band payload of each slot.
///
/// On a request the payloads are the input memrefs, on a reply the output
/// memrefs. Slots without a payload in that direction hold an empty buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub message: Message,
    pub payloads: [Bytes; NUM_PARAMS],
}

impl Frame {
    pub fn new(message: Message) -> Self {
        Self {
            message,
            payloads: [Bytes::new(), Bytes::new()],
        }
    }

    pub fn with_payload(mut self, slot: usize, payload: impl Into<Bytes>) -> Self {
        self.payloads[slot] = payload.into();
        self
    }

    pub fn payload(&self, slot: usize) -> &Bytes {
        &self.payloads[slot]
    }
}
