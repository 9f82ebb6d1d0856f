//! Imagenex 881A wire protocol.
//!
//! Commands are fixed 27-byte "switch" frames terminated by `0xFD`; responses are
//! variable length and terminated by `0xFC`. There is no escaping, so a `0xFC`
//! byte inside ping data is indistinguishable from the end of a frame.

pub mod command;
pub mod response;

pub use command::{encode, CommandFrame, FrameMode, FrameSet, FRAME_LEN};
pub use response::{decode, round_tenth, HeadStatus, Response};

/// Terminator byte closing every response frame.
pub const RESPONSE_TERMINATOR: u8 = 0xFC;

/// Terminator byte closing every command frame.
pub const COMMAND_TERMINATOR: u8 = 0xFD;

/// Degrees per raw head-position unit (the head's step granularity).
pub const DEGREES_PER_STEP: f64 = 0.3;

/// Raw head-position value defined as 0°.
pub const HEAD_POSITION_ZERO: u16 = 600;

/// Default link speed; frame offset 21 carries the matching baud code.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;
