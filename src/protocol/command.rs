//! Switch command encoding.
//!
//! Byte layout of the 27-byte switch frame:
//!
//! | Offset | Value |
//! |---|---|
//! | 0, 1 | `0xFE 0x44` sync header |
//! | 2 | head id (16) |
//! | 3 | max range |
//! | 5 | rev/hold, bit `0x40` set for reverse stepping |
//! | 6 | master/slave `0x43` |
//! | 8 | start gain |
//! | 9 | logf |
//! | 10 | absorption |
//! | 11 | train angle |
//! | 12 | sector width |
//! | 13 | step size (0 when not stepping) |
//! | 14 | pulse length |
//! | 19 | data points |
//! | 20 | resolution (8-bit) |
//! | 21 | baud code (`0x06` = 115200) |
//! | 23 | calibrate flag |
//! | 24 | switch delay (1) |
//! | 25 | frequency |
//! | 26 | `0xFD` terminator |
//!
//! All other offsets are reserved and sent as 0.

use super::COMMAND_TERMINATOR;
use crate::config::SwitchParameters;
use std::fmt;
use tracing::info;

/// Length of every switch command frame.
pub const FRAME_LEN: usize = 27;

const SYNC: [u8; 2] = [0xFE, 0x44];
const HEAD_ID: u8 = 16;
const MASTER_SLAVE: u8 = 0x43;
const REVERSE_BIT: u8 = 0x40;
const RESOLUTION_8_BIT: u8 = 8;
const BAUD_CODE_115200: u8 = 0x06;
const SWITCH_DELAY: u8 = 1;

/// Mode flags applied on top of the switch parameters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameMode {
    /// Set the calibrate flag (offset 23).
    pub calibration: bool,
    /// Step the head in the reverse direction (bit `0x40` of offset 5).
    pub reverse: bool,
    /// Send a step size of 0 so the head pings without moving.
    pub no_step: bool,
}

impl FrameMode {
    /// Normal stepping frame.
    pub const STEP: FrameMode = FrameMode {
        calibration: false,
        reverse: false,
        no_step: false,
    };

    /// Ping in place.
    pub const PING: FrameMode = FrameMode {
        calibration: false,
        reverse: false,
        no_step: true,
    };

    /// Ping in place with calibration, used to read the starting head position.
    pub const CHECK: FrameMode = FrameMode {
        calibration: true,
        reverse: false,
        no_step: true,
    };
}

/// An immutable 27-byte switch command.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct CommandFrame([u8; FRAME_LEN]);

impl CommandFrame {
    /// Raw frame bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Lowercase hex dump, as written to the log.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

impl AsRef<[u8]> for CommandFrame {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for CommandFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CommandFrame({})", self.to_hex())
    }
}

/// Build a switch command from validated parameters.
///
/// `SwitchParameters` can only be constructed complete, so unlike a key-value
/// lookup this cannot fail halfway through a frame. When `tag` is given, an audit
/// line with the tag and the hex dump is logged.
pub fn encode(params: &SwitchParameters, mode: FrameMode, tag: Option<&str>) -> CommandFrame {
    let mut frame = [0u8; FRAME_LEN];

    frame[0] = SYNC[0];
    frame[1] = SYNC[1];
    frame[2] = HEAD_ID;
    frame[3] = params.max_range;
    frame[5] = if mode.reverse { REVERSE_BIT } else { 0 };
    frame[6] = MASTER_SLAVE;
    frame[8] = params.start_gain;
    frame[9] = params.logf;
    frame[10] = params.absorption;
    frame[11] = params.train_angle;
    frame[12] = params.sector_width;
    frame[13] = if mode.no_step { 0 } else { params.step_size };
    frame[14] = params.pulse_length;
    frame[19] = params.data_points;
    frame[20] = RESOLUTION_8_BIT;
    frame[21] = BAUD_CODE_115200;
    frame[23] = u8::from(mode.calibration);
    frame[24] = SWITCH_DELAY;
    frame[25] = params.freq;
    frame[26] = COMMAND_TERMINATOR;

    let frame = CommandFrame(frame);
    if let Some(tag) = tag {
        info!(
            "{} binary switch command built (len={}): {}",
            tag,
            FRAME_LEN,
            frame.to_hex()
        );
    }
    frame
}

/// The three frame variants the scan controller uses, built once per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSet {
    /// Normal stepping command.
    pub step: CommandFrame,
    /// Ping without stepping.
    pub ping: CommandFrame,
    /// Ping without stepping, calibrate flag set.
    pub check: CommandFrame,
}

impl FrameSet {
    /// Encode all three variants, logging each one.
    pub fn build(params: &SwitchParameters) -> Self {
        Self {
            step: encode(params, FrameMode::STEP, Some("STEP")),
            ping: encode(params, FrameMode::PING, Some("PING")),
            check: encode(params, FrameMode::CHECK, Some("CHECK")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    fn params() -> SwitchParameters {
        SwitchParameters {
            max_range: 5,
            freq: 165,
            start_gain: 18,
            logf: 2,
            absorption: 60,
            train_angle: 60,
            sector_width: 10,
            step_size: 4,
            pulse_length: 2,
            min_range: 0,
            data_points: 50,
            num_sweeps: 2,
        }
    }

    #[test]
    fn test_fixed_bytes() {
        let frame = encode(&params(), FrameMode::STEP, None);
        let bytes = frame.as_bytes();
        assert_eq!(bytes.len(), FRAME_LEN);
        assert_eq!(bytes[0], 0xFE);
        assert_eq!(bytes[1], 0x44);
        assert_eq!(bytes[2], 16);
        assert_eq!(bytes[6], 0x43);
        assert_eq!(bytes[20], 8);
        assert_eq!(bytes[21], 0x06);
        assert_eq!(bytes[24], 1);
        assert_eq!(bytes[26], 0xFD);
    }

    #[test]
    fn test_parameter_bytes() {
        let frame = encode(&params(), FrameMode::STEP, None);
        let bytes = frame.as_bytes();
        assert_eq!(bytes[3], 5);
        assert_eq!(bytes[8], 18);
        assert_eq!(bytes[9], 2);
        assert_eq!(bytes[10], 60);
        assert_eq!(bytes[11], 60);
        assert_eq!(bytes[12], 10);
        assert_eq!(bytes[13], 4);
        assert_eq!(bytes[14], 2);
        assert_eq!(bytes[19], 50);
        assert_eq!(bytes[23], 0);
        assert_eq!(bytes[25], 165);
        for reserved in [4, 5, 7, 15, 16, 17, 18, 22] {
            assert_eq!(bytes[reserved], 0, "offset {}", reserved);
        }
    }

    #[test]
    fn test_reverse_sets_direction_bit() {
        let mode = FrameMode {
            reverse: true,
            ..FrameMode::STEP
        };
        let forward = encode(&params(), FrameMode::STEP, None);
        let reverse = encode(&params(), mode, None);
        assert_ne!(forward, reverse);
        assert_eq!(reverse.as_bytes()[5], 0x40);
        assert_eq!(reverse.as_bytes()[6], 0x43);
        assert_eq!(forward.as_bytes()[5], 0);
    }

    #[test]
    #[traced_test]
    fn test_build_logs_each_frame() {
        let frames = FrameSet::build(&params());
        assert!(logs_contain(&format!(
            "STEP binary switch command built (len=27): {}",
            frames.step.to_hex()
        )));
        assert!(logs_contain("STEP binary switch command built (len=27): fe44"));
        assert!(logs_contain("PING binary switch command built"));
        assert!(logs_contain("CHECK binary switch command built"));
    }

    #[test]
    fn test_variants() {
        let frames = FrameSet::build(&params());
        assert_eq!(frames.step.as_bytes()[13], 4);
        assert_eq!(frames.step.as_bytes()[23], 0);

        assert_eq!(frames.ping.as_bytes()[13], 0);
        assert_eq!(frames.ping.as_bytes()[23], 0);

        assert_eq!(frames.check.as_bytes()[13], 0);
        assert_eq!(frames.check.as_bytes()[23], 1);
    }

    #[test]
    fn test_hex_dump() {
        let frame = encode(&params(), FrameMode::STEP, None);
        let hex = frame.to_hex();
        assert_eq!(hex.len(), FRAME_LEN * 2);
        assert!(hex.starts_with("fe4410"));
        assert!(hex.ends_with("fd"));
    }
}
