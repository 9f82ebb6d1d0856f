//! Shared fixtures for integration tests.

#![allow(dead_code)]

use meltstake_sonar::instrument::{RetryPolicy, SerialDevice, Transactor};
use meltstake_sonar::scan::CancelFlag;
use std::collections::VecDeque;
use std::io;
use std::time::Duration;

/// What the fake head answers to one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reply {
    /// An `IGX` response with the head at this many degrees.
    At(f64),
    /// Nothing before the read deadline.
    Silent,
    /// A terminated reply too short to decode.
    Garbage,
}

/// Encode an `IGX` response with the head at `degrees` and `payload` as echo data.
pub fn igx_response(degrees: f64, payload: &[u8]) -> Vec<u8> {
    let raw = ((degrees / 0.3).round() as i32 + 600) as u16;
    let len = payload.len() as u16;
    let mut bytes = b"IGX".to_vec();
    bytes.extend_from_slice(&[
        16,
        0,
        (raw & 0x7F) as u8,
        ((raw >> 7) & 0x3F) as u8,
        5,
        0,
        0,
        (len & 0x7F) as u8,
        (len >> 7) as u8,
    ]);
    bytes.extend_from_slice(payload);
    bytes.push(0xFC);
    bytes
}

/// Scripted sonar head. Each frame written consumes one reply; when the script
/// runs out the cancel flag is raised so the scan loop stops on its next check.
pub struct ScriptedHead {
    replies: VecDeque<Reply>,
    pending: Option<Reply>,
    cancel: CancelFlag,
    /// Every frame written, in order.
    pub writes: Vec<Vec<u8>>,
    /// Counter stamped into each echo payload.
    pub echo: u8,
}

impl ScriptedHead {
    pub fn new(replies: impl IntoIterator<Item = Reply>, cancel: CancelFlag) -> Self {
        Self {
            replies: replies.into_iter().collect(),
            pending: None,
            cancel,
            writes: Vec::new(),
            echo: 0,
        }
    }
}

impl SerialDevice for ScriptedHead {
    fn clear_buffers(&mut self) -> io::Result<()> {
        self.pending = None;
        Ok(())
    }

    fn write_frame(&mut self, frame: &[u8]) -> io::Result<usize> {
        self.writes.push(frame.to_vec());
        self.pending = Some(self.replies.pop_front().unwrap_or(Reply::Silent));
        if self.replies.is_empty() {
            self.cancel.cancel();
        }
        Ok(frame.len())
    }

    fn read_until(&mut self, _terminator: u8) -> io::Result<Vec<u8>> {
        match self.pending.take() {
            Some(Reply::At(degrees)) => {
                self.echo = self.echo.wrapping_add(1);
                Ok(igx_response(degrees, &[self.echo]))
            }
            Some(Reply::Garbage) => Ok(vec![0x49, 0xFC]),
            Some(Reply::Silent) | None => Ok(Vec::new()),
        }
    }
}

/// Transactor that never sleeps and does not retry.
pub fn single_shot() -> Transactor {
    Transactor::with_sleeper(
        RetryPolicy {
            retries: 0,
            backoff: Duration::ZERO,
        },
        Box::new(|_| {}),
    )
}
