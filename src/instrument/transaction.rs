//! One command/response exchange with retry.
//!
//! Each attempt clears the device buffers (best effort), writes the whole frame,
//! and reads up to the `0xFC` terminator. A write error, short write, read error,
//! or empty/unterminated read fails the attempt; after a fixed backoff the next
//! attempt starts. A structurally valid response is appended verbatim to the
//! optional sink; a sink failure is logged and does not fail the transaction.

use super::serial::SerialDevice;
use crate::error::{AttemptError, TransactionFailure};
use crate::protocol::RESPONSE_TERMINATOR;
use std::fmt;
use std::io::Write;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry behaviour for a transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts made after the first failed one.
    pub retries: u32,
    /// Fixed delay between attempts.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            backoff: Duration::from_millis(150),
        }
    }
}

/// How the transactor waits between attempts.
pub type Sleeper = Box<dyn FnMut(Duration) + Send>;

/// Executes transactions against a device with a fixed [`RetryPolicy`].
pub struct Transactor {
    policy: RetryPolicy,
    sleep: Sleeper,
}

impl fmt::Debug for Transactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transactor")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl Default for Transactor {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

impl Transactor {
    /// Transactor that blocks the calling thread during backoff.
    pub fn new(policy: RetryPolicy) -> Self {
        Self::with_sleeper(policy, Box::new(std::thread::sleep))
    }

    /// Transactor with a custom backoff implementation.
    pub fn with_sleeper(policy: RetryPolicy, sleep: Sleeper) -> Self {
        Self { policy, sleep }
    }

    /// The policy in use.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Write `frame` and read one terminated response, retrying per the policy.
    ///
    /// `step` only labels log lines.
    ///
    /// # Errors
    ///
    /// Returns [`TransactionFailure`] when every attempt failed. Callers treat
    /// this as "no data for this step".
    pub fn transact<D: SerialDevice + ?Sized>(
        &mut self,
        device: &mut D,
        frame: &[u8],
        sink: Option<&mut dyn Write>,
        step: u64,
    ) -> Result<Vec<u8>, TransactionFailure> {
        let attempts = self.policy.retries.saturating_add(1);
        let mut attempt = 1;
        let response = loop {
            match attempt_once(device, frame, step) {
                Ok(response) => break response,
                Err(err) => {
                    warn!("Step {}: attempt {}/{}: {}", step, attempt, attempts, err);
                    if attempt >= attempts {
                        return Err(TransactionFailure {
                            attempts: attempt,
                            last: err,
                        });
                    }
                    (self.sleep)(self.policy.backoff);
                    attempt += 1;
                }
            }
        };

        if let Some(sink) = sink {
            if let Err(e) = sink.write_all(&response) {
                warn!("Step {}: failed to write raw data: {}", step, e);
            }
        }

        Ok(response)
    }
}

fn attempt_once<D: SerialDevice + ?Sized>(
    device: &mut D,
    frame: &[u8],
    step: u64,
) -> Result<Vec<u8>, AttemptError> {
    if let Err(e) = device.clear_buffers() {
        warn!("Step {}: failed to reset buffers: {}", step, e);
    }

    let written = device.write_frame(frame).map_err(AttemptError::Write)?;
    if written != frame.len() {
        return Err(AttemptError::ShortWrite {
            written,
            expected: frame.len(),
        });
    }

    let response = device
        .read_until(RESPONSE_TERMINATOR)
        .map_err(AttemptError::Read)?;

    if response.last() != Some(&RESPONSE_TERMINATOR) {
        return Err(AttemptError::Unterminated {
            len: response.len(),
        });
    }

    debug!("Step {}: received {} bytes", step, response.len());
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io;
    use std::sync::{Arc, Mutex};

    enum Reply {
        Data(Vec<u8>),
        Timeout,
        ReadError,
    }

    #[derive(Default)]
    struct ScriptedDevice {
        replies: VecDeque<Reply>,
        writes: usize,
        short_writes: usize,
        fail_clear: bool,
    }

    impl SerialDevice for ScriptedDevice {
        fn clear_buffers(&mut self) -> io::Result<()> {
            if self.fail_clear {
                Err(io::Error::new(io::ErrorKind::Other, "clear failed"))
            } else {
                Ok(())
            }
        }

        fn write_frame(&mut self, frame: &[u8]) -> io::Result<usize> {
            self.writes += 1;
            if self.short_writes > 0 {
                self.short_writes -= 1;
                return Ok(frame.len() - 1);
            }
            Ok(frame.len())
        }

        fn read_until(&mut self, _terminator: u8) -> io::Result<Vec<u8>> {
            match self.replies.pop_front() {
                Some(Reply::Data(d)) => Ok(d),
                Some(Reply::Timeout) | None => Ok(Vec::new()),
                Some(Reply::ReadError) => Err(io::Error::new(io::ErrorKind::BrokenPipe, "gone")),
            }
        }
    }

    fn counting_transactor(retries: u32) -> (Transactor, Arc<Mutex<Vec<Duration>>>) {
        let sleeps = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&sleeps);
        let transactor = Transactor::with_sleeper(
            RetryPolicy {
                retries,
                backoff: Duration::from_millis(150),
            },
            Box::new(move |d| recorded.lock().unwrap().push(d)),
        );
        (transactor, sleeps)
    }

    const FRAME: [u8; 3] = [0xFE, 0x44, 0xFD];
    const GOOD: [u8; 4] = [1, 2, 3, 0xFC];

    #[test]
    fn test_two_timeouts_then_success() {
        let mut device = ScriptedDevice {
            replies: VecDeque::from([Reply::Timeout, Reply::Timeout, Reply::Data(GOOD.to_vec())]),
            ..Default::default()
        };
        let (mut transactor, sleeps) = counting_transactor(3);

        let response = transactor.transact(&mut device, &FRAME, None, 0).unwrap();

        assert_eq!(response, GOOD);
        assert_eq!(device.writes, 3);
        assert_eq!(*sleeps.lock().unwrap(), vec![Duration::from_millis(150); 2]);
    }

    #[test]
    fn test_exhausted_attempts() {
        let mut device = ScriptedDevice::default();
        let (mut transactor, sleeps) = counting_transactor(3);

        let err = transactor.transact(&mut device, &FRAME, None, 7).unwrap_err();

        assert_eq!(err.attempts, 4);
        assert!(matches!(err.last, AttemptError::Unterminated { len: 0 }));
        assert_eq!(device.writes, 4);
        // No sleep after the final attempt
        assert_eq!(sleeps.lock().unwrap().len(), 3);
    }

    #[test]
    fn test_unterminated_response_is_retried() {
        let mut device = ScriptedDevice {
            replies: VecDeque::from([Reply::Data(vec![1, 2, 3]), Reply::Data(GOOD.to_vec())]),
            ..Default::default()
        };
        let (mut transactor, sleeps) = counting_transactor(1);
        assert_eq!(transactor.transact(&mut device, &FRAME, None, 0).unwrap(), GOOD);
        assert_eq!(sleeps.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_short_write_is_retried() {
        let mut device = ScriptedDevice {
            replies: VecDeque::from([Reply::Data(GOOD.to_vec())]),
            short_writes: 1,
            ..Default::default()
        };
        let (mut transactor, _) = counting_transactor(3);
        assert_eq!(transactor.transact(&mut device, &FRAME, None, 0).unwrap(), GOOD);
        assert_eq!(device.writes, 2);
    }

    #[test]
    fn test_read_error_without_retries() {
        let mut device = ScriptedDevice {
            replies: VecDeque::from([Reply::ReadError, Reply::Data(GOOD.to_vec())]),
            ..Default::default()
        };
        let (mut transactor, sleeps) = counting_transactor(0);
        let err = transactor.transact(&mut device, &FRAME, None, 0).unwrap_err();
        assert_eq!(err.attempts, 1);
        assert!(matches!(err.last, AttemptError::Read(_)));
        assert!(sleeps.lock().unwrap().is_empty());
    }

    #[test]
    fn test_clear_failure_does_not_abort() {
        let mut device = ScriptedDevice {
            replies: VecDeque::from([Reply::Data(GOOD.to_vec())]),
            fail_clear: true,
            ..Default::default()
        };
        let (mut transactor, _) = counting_transactor(0);
        assert!(transactor.transact(&mut device, &FRAME, None, 0).is_ok());
    }

    #[test]
    fn test_unbounded_retries_setting() {
        let mut device = ScriptedDevice {
            replies: VecDeque::from([Reply::Timeout, Reply::Data(GOOD.to_vec())]),
            ..Default::default()
        };
        let (mut transactor, sleeps) = counting_transactor(u32::MAX);
        assert_eq!(transactor.transact(&mut device, &FRAME, None, 0).unwrap(), GOOD);
        assert_eq!(sleeps.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_response_appended_to_sink() {
        let mut device = ScriptedDevice {
            replies: VecDeque::from([Reply::Data(GOOD.to_vec()), Reply::Data(GOOD.to_vec())]),
            ..Default::default()
        };
        let (mut transactor, _) = counting_transactor(0);
        let mut sink: Vec<u8> = Vec::new();
        transactor.transact(&mut device, &FRAME, Some(&mut sink), 0).unwrap();
        transactor.transact(&mut device, &FRAME, Some(&mut sink), 1).unwrap();
        assert_eq!(sink, [GOOD, GOOD].concat());
    }

    struct BrokenSink;

    impl Write for BrokenSink {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::Other, "disk full"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_sink_failure_keeps_success() {
        let mut device = ScriptedDevice {
            replies: VecDeque::from([Reply::Data(GOOD.to_vec())]),
            ..Default::default()
        };
        let (mut transactor, _) = counting_transactor(0);
        let response = transactor.transact(&mut device, &FRAME, Some(&mut BrokenSink), 0);
        assert_eq!(response.unwrap(), GOOD);
    }

    #[test]
    fn test_failed_attempt_writes_nothing_to_sink() {
        let mut device = ScriptedDevice::default();
        let (mut transactor, _) = counting_transactor(1);
        let mut sink: Vec<u8> = Vec::new();
        assert!(transactor.transact(&mut device, &FRAME, Some(&mut sink), 0).is_err());
        assert!(sink.is_empty());
    }
}
