//! Serial access to the sonar head: port resolution, the byte-stream device
//! abstraction, and the retrying transaction primitive.

pub mod discovery;
pub mod serial;
pub mod transaction;

pub use discovery::{resolve_port, PortCandidate, PortEnumerator, StaticPorts, SystemPorts};
pub use serial::{SerialDevice, SerialLink};
pub use transaction::{RetryPolicy, Sleeper, Transactor};
