//! Wake-hint transport for dtimer nodes
//!
//! Nodes sleep until their own heartbeat interval elapses. A wake hint
//! published on a node's channel lets another participant shorten that
//! sleep when the schedule changes. Hints are best-effort: losing one only
//! delays a poll until the receiver's next heartbeat.
//!
//! - [`WakeChannel`]: publish/subscribe transport trait
//! - [`LocalWakeHub`]: in-process implementation
//! - [`WakeHint`]: the `{"interval": ms}` message codec

pub mod channel;
pub mod error;
pub mod hint;
pub mod local;

pub use channel::{WakeChannel, WakeSubscription};
pub use error::{BusError, Result};
pub use hint::WakeHint;
pub use local::LocalWakeHub;
