//! Outgoing text
//!
//! FIFO queue with bounded retry and on-demand transport connection.

mod channel;
mod retry;

pub use channel::{
    ConnectFn, OutgoingTextItem, TextChannel, TextChannelConfig, TextChannelState, TextErrorKind,
    TextEvent,
};
pub use retry::{Backoff, RetryPolicy, delay_for_attempt};
