//! Tokio tasks binding the framing layer to async byte streams.
mod inbox;
mod receiver;
mod sender;

pub use inbox::*;
pub use receiver::*;
pub use sender::*;

use crate::error::Error;

/// What a connection task hands back when it terminates.
#[derive(Debug)]
pub struct TaskExit<T> {
    /// The stream half the task was driving.
    pub io: T,
    /// The fatal error that ended the task, if any.
    pub error: Option<Error>,
}
