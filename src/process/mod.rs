//! External process plumbing
//!
//! - [`WorkerProcess`]: spawn, poll output lines, poll exit, terminate
//! - [`run_bounded`]: one-shot command with a hard timeout

mod bounded;
mod child;

pub use bounded::{run_bounded, BoundedError, BoundedOutput};
pub use child::{OutputLine, Stream, WorkerProcess};
