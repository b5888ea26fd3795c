//! Task primitives shared by the relay and the framing reader.
//!
//! This library provides:
//! - Cancellation tokens with partial and full strengths
//! - Cancellable timer waits
//! - Race/join task groups that cancel and drain their losers

pub mod cancel;
pub mod group;
pub mod timer;

pub use cancel::{CancelFilter, CancelKind, CancelToken};
pub use group::TaskGroup;
pub use timer::{sleep_for, sleep_until, Wake};
