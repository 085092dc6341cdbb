//! Poll a condition at a fixed interval until it holds, fails fatally or
//! a deadline passes.
//!
//! Every wait in the suite (pods settling, namespace updates surviving
//! conflicts, projects disappearing) goes through [`poll_until`] or
//! [`poll_value`].

pub mod error;
pub mod poller;
pub mod spec;

pub use error::{ConditionError, ConditionResult, PollError};
pub use poller::{poll_until, poll_until_blocking, poll_value, poll_value_blocking};
pub use spec::{Backoff, PollSpec};
