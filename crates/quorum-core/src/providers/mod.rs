//! Reference collaborators for the executor and rater boundaries.

pub mod command;
pub mod fake;

pub use command::{CommandExecutor, CommandRater, CommandSpec};
pub use fake::{FakeExecutor, FakeRater};
