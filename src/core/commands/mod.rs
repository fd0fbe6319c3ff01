//! Command Pipeline
//!
//! Schema-validated, event-sourced commands. Every state change below
//! the project row goes through an executed command: validated against
//! the declarative schema, numbered, run inside a store transaction,
//! persisted, appended to the event stream, and projected into the read
//! model. Undo and redo replay persisted payloads and move stack
//! cursors; they never delete command records.

mod command;
mod manager;
mod spec;

pub mod executors;

pub use command::{Command, ParamMap};
pub use manager::{CommandManager, ExecOutcome, ManagerConfig, StackState};
pub use spec::{
    spec_for, validate_and_normalize, CommandSpec, ParamKind, ParamRule, ValidateOpts,
};
