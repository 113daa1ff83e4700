//! # durafsm-core
//!
//! State machine engine for durafsm.
//!
//! This crate provides:
//! - Machine definitions (states, guarded transitions, entry/exit tasks)
//! - Guard predicates and the guard expression language
//! - The interpreter that selects and applies transitions
//! - The task invocation contract used for entry/exit tasks

pub mod definition;
pub mod document_review;
pub mod error;
pub mod guard;
pub mod instance;
pub mod interpreter;
pub mod invoker;

pub use definition::{MachineBuilder, MachineDefinition, StateDefinition, TransitionDefinition};
pub use error::CoreError;
pub use guard::{Guard, GuardExpr};
pub use instance::{Instance, InstanceRecord};
pub use interpreter::{ApplyResult, Interpreter, Plan};
pub use invoker::{InvokeError, InvokeMode, TaskInvoker};
