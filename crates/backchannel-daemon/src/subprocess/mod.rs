//! One-shot Claude Code invocations.

pub mod invoker;

pub use invoker::{
    InvocationRequest, InvocationResult, PermissionStrategy, ProcessInvoker, SubprocessError,
};
