//! # Background task abstractions.
//!
//! - [`Task`] - trait for one periodic, cancelable unit of work
//! - [`TaskFn`] - closure-backed implementation
//! - [`TaskRef`] - shared handle (`Arc<dyn Task>`)
//! - [`TaskSpec`] - task plus its schedule and error limit, as registered with the coordinator

mod spec;
mod task;
mod task_fn;

pub use spec::TaskSpec;
pub use task::{Task, TaskRef};
pub use task_fn::TaskFn;
