//! Process-wide observability setup shared by the farmer binaries.

pub mod panic_hook;
pub mod tracing;
