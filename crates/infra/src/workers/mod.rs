//! Long-running background tasks: the reconnection supervisor and the
//! dispatch loops it starts.

pub mod dispatch_worker;
pub mod supervisor;

pub use dispatch_worker::{
    DispatchContext, DispatchExit, DispatchHandle, DispatchWorker, PipelineError, Processed,
    handle_delivery,
};
pub use supervisor::{Supervisor, SupervisorSettings};
