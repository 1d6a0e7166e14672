//! The THINK/DECIDE/EXECUTE/HITL/OBSERVE/END state machine (`Executor`),
//! its per-client event fan-out (`EventBus`), its per-trace concurrency
//! guard (`TraceLockMap`), and the public facade (`TaskService`) the outer
//! process calls into.

pub mod events;
pub mod executor;
pub mod lock;
pub mod service;

pub use events::{Event, EventBus, EventEnvelope};
pub use executor::Executor;
pub use lock::TraceLockMap;
pub use service::TaskService;
