// Kernel - shared infrastructure: coordination store access, the in-process
// event bus, and the log-chunk envelope.
//
// Business logic (dispatch, recurrence, execution) lives in `scheduler/` and
// `worker/`; everything here is plumbing those layers share.

pub mod coord;
pub mod events;
pub mod logs;

pub use coord::CoordStore;
pub use events::{EventBus, EventKind, SchedulerEvent};
pub use logs::LogChunk;
