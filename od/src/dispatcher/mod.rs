//! Dispatcher for instance allocation
//!
//! Admission control, FIFO backlog and quarantine over a single registry,
//! all serialized by one lock that is never held while work runs.

mod allocation;
mod backlog;
mod config;
mod core;
mod work;

pub use allocation::{Allocation, DispatchError, DispatchResult, Dispatched};
pub use config::DispatcherConfig;
pub use core::{Dispatcher, DispatcherState};
pub use work::{ReleaseObserver, Work};
