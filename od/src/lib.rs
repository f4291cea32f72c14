//! Orchestrator - admission-controlled dispatcher for compute instances
//!
//! Hands tasks to a bounded pool of remote instances while enforcing a global
//! and a per-instance concurrency ceiling. Instances can be quarantined for a
//! fixed period; work that finds no capacity waits in a FIFO backlog that is
//! drained by whichever task next releases a slot.
//!
//! # Modules
//!
//! - [`instance`] - Instance identity and life-cycle state
//! - [`registry`] - Ordered, deduplicated instance store
//! - [`dispatcher`] - Admission control, backlog and quarantine
//! - [`quarantine`] - One-shot reinstatement timers
//! - [`simulate`] - Synthetic workload driver used by the CLI
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface
//!
//! # Example
//!
//! ```ignore
//! use orchestrator::{Dispatcher, DispatcherConfig, Instance};
//!
//! let dispatcher = Dispatcher::new(DispatcherConfig::default());
//! dispatcher.add_instance("10.0.0.1").await;
//!
//! let allocation = dispatcher
//!     .allocate(|instance: Instance| async move {
//!         call_remote(instance.address()).await;
//!     })
//!     .await;
//! ```

pub mod cli;
pub mod config;
pub mod dispatcher;
pub mod instance;
pub mod quarantine;
pub mod registry;
pub mod simulate;

pub use config::Config;
pub use dispatcher::{
    Allocation, DispatchError, DispatchResult, Dispatched, Dispatcher, DispatcherConfig, DispatcherState,
    ReleaseObserver, Work,
};
pub use instance::{Instance, InstanceId, InstanceSnapshot, InstanceState};
pub use registry::{Lease, Registry};
