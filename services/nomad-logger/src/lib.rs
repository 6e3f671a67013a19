//! nomad-logger library
//!
//! Watches the allocations of a Nomad node and keeps a log shipper's config
//! in sync with the tasks running there.
//!
//! ## Architecture
//!
//! ```text
//! Poller
//! ├── AllocationSource  (Nomad API, lists node allocations)
//! ├── LogShipper        (fluentbit | promtail)
//! │   ├── LogSourceDeriver  (allocation -> task streams, meta overrides)
//! │   ├── render            (backend config format)
//! │   └── ConfigWriter      (write on change, run reload command)
//! └── Metrics           (allocation gauge, served over HTTP)
//! ```

pub mod config;
pub mod error;
pub mod materialize;
pub mod meta;
pub mod metrics;
pub mod nomad;
pub mod poller;
pub mod shipper;
pub mod source;

// Re-export commonly used types
pub use error::{LoggerError, Result};
pub use materialize::{ApplyOutcome, CommandRunner, ConfigWriter, ShellRunner};
pub use nomad::{Allocation, AllocationSource, NomadClient};
pub use poller::Poller;
pub use shipper::LogShipper;
pub use source::{LogSource, LogSourceDeriver, Stream};
