//! The device synchronizer: copies dirty sectors from one
//! source device to one destination device. The largest single component
//! of the core, grounded throughout in `device_synchronizer.cc` and, for
//! structure, mayastor's rebuild module split (`descriptor`/`error`/`state`
//! as separate files).

pub mod descriptor;
pub mod error;
pub mod job;
pub mod state;
pub mod stats;

pub use descriptor::SyncDescriptor;
pub use error::SyncError;
pub use job::Synchronizer;
pub use state::SyncState;
pub use stats::{ConvergenceHistory, ConvergencePolicy, EndpointsConvergencePolicy, NullProgressSink, ProgressSink};
