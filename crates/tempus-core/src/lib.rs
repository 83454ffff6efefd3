pub mod clock;
pub mod context;
pub mod events;
pub mod registry;
pub mod traits;

pub use clock::{Clock, SystemClock};
pub use context::JobExecutionContext;
pub use events::SchedulerEvent;
pub use registry::JobRegistry;
pub use traits::job::{Job, JobFactory};
pub use traits::signaler::SchedulerSignaler;
pub use traits::store::{InstanceRecoveryReport, JobStore, MisfireSweepResult};

pub use tempus_errors::{JobExecutionError, SchedulerError, SchedulerResult};
