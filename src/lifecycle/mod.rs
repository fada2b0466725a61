//! Running the CNB lifecycle inside containers
//!
//! A build is a [`LifecyclePlan`] turned into phase containers by the
//! [`PhaseFactory`] and driven by the [`LifecycleExecutor`], which reports
//! progress through a [`StateTracker`].

pub mod executor;
pub mod interrupt;
pub mod lock;
pub mod phase;
pub mod platform;
pub mod state;

pub use executor::LifecycleExecutor;
pub use interrupt::{Interrupt, InterruptLevel};
pub use lock::{BuildGuard, KeyedLock, LockMode};
pub use phase::{LifecyclePlan, PhaseFactory, PhaseSpec};
pub use platform::{negotiate, ApiVersion, SUPPORTED_PLATFORM_APIS};
pub use state::{BuildObserver, BuildState, LogObserver, RecordingObserver, StateTracker};
