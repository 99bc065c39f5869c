//! Work-stealing task scheduler.
//!
//! Workers `give` runnable tasks and `take` the next one to run through a
//! [`Driver`]. Each worker owns a container (a deque, or one deque per
//! priority level); idle workers steal from the old end of other workers'
//! containers. Tasks that share an affinity key are kept together in an
//! affinity group that one worker drains at a time.

pub mod arena;
pub mod container;
pub mod context;
pub mod deque;
pub mod driver;
pub mod idle;
pub mod metrics;
pub mod resolver;
pub mod runlevel;
pub mod types;

pub use container::{AffinityGroup, AffinityState, Container, Giver, Placement, PriorityLevels, RootArray, Source, StealCursor, Taken};
pub use context::{ContextStats, SchedContext};
pub use deque::{Steal, WorkDeque};
pub use driver::Driver;
pub use idle::{IdleNotifier, ParkingNotifier};
pub use metrics::SchedulerMetrics;
pub use resolver::{MapResolver, TaskResolver, TaskState};
pub use runlevel::{Direction, RunLevel, RunlevelManager, RunlevelParticipant};
pub use types::{Count, CountScope, End, SchedulerConfig};
