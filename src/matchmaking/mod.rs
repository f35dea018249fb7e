//! Matchmaking core
//!
//! Requests are classified into (difficulty, duration) buckets, wait in a
//! skill-ordered queue per bucket, and are paired by a periodic greedy sweep.
//! All of it runs behind the engine coordinator's single control loop.

pub mod bucket;
pub mod compatibility;
pub mod coordinator;
pub mod engine;
pub mod queue;
pub mod scheduler;

// Re-export commonly used types
pub use bucket::{BucketCodec, BucketKey};
pub use compatibility::{CompatibilityConfig, CompatibilityRule, TimeDecayRule};
pub use coordinator::{EngineCoordinator, EngineHandle, EngineRuntime};
pub use engine::{BucketStats, EngineStats, MatchEngine};
pub use queue::{QueueManager, WaitingQueue};
pub use scheduler::{MatchScheduler, SweepOutcome};
