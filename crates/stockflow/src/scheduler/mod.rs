pub mod batch;
pub mod job;
pub mod recovery;

pub use batch::BatchScheduler;
pub use job::{PhotoProgress, PhotoWorkState, ProcessingJob, QueueEntry};
pub use recovery::{reconcile, RecoveryReport};
