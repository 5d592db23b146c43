pub mod broadcast;
pub mod config;
pub mod db;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod retry;
pub mod scheduler;
pub mod upload;

pub use broadcast::{EventBroadcaster, EventRecorder};
pub use config::AppConfig;
pub use error::{ConfigError, DispatchError, Result, SchedulerError, StockflowError};
pub use pipeline::{Annotator, MetadataEmbedder, PhotoPipeline, PhotoPreparer};
pub use retry::{Classify, ErrorKind, RetryPolicy};
pub use scheduler::{reconcile, BatchScheduler, RecoveryReport};
pub use upload::{UploadScheduler, Uploader, UploaderRegistry};
