pub mod collaborators;
pub mod error;
pub mod progress;
pub mod runner;

pub use collaborators::{
    Annotator, CollaboratorError, MetadataEmbedder, PhotoPreparer, PreparedPhoto,
};
pub use error::{PipelineError, PipelineWarning};
pub use progress::{NoopProgress, ProgressEvent, ProgressReporter, RecorderProgress};
pub use runner::{PhotoOutcome, PhotoPipeline};
