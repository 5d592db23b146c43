pub mod registry;
pub mod scheduler;
pub mod uploader;

pub use registry::UploaderRegistry;
pub use scheduler::{ActiveUpload, UploadQueueStatus, UploadScheduler};
pub use uploader::{UploadError, Uploader, UploaderInfo};
