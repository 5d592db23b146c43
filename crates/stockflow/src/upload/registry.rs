//! Maps destination kinds to uploader implementations.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::model::{Destination, DestinationKind, Photo, UploadOutcome};

use super::uploader::{UploadError, Uploader, UploaderInfo};

#[derive(Default)]
pub struct UploaderRegistry {
    uploaders: RwLock<HashMap<DestinationKind, Arc<dyn Uploader>>>,
}

impl UploaderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an uploader for a destination kind, replacing any
    /// previous registration.
    pub fn register(&self, kind: DestinationKind, uploader: Arc<dyn Uploader>) {
        if let Ok(mut uploaders) = self.uploaders.write() {
            uploaders.insert(kind, uploader);
        }
    }

    pub fn get(&self, kind: DestinationKind) -> Result<Arc<dyn Uploader>, UploadError> {
        self.uploaders
            .read()
            .ok()
            .and_then(|u| u.get(&kind).cloned())
            .ok_or_else(|| UploadError::UnknownKind(kind.as_str().to_string()))
    }

    /// Metadata for every registered uploader.
    pub fn available(&self) -> Vec<UploaderInfo> {
        self.uploaders
            .read()
            .map(|u| u.values().map(|up| up.info()).collect())
            .unwrap_or_default()
    }

    pub fn supported_kinds(&self) -> Vec<DestinationKind> {
        self.uploaders
            .read()
            .map(|u| u.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Validates the destination config and delivers one photo through
    /// the matching uploader.
    pub fn upload_photo(
        &self,
        photo: &Photo,
        destination: &Destination,
    ) -> Result<UploadOutcome, UploadError> {
        let uploader = self.get(destination.kind)?;
        uploader.validate(destination)?;
        uploader.upload(photo, destination)
    }

    /// Validates and probes a destination without transferring a photo.
    pub fn test_connection(&self, destination: &Destination) -> Result<(), UploadError> {
        let uploader = self.get(destination.kind)?;
        uploader.validate(destination)?;
        uploader.test_connection(destination)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Batch, Classification};

    struct StubUploader {
        kind: DestinationKind,
    }

    impl Uploader for StubUploader {
        fn info(&self) -> UploaderInfo {
            UploaderInfo {
                kind: self.kind,
                name: format!("{} uploader", self.kind.as_str()),
                description: String::new(),
            }
        }

        fn validate(&self, destination: &Destination) -> Result<(), UploadError> {
            if destination.connection.is_null() {
                return Err(UploadError::InvalidConfig("missing connection".to_string()));
            }
            Ok(())
        }

        fn test_connection(&self, _destination: &Destination) -> Result<(), UploadError> {
            Ok(())
        }

        fn upload(
            &self,
            _photo: &Photo,
            destination: &Destination,
        ) -> Result<UploadOutcome, UploadError> {
            Ok(UploadOutcome {
                success: true,
                message: format!("delivered to {}", destination.name),
                url: None,
            })
        }
    }

    fn sample_photo() -> Photo {
        let batch = Batch::new(Classification::Commercial, "d", "/in");
        Photo::new(&batch, "/in/a.jpg", 1)
    }

    #[test]
    fn test_get_unknown_kind() {
        let registry = UploaderRegistry::new();
        assert!(matches!(
            registry.get(DestinationKind::Ftp),
            Err(UploadError::UnknownKind(_))
        ));
    }

    #[test]
    fn test_register_and_upload() {
        let registry = UploaderRegistry::new();
        registry.register(
            DestinationKind::Ftp,
            Arc::new(StubUploader {
                kind: DestinationKind::Ftp,
            }),
        );

        let mut dest = Destination::new("alamy", DestinationKind::Ftp, vec![]);
        dest.connection = serde_json::json!({"host": "h"});
        let outcome = registry.upload_photo(&sample_photo(), &dest).unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.message, "delivered to alamy");
    }

    #[test]
    fn test_upload_validates_first() {
        let registry = UploaderRegistry::new();
        registry.register(
            DestinationKind::Ftp,
            Arc::new(StubUploader {
                kind: DestinationKind::Ftp,
            }),
        );

        // Null connection fails validation before any delivery attempt.
        let dest = Destination::new("alamy", DestinationKind::Ftp, vec![]);
        assert!(matches!(
            registry.upload_photo(&sample_photo(), &dest),
            Err(UploadError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_available_lists_registrations() {
        let registry = UploaderRegistry::new();
        registry.register(
            DestinationKind::Ftp,
            Arc::new(StubUploader {
                kind: DestinationKind::Ftp,
            }),
        );
        registry.register(
            DestinationKind::Api,
            Arc::new(StubUploader {
                kind: DestinationKind::Api,
            }),
        );

        let mut kinds = registry.supported_kinds();
        kinds.sort_by_key(|k| k.as_str());
        assert_eq!(kinds, vec![DestinationKind::Api, DestinationKind::Ftp]);
        assert_eq!(registry.available().len(), 2);
    }
}
