use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;

use super::{image_mime_type, ImageData, ObjectStore, ObjectStoreError};
use crate::job::ImageRef;

/// Reads uploaded images from a directory tree.
///
/// References are either relative to the root or absolute paths inside it.
/// Anything that would leave the root (`..`, another absolute prefix, a URL)
/// is refused without touching the disk.
pub struct FilesystemObjectStore {
    root: PathBuf,
}

impl FilesystemObjectStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, image: &ImageRef) -> Result<PathBuf, ObjectStoreError> {
        let outside = || ObjectStoreError::OutsideRoot(image.to_string());
        let raw = image.as_str();
        if raw.contains("://") {
            return Err(outside());
        }

        let path = Path::new(raw);
        if path
            .components()
            .any(|c| matches!(c, Component::ParentDir))
        {
            return Err(outside());
        }

        // session prefixes already start with the root
        if path.starts_with(&self.root) {
            Ok(path.to_path_buf())
        } else if path.is_absolute() {
            Err(outside())
        } else {
            Ok(self.root.join(path))
        }
    }
}

#[async_trait]
impl ObjectStore for FilesystemObjectStore {
    async fn fetch(&self, image: &ImageRef) -> Result<ImageData, ObjectStoreError> {
        let path = self.resolve(image)?;
        let mime_type = image_mime_type(image).ok_or_else(|| ObjectStoreError::UnsupportedMedia {
            reference: image.to_string(),
            mime_type: mime_guess::from_path(&path)
                .first_or_octet_stream()
                .essence_str()
                .to_string(),
        })?;

        let bytes = tokio::fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ObjectStoreError::NotFound(image.to_string())
            } else {
                ObjectStoreError::Io {
                    reference: image.to_string(),
                    source: e,
                }
            }
        })?;

        Ok(ImageData { bytes, mime_type })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> (tempfile::TempDir, FilesystemObjectStore) {
        let dir = tempfile::tempdir().unwrap();
        let batch = dir.path().join("owner").join("token");
        std::fs::create_dir_all(&batch).unwrap();
        std::fs::write(batch.join("0001.png"), b"\x89PNG").unwrap();
        std::fs::write(batch.join("readme.txt"), b"text").unwrap();
        let store = FilesystemObjectStore::new(dir.path());
        (dir, store)
    }

    #[tokio::test]
    async fn test_fetch_relative_reference() {
        let (_dir, store) = fixture();
        let data = store.fetch(&"owner/token/0001.png".into()).await.unwrap();
        assert_eq!(data.bytes, b"\x89PNG");
        assert_eq!(data.mime_type, "image/png");
    }

    #[tokio::test]
    async fn test_fetch_absolute_reference_inside_root() {
        let (dir, store) = fixture();
        let absolute = dir.path().join("owner/token/0001.png");
        let image = ImageRef::new(absolute.to_string_lossy().into_owned());
        assert!(store.fetch(&image).await.is_ok());
    }

    #[test]
    fn test_prefixed_reference_under_relative_root() {
        let store = FilesystemObjectStore::new("uploads");
        assert_eq!(
            store.resolve(&"uploads/owner/token/1.png".into()).unwrap(),
            PathBuf::from("uploads/owner/token/1.png")
        );
        assert_eq!(
            store.resolve(&"owner/token/1.png".into()).unwrap(),
            PathBuf::from("uploads/owner/token/1.png")
        );
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let (_dir, store) = fixture();
        assert!(matches!(
            store.fetch(&"owner/token/0002.png".into()).await,
            Err(ObjectStoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_non_image_is_unsupported() {
        let (_dir, store) = fixture();
        assert!(matches!(
            store.fetch(&"owner/token/readme.txt".into()).await,
            Err(ObjectStoreError::UnsupportedMedia { .. })
        ));
    }

    #[tokio::test]
    async fn test_escapes_are_refused() {
        let (_dir, store) = fixture();
        for reference in [
            "../secret.png",
            "owner/../../etc/passwd.png",
            "/etc/shadow.png",
            "https://example.com/a.png",
        ] {
            assert!(
                matches!(
                    store.fetch(&reference.into()).await,
                    Err(ObjectStoreError::OutsideRoot(_))
                ),
                "{} should be refused",
                reference
            );
        }
    }
}
