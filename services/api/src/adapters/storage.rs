//! services/api/src/adapters/storage.rs
//!
//! Stores uploaded documents on the local filesystem under
//! `<root>/users/<user>/sessions/<session>/<upload id>-<file name>`. The upload
//! id keeps two files with the same name in one session apart.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use study_session_core::domain::FileDescriptor;
use study_session_core::ports::{FileStorageService, PortError, PortResult, UploadedFile};
use tracing::info;
use uuid::Uuid;

#[derive(Clone)]
pub struct LocalFileStorage {
    root: PathBuf,
}

impl LocalFileStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

/// Keeps only the final path component and replaces anything unusual.
fn safe_file_name(name: &str) -> String {
    let base = Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("");
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.trim_matches('.').is_empty() {
        "document".to_string()
    } else {
        cleaned
    }
}

#[async_trait]
impl FileStorageService for LocalFileStorage {
    async fn upload(
        &self,
        user_id: Uuid,
        session_id: Uuid,
        file: &UploadedFile,
    ) -> PortResult<FileDescriptor> {
        let relative = PathBuf::from("users")
            .join(user_id.to_string())
            .join("sessions")
            .join(session_id.to_string());
        let dir = self.root.join(&relative);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let name = format!("{}-{}", Uuid::new_v4().simple(), safe_file_name(&file.file_name));
        tokio::fs::write(dir.join(&name), &file.data)
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        info!(
            "Stored {} ({} bytes) for session {}.",
            name,
            file.data.len(),
            session_id
        );

        Ok(FileDescriptor {
            file_name: file.file_name.clone(),
            storage_url: relative.join(&name).to_string_lossy().replace('\\', "/"),
            mime_type: file.mime_type.clone(),
            size: file.data.len() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn file_names_cannot_escape() {
        assert_eq!(safe_file_name("../../etc/passwd"), "passwd");
        assert_eq!(safe_file_name("my notes.pdf"), "my_notes.pdf");
        assert_eq!(safe_file_name(".."), "document");
    }

    fn pdf(name: &str, data: &'static [u8]) -> UploadedFile {
        UploadedFile {
            file_name: name.into(),
            mime_type: "application/pdf".into(),
            data: Bytes::from_static(data),
        }
    }

    #[tokio::test]
    async fn upload_writes_bytes_and_describes_them() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalFileStorage::new(dir.path());
        let (user, session) = (Uuid::new_v4(), Uuid::new_v4());

        let descriptor = storage.upload(user, session, &pdf("a.pdf", b"%PDF-1.7")).await.unwrap();
        assert_eq!(descriptor.size, 8);
        assert_eq!(descriptor.file_name, "a.pdf");
        let prefix = format!("users/{}/sessions/{}/", user, session);
        assert!(descriptor.storage_url.starts_with(&prefix));
        assert!(descriptor.storage_url.ends_with("-a.pdf"));
        let stored = std::fs::read(dir.path().join(&descriptor.storage_url)).unwrap();
        assert_eq!(stored, b"%PDF-1.7");
    }

    #[tokio::test]
    async fn same_named_uploads_do_not_overwrite_each_other() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalFileStorage::new(dir.path());
        let (user, session) = (Uuid::new_v4(), Uuid::new_v4());

        let first = storage.upload(user, session, &pdf("notes.pdf", b"first")).await.unwrap();
        let second = storage.upload(user, session, &pdf("notes.pdf", b"second")).await.unwrap();
        assert_ne!(first.storage_url, second.storage_url);
        assert_eq!(std::fs::read(dir.path().join(&first.storage_url)).unwrap(), b"first");
        assert_eq!(std::fs::read(dir.path().join(&second.storage_url)).unwrap(), b"second");
    }
}
