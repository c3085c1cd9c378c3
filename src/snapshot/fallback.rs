use axum::body::Bytes;
use std::io;
use std::path::{Path, PathBuf};

/// The last-known-good snapshot kept on local disk.
///
/// Written out-of-band by the station collector; this side only reads it.
#[derive(Clone, Debug)]
pub struct FallbackFile {
    path: PathBuf,
}

impl FallbackFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn read(&self) -> io::Result<Bytes> {
        let contents = tokio::fs::read(&self.path).await?;
        Ok(Bytes::from(contents))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_read_returns_file_verbatim() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(br#"{"outTemp":{"value":10.0}}"#).unwrap();

        let fallback = FallbackFile::new(file.path());
        let payload = fallback.read().await.unwrap();

        assert_eq!(payload, Bytes::from_static(br#"{"outTemp":{"value":10.0}}"#));
    }

    #[tokio::test]
    async fn test_empty_file_is_not_an_error() {
        let file = tempfile::NamedTempFile::new().unwrap();

        let payload = FallbackFile::new(file.path()).read().await.unwrap();
        assert!(payload.is_empty());
    }

    #[tokio::test]
    async fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let fallback = FallbackFile::new(dir.path().join("current_weather.json"));

        let err = fallback.read().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
