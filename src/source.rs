//! Document source resolution.
//!
//! A locator names where the bytes of a document come from:
//!
//! | Locator | Resolved as |
//! |---------|-------------|
//! | `https://host/path/file.pdf` | HTTP GET (404/410 mean not found) |
//! | `file:///abs/path/file.pdf` | local file |
//! | `classpath:/docs/file.pdf` | file under `[ingest].resource_dir` |
//! | `./path/file.pdf` | local file |
//!
//! `classpath:` locators must stay inside the resource directory. Raw paths
//! and `file://` locators can be turned off with [`SourceResolver::with_local_paths`].
//!
//! The bytes are read once; the caller hashes and extracts the same buffer.

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("resource not found: {0}")]
    NotFound(String),
    #[error("failed to read {locator}: {source}")]
    Io {
        locator: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to fetch {locator}: {message}")]
    Http { locator: String, message: String },
    #[error("unsupported locator: {0}")]
    Unsupported(String),
    #[error("locator not permitted: {0}")]
    Forbidden(String),
}

/// A fetched document.
#[derive(Debug, Clone)]
pub struct Resource {
    pub locator: String,
    /// Last path segment of the locator; stored as the `source` metadata.
    pub filename: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct SourceResolver {
    resource_dir: PathBuf,
    http: reqwest::Client,
    allow_local_paths: bool,
}

impl SourceResolver {
    pub fn new(resource_dir: impl Into<PathBuf>, timeout_secs: u64) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            resource_dir: resource_dir.into(),
            http,
            allow_local_paths: true,
        })
    }

    /// Whether raw paths and `file://` locators may be read.
    pub fn with_local_paths(mut self, allow: bool) -> Self {
        self.allow_local_paths = allow;
        self
    }

    pub async fn fetch(&self, locator: &str) -> Result<Resource, SourceError> {
        let locator = locator.trim();
        if locator.is_empty() {
            return Err(SourceError::Unsupported("empty locator".to_string()));
        }

        let bytes = if locator.starts_with("http://") || locator.starts_with("https://") {
            self.fetch_http(locator).await?
        } else if let Some(rest) = locator.strip_prefix("classpath:") {
            let path = self.classpath(locator, rest).await?;
            read_file(locator, &path).await?
        } else {
            let path = self.local_path(locator)?;
            read_file(locator, &path).await?
        };

        Ok(Resource {
            locator: locator.to_string(),
            filename: filename_of(locator),
            bytes,
        })
    }

    /// Resolve a `classpath:` locator, refusing anything outside `resource_dir`.
    async fn classpath(&self, locator: &str, rest: &str) -> Result<PathBuf, SourceError> {
        let relative = Path::new(rest.trim_start_matches(['/', '\\']));
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(SourceError::Forbidden(locator.to_string()));
        }
        let path = self.resource_dir.join(relative);

        // Symlinks inside the resource directory may still point elsewhere.
        if let (Ok(root), Ok(target)) = (
            tokio::fs::canonicalize(&self.resource_dir).await,
            tokio::fs::canonicalize(&path).await,
        ) {
            if !target.starts_with(&root) {
                return Err(SourceError::Forbidden(locator.to_string()));
            }
        }
        Ok(path)
    }

    fn local_path(&self, locator: &str) -> Result<PathBuf, SourceError> {
        if locator.contains("://") && !locator.starts_with("file://") {
            return Err(SourceError::Unsupported(locator.to_string()));
        }
        if !self.allow_local_paths {
            return Err(SourceError::Forbidden(locator.to_string()));
        }
        let path = locator.strip_prefix("file://").unwrap_or(locator);
        Ok(PathBuf::from(path))
    }

    async fn fetch_http(&self, locator: &str) -> Result<Vec<u8>, SourceError> {
        let http_err = |message: String| SourceError::Http {
            locator: locator.to_string(),
            message,
        };
        let response = self
            .http
            .get(locator)
            .send()
            .await
            .map_err(|e| http_err(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND || status == reqwest::StatusCode::GONE {
            return Err(SourceError::NotFound(locator.to_string()));
        }
        if !status.is_success() {
            return Err(http_err(format!("HTTP {}", status)));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| http_err(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

async fn read_file(locator: &str, path: &Path) -> Result<Vec<u8>, SourceError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(SourceError::NotFound(locator.to_string()))
        }
        Err(e) if path.is_dir() => Err(SourceError::Io {
            locator: locator.to_string(),
            source: std::io::Error::new(e.kind(), "locator points to a directory"),
        }),
        Err(source) => Err(SourceError::Io {
            locator: locator.to_string(),
            source,
        }),
    }
}

/// Last path segment of a locator, without query string or fragment.
pub fn filename_of(locator: &str) -> String {
    let path = locator
        .split(['?', '#'])
        .next()
        .unwrap_or(locator)
        .trim_end_matches(['/', '\\']);
    path.rsplit(['/', '\\'])
        .next()
        .filter(|s| !s.is_empty() && !s.ends_with(':'))
        .unwrap_or(path)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn resolver(dir: &Path) -> SourceResolver {
        SourceResolver::new(dir, 5).unwrap()
    }

    #[test]
    fn filename_is_last_segment() {
        assert_eq!(filename_of("https://example.com/docs/cv.pdf?dl=1"), "cv.pdf");
        assert_eq!(filename_of("classpath:/pdf/Resume.pdf"), "Resume.pdf");
        assert_eq!(filename_of("file:///tmp/a/b.txt"), "b.txt");
        assert_eq!(filename_of("notes.md"), "notes.md");
        assert_eq!(filename_of(r"C:\docs\brief.docx"), "brief.docx");
    }

    #[tokio::test]
    async fn reads_plain_file_and_classpath_paths() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("pdf")).unwrap();
        std::fs::write(dir.path().join("pdf/a.txt"), b"hello").unwrap();

        let r = resolver(dir.path());
        let by_classpath = r.fetch("classpath:/pdf/a.txt").await.unwrap();
        assert_eq!(by_classpath.bytes, b"hello");
        assert_eq!(by_classpath.filename, "a.txt");

        let plain = dir.path().join("pdf/a.txt");
        let by_path = r.fetch(plain.to_str().unwrap()).await.unwrap();
        assert_eq!(by_path.bytes, b"hello");

        let url = format!("file://{}", plain.display());
        assert_eq!(r.fetch(&url).await.unwrap().bytes, b"hello");
    }

    #[tokio::test]
    async fn missing_resources_are_not_found() {
        let dir = TempDir::new().unwrap();
        let r = resolver(dir.path());
        assert!(matches!(
            r.fetch("classpath:/nope.pdf").await,
            Err(SourceError::NotFound(_))
        ));
        assert!(matches!(
            r.fetch("/definitely/not/here.pdf").await,
            Err(SourceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn unknown_schemes_and_empty_locators_are_rejected() {
        let dir = TempDir::new().unwrap();
        let r = resolver(dir.path());
        assert!(matches!(r.fetch("s3://bucket/key").await, Err(SourceError::Unsupported(_))));
        assert!(matches!(r.fetch("  ").await, Err(SourceError::Unsupported(_))));
    }

    #[tokio::test]
    async fn classpath_cannot_leave_resource_dir() {
        let outer = TempDir::new().unwrap();
        let resources = outer.path().join("resources");
        std::fs::create_dir_all(&resources).unwrap();
        std::fs::write(outer.path().join("secret.txt"), b"host file").unwrap();

        let r = resolver(&resources);
        for locator in [
            "classpath:/../secret.txt",
            "classpath:../secret.txt",
            "classpath:/docs/../../secret.txt",
        ] {
            assert!(
                matches!(r.fetch(locator).await, Err(SourceError::Forbidden(_))),
                "{locator}"
            );
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn classpath_symlink_out_of_resource_dir_is_forbidden() {
        let outer = TempDir::new().unwrap();
        let resources = outer.path().join("resources");
        std::fs::create_dir_all(&resources).unwrap();
        std::fs::write(outer.path().join("secret.txt"), b"host file").unwrap();
        std::os::unix::fs::symlink(outer.path().join("secret.txt"), resources.join("link.txt"))
            .unwrap();

        let r = resolver(&resources);
        assert!(matches!(
            r.fetch("classpath:/link.txt").await,
            Err(SourceError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn local_paths_can_be_disabled() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, b"hello").unwrap();

        let r = resolver(dir.path()).with_local_paths(false);
        assert!(matches!(
            r.fetch(file.to_str().unwrap()).await,
            Err(SourceError::Forbidden(_))
        ));
        let url = format!("file://{}", file.display());
        assert!(matches!(r.fetch(&url).await, Err(SourceError::Forbidden(_))));
        assert_eq!(r.fetch("classpath:/a.txt").await.unwrap().bytes, b"hello");
    }
}
