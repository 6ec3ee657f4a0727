//! Byte sources for tile content: local files, HTTP, and in-memory maps.

use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::Duration;

use crate::error::FetchError;
use crate::resource::strip_query;

/// Fetches the raw bytes of one resource. Called from worker threads.
pub trait ByteFetcher: Send + Sync {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

/// Reads resources from the local filesystem.
///
/// Relative paths resolve against `base_dir`; query strings are ignored.
#[derive(Clone, Debug, Default)]
pub struct FileFetcher {
    base_dir: PathBuf,
}

impl FileFetcher {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn path_for(&self, url: &str) -> PathBuf {
        let path = strip_query(url);
        let path = path.strip_prefix("file://").unwrap_or(path);
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }
}

impl ByteFetcher for FileFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let path = self.path_for(url);
        std::fs::read(&path).map_err(|source| FetchError::Io {
            path: path.display().to_string(),
            source,
        })
    }
}

/// Blocking HTTP(S) fetcher.
pub struct HttpFetcher {
    agent: ureq::Agent,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl ByteFetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self.agent.get(url).call().map_err(|e| match e {
            ureq::Error::Status(status, _) => FetchError::Status {
                url: url.to_string(),
                status,
            },
            ureq::Error::Transport(transport) => FetchError::Transport {
                url: url.to_string(),
                message: transport.to_string(),
            },
        })?;

        let mut bytes = Vec::new();
        response
            .into_reader()
            .read_to_end(&mut bytes)
            .map_err(|e| FetchError::Transport {
                url: url.to_string(),
                message: e.to_string(),
            })?;
        Ok(bytes)
    }
}

/// Serves resources from memory, keyed by URL without its query string.
#[derive(Debug, Default)]
pub struct MemoryFetcher {
    resources: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, url: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        if let Ok(mut resources) = self.resources.write() {
            resources.insert(url.into(), bytes.into());
        }
    }

    pub fn remove(&self, url: &str) {
        if let Ok(mut resources) = self.resources.write() {
            resources.remove(url);
        }
    }
}

impl ByteFetcher for MemoryFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let resources = self
            .resources
            .read()
            .map_err(|_| FetchError::NotFound(url.to_string()))?;
        resources
            .get(strip_query(url))
            .cloned()
            .ok_or_else(|| FetchError::NotFound(url.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Files resolve against the base directory and ignore query strings.
    #[test]
    fn test_file_fetcher_reads_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("tiles")).unwrap();
        std::fs::write(dir.path().join("tiles/0.b3dm"), b"b3dm").unwrap();

        let fetcher = FileFetcher::new(dir.path());
        let bytes = fetcher.fetch("tiles/0.b3dm?expired=2020-01-01T00%3A00%3A00Z").unwrap();
        assert_eq!(bytes, b"b3dm");
    }

    /// Missing files report the resolved path.
    #[test]
    fn test_file_fetcher_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = FileFetcher::new(dir.path());
        match fetcher.fetch("nope.b3dm") {
            Err(FetchError::Io { path, .. }) => assert!(path.ends_with("nope.b3dm")),
            other => panic!("expected Io error, got {other:?}"),
        }
    }

    /// The memory fetcher serves inserted payloads.
    #[test]
    fn test_memory_fetcher() {
        let fetcher = MemoryFetcher::new();
        fetcher.insert("a.pnts", b"pnts".to_vec());
        assert_eq!(fetcher.fetch("a.pnts?x=1").unwrap(), b"pnts");
        fetcher.remove("a.pnts");
        assert!(matches!(fetcher.fetch("a.pnts"), Err(FetchError::NotFound(_))));
    }
}
