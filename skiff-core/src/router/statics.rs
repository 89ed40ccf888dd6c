//! Mapping request paths onto a static file directory

use crate::error::{ConfigError, Result};
use std::path::{Component, Path, PathBuf};
use tokio::fs;

/// File served for a directory request
pub const DEFAULT_INDEX: &str = "index.html";

/// Outcome of mapping a request path onto the mount
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StaticLookup {
    /// The request path is outside the mount prefix
    Unmatched,
    /// The path tried to leave the root directory
    Forbidden,
    /// No such file
    NotFound,
    /// A regular file inside the root
    File(PathBuf),
}

/// A directory served under a URL prefix
#[derive(Debug, Clone)]
pub struct StaticMount {
    prefix: String,
    root: PathBuf,
    index: String,
}

impl StaticMount {
    /// Mount `dir` under `prefix`. Fails unless `dir` is an existing directory.
    pub fn new(prefix: &str, dir: impl AsRef<Path>) -> Result<Self> {
        if prefix.is_empty() {
            return Err(ConfigError::MissingField {
                field: "static prefix".into(),
            }
            .into());
        }
        let dir = dir.as_ref();
        if dir.as_os_str().is_empty() {
            return Err(ConfigError::MissingField {
                field: "static path".into(),
            }
            .into());
        }

        let root = dir.canonicalize().map_err(|e| ConfigError::InvalidValue {
            field: "static path".into(),
            value: format!("{}: {e}", dir.display()),
        })?;
        if !root.is_dir() {
            return Err(ConfigError::InvalidValue {
                field: "static path".into(),
                value: format!("{} is not a directory", root.display()),
            }
            .into());
        }

        Ok(Self {
            prefix: format!("/{}", prefix.trim_matches('/')),
            root,
            index: DEFAULT_INDEX.to_string(),
        })
    }

    /// URL prefix, always starting with `/`
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Canonical root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Index file name
    pub fn index(&self) -> &str {
        &self.index
    }

    fn strip<'a>(&self, request_path: &'a str) -> Option<&'a str> {
        if self.prefix == "/" {
            return Some(request_path);
        }
        let rest = request_path.strip_prefix(self.prefix.as_str())?;
        (rest.is_empty() || rest.starts_with('/')).then_some(rest)
    }

    /// Map a request path to a file under the root
    pub async fn lookup(&self, request_path: &str) -> StaticLookup {
        let Some(rest) = self.strip(request_path) else {
            return StaticLookup::Unmatched;
        };
        let relative = rest.trim_start_matches('/');

        for component in Path::new(relative).components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                _ => return StaticLookup::Forbidden,
            }
        }

        let mut path = self.root.join(relative);
        if fs::metadata(&path).await.is_ok_and(|m| m.is_dir()) {
            path.push(&self.index);
        }

        let Ok(canonical) = fs::canonicalize(&path).await else {
            return StaticLookup::NotFound;
        };
        if !canonical.starts_with(&self.root) {
            return StaticLookup::Forbidden;
        }
        match fs::metadata(&canonical).await {
            Ok(meta) if meta.is_file() => StaticLookup::File(canonical),
            _ => StaticLookup::NotFound,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> (tempfile::TempDir, StaticMount) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "<h1>home</h1>").unwrap();
        std::fs::create_dir(dir.path().join("css")).unwrap();
        std::fs::write(dir.path().join("css/site.css"), "body{}").unwrap();
        let mount = StaticMount::new("/static", dir.path()).unwrap();
        (dir, mount)
    }

    #[test]
    fn test_rejects_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("file.txt");
        std::fs::write(&file, "x").unwrap();

        assert!(StaticMount::new("/s", dir.path().join("nope")).is_err());
        assert!(StaticMount::new("/s", &file).is_err());
        assert!(StaticMount::new("", dir.path()).is_err());
    }

    #[tokio::test]
    async fn test_lookup_files_and_index() {
        let (_dir, mount) = fixture();

        assert!(matches!(mount.lookup("/static/css/site.css").await, StaticLookup::File(p) if p.ends_with("site.css")));
        assert!(matches!(mount.lookup("/static").await, StaticLookup::File(p) if p.ends_with("index.html")));
        assert!(matches!(mount.lookup("/static/").await, StaticLookup::File(p) if p.ends_with("index.html")));
        assert_eq!(mount.lookup("/static/missing.js").await, StaticLookup::NotFound);
        assert_eq!(mount.lookup("/staticky").await, StaticLookup::Unmatched);
        assert_eq!(mount.lookup("/api/users").await, StaticLookup::Unmatched);
    }

    #[tokio::test]
    async fn test_traversal_forbidden() {
        let (_dir, mount) = fixture();
        assert_eq!(mount.lookup("/static/../secret").await, StaticLookup::Forbidden);
        assert_eq!(mount.lookup("/static/css/../../etc/passwd").await, StaticLookup::Forbidden);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_out_of_root_forbidden() {
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("secret.txt"), "x").unwrap();
        let (dir, mount) = fixture();
        std::os::unix::fs::symlink(outside.path().join("secret.txt"), dir.path().join("leak.txt")).unwrap();

        assert_eq!(mount.lookup("/static/leak.txt").await, StaticLookup::Forbidden);
    }

    #[tokio::test]
    async fn test_concurrent_lookups() {
        let (_dir, mount) = fixture();
        let mount = std::sync::Arc::new(mount);
        let lookups: Vec<_> = (0..8)
            .map(|_| {
                let mount = std::sync::Arc::clone(&mount);
                tokio::spawn(async move { mount.lookup("/static/css/site.css").await })
            })
            .collect();
        for lookup in lookups {
            assert!(matches!(lookup.await.unwrap(), StaticLookup::File(_)));
        }
    }
}
