use std::path::{Component, Path, PathBuf};

use tracing::debug;
use wt_relay::handler::request_path;
use wt_relay::{HandlerRegistry, HandlerResolver, ResolveError, SessionHandler};

use crate::handlers;

/// Resolves a CONNECT path to a file under the document root. The file must
/// exist; its stem (`echo.py` gives `echo`) picks the handler.
#[derive(Debug)]
pub struct DocRootResolver {
    doc_root: PathBuf,
    handlers: HandlerRegistry,
}

impl DocRootResolver {
    pub fn new(doc_root: impl Into<PathBuf>) -> Self {
        Self::with_handlers(doc_root, handlers::builtin())
    }

    pub fn with_handlers(doc_root: impl Into<PathBuf>, handlers: HandlerRegistry) -> Self {
        Self {
            doc_root: doc_root.into(),
            handlers,
        }
    }

    pub fn doc_root(&self) -> &Path {
        &self.doc_root
    }

    /// The file a request path names. Dot segments are resolved before
    /// joining, so the result stays under the document root.
    pub fn file_for(&self, path: &str) -> Option<PathBuf> {
        let normalized = request_path(path)?;
        let relative = Path::new(normalized.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return None;
        }
        Some(self.doc_root.join(relative))
    }
}

impl HandlerResolver for DocRootResolver {
    fn resolve(&self, path: &str) -> Result<Box<dyn SessionHandler>, ResolveError> {
        let not_found = || ResolveError::NotFound(path.to_owned());
        let file = self.file_for(path).ok_or_else(not_found)?;
        if !file.is_file() {
            debug!(file = %file.display(), "handler file missing");
            return Err(not_found());
        }
        let stem = file
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(not_found)?;
        self.handlers.create(stem).ok_or_else(not_found)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn doc_root(name: &str) -> PathBuf {
        let dir = std::env::temp_dir()
            .join(format!("wt-server-{name}-{}", std::process::id()))
            .join("webtransport/handlers");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("echo.py"), "").unwrap();
        fs::write(dir.join("unknown.py"), "").unwrap();
        dir.parent().unwrap().parent().unwrap().to_owned()
    }

    #[test]
    fn existing_file_with_builtin_stem_resolves() {
        let resolver = DocRootResolver::new(doc_root("resolve"));
        assert!(resolver
            .resolve("/webtransport/handlers/echo.py?x=1")
            .is_ok());
    }

    #[test]
    fn missing_file_or_unknown_stem_is_not_found() {
        let resolver = DocRootResolver::new(doc_root("missing"));
        for path in [
            "/webtransport/handlers/custom-response.py",
            "/webtransport/handlers/unknown.py",
            "/webtransport/handlers",
        ] {
            assert_eq!(
                resolver.resolve(path).err(),
                Some(ResolveError::NotFound(path.to_owned())),
                "{path}"
            );
        }
    }

    #[test]
    fn paths_cannot_escape_the_root() {
        let resolver = DocRootResolver::new("/srv/wpt");
        assert_eq!(
            resolver.file_for("/../etc/passwd"),
            Some(PathBuf::from("/srv/wpt/etc/passwd"))
        );
        assert_eq!(
            resolver.file_for("/a/./b.py?q"),
            Some(PathBuf::from("/srv/wpt/a/b.py"))
        );
        assert_eq!(
            resolver.file_for("/a/%2e%2e/%2e%2e/x.py"),
            Some(PathBuf::from("/srv/wpt/x.py"))
        );
    }
}
