//! Resource resolution
//!
//! A [`ResourceResolver`] turns a logical resource path (a changelog, an included
//! changelog, a properties file) into zero or more readable streams.
//!
//! - [`ClasspathResolver`]: ordered search roots; every root holding the path yields a
//!   stream, so the same path can resolve more than once
//! - [`FilesystemResolver`]: a single base directory
//! - [`DeduplicatingResolver`]: wraps another resolver and never returns more than one
//!   stream per path

mod classpath;
mod dedup;
mod filesystem;

use std::io::{self, Read};

pub use classpath::ClasspathResolver;
pub use dedup::DeduplicatingResolver;
pub use filesystem::FilesystemResolver;

/// Readable resource handle
pub type ResourceStream = Box<dyn Read + Send>;

/// Resolves a named resource path to byte streams
pub trait ResourceResolver: Send + Sync {
    /// All streams found for `path`, in resolution order
    fn resolve(&self, path: &str) -> io::Result<Vec<ResourceStream>>;

    /// Short human-readable description used in log lines
    fn describe(&self) -> String;

    /// First stream found for `path`, if any
    fn resolve_first(&self, path: &str) -> io::Result<Option<ResourceStream>> {
        Ok(self.resolve(path)?.into_iter().next())
    }
}

/// Strip the leading slash and `classpath:` prefix a resource path may carry
pub(crate) fn normalize_path(path: &str) -> &str {
    let path = path.strip_prefix("classpath:").unwrap_or(path);
    path.trim_start_matches('/')
}
