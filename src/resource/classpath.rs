use std::fs::File;
use std::io;
use std::path::PathBuf;

use tracing::debug;

use super::{normalize_path, ResourceResolver, ResourceStream};

/// Resolves resources against an ordered list of search roots
///
/// Mirrors a class path made of resource directories: a path present under several
/// roots resolves once per root, in root order.
#[derive(Debug, Clone)]
pub struct ClasspathResolver {
    roots: Vec<PathBuf>,
}

impl ClasspathResolver {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self { roots }
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }
}

impl ResourceResolver for ClasspathResolver {
    fn resolve(&self, path: &str) -> io::Result<Vec<ResourceStream>> {
        let relative = normalize_path(path);
        let mut streams: Vec<ResourceStream> = Vec::new();

        for root in &self.roots {
            let candidate = root.join(relative);
            if !candidate.is_file() {
                continue;
            }
            debug!("resolved [{}] in [{}]", path, root.display());
            streams.push(Box::new(File::open(&candidate)?));
        }

        Ok(streams)
    }

    fn describe(&self) -> String {
        let roots: Vec<String> = self
            .roots
            .iter()
            .map(|r| r.display().to_string())
            .collect();
        format!("classpath [{}]", roots.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn test_resolves_once_per_root() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        std::fs::write(first.path().join("a.sql"), "first").unwrap();
        std::fs::write(second.path().join("a.sql"), "second").unwrap();
        std::fs::write(second.path().join("b.sql"), "only").unwrap();

        let resolver = ClasspathResolver::new(vec![
            first.path().to_path_buf(),
            second.path().to_path_buf(),
        ]);

        let streams = resolver.resolve("a.sql").unwrap();
        assert_eq!(streams.len(), 2);

        let mut content = String::new();
        resolver
            .resolve_first("/a.sql")
            .unwrap()
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "first");

        assert_eq!(resolver.resolve("b.sql").unwrap().len(), 1);
        assert!(resolver.resolve("missing.sql").unwrap().is_empty());
    }

    #[test]
    fn test_directories_are_not_resources() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir(root.path().join("db")).unwrap();

        let resolver = ClasspathResolver::new(vec![root.path().to_path_buf()]);
        assert!(resolver.resolve("db").unwrap().is_empty());
    }
}
