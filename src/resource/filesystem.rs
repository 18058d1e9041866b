use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use super::{ResourceResolver, ResourceStream};

/// Resolves resources relative to one base directory (absolute paths are used as-is)
#[derive(Debug, Clone)]
pub struct FilesystemResolver {
    base: PathBuf,
}

impl FilesystemResolver {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    fn locate(&self, path: &str) -> PathBuf {
        let p = Path::new(path);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.base.join(p)
        }
    }
}

impl ResourceResolver for FilesystemResolver {
    fn resolve(&self, path: &str) -> io::Result<Vec<ResourceStream>> {
        let file = self.locate(path);
        if !file.is_file() {
            return Ok(Vec::new());
        }
        Ok(vec![Box::new(File::open(file)?)])
    }

    fn describe(&self) -> String {
        format!("filesystem [{}]", self.base.display())
    }
}
