use std::io;

use tracing::debug;

use super::{ResourceResolver, ResourceStream};

/// Collapses duplicate matches to a single stream
///
/// When the inner resolver finds the same path more than once (a resource packaged in
/// several roots), only the first stream is returned and the rest are dropped. Which
/// copy wins depends on the inner resolver's order; callers must not rely on it.
#[derive(Debug, Clone)]
pub struct DeduplicatingResolver<R> {
    inner: R,
}

impl<R: ResourceResolver> DeduplicatingResolver<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }
}

impl<R: ResourceResolver> ResourceResolver for DeduplicatingResolver<R> {
    fn resolve(&self, path: &str) -> io::Result<Vec<ResourceStream>> {
        let mut streams = self.inner.resolve(path)?;
        if streams.len() > 1 {
            debug!(
                "[{}] matched {} times, keeping the first match",
                path,
                streams.len()
            );
            streams.truncate(1);
        }
        Ok(streams)
    }

    fn describe(&self) -> String {
        self.inner.describe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    struct Fixed(usize);

    impl ResourceResolver for Fixed {
        fn resolve(&self, _path: &str) -> io::Result<Vec<ResourceStream>> {
            Ok((0..self.0)
                .map(|i| Box::new(Cursor::new(vec![i as u8])) as ResourceStream)
                .collect())
        }

        fn describe(&self) -> String {
            "fixed".to_string()
        }
    }

    #[test]
    fn test_collapses_to_one() {
        for n in 2..6 {
            let resolver = DeduplicatingResolver::new(Fixed(n));
            assert_eq!(resolver.resolve("x").unwrap().len(), 1);
            assert_eq!(resolver.resolve("x").unwrap().len(), 1);
        }
    }

    #[test]
    fn test_keeps_zero_and_one() {
        assert!(DeduplicatingResolver::new(Fixed(0))
            .resolve("x")
            .unwrap()
            .is_empty());
        assert_eq!(
            DeduplicatingResolver::new(Fixed(1))
                .resolve("x")
                .unwrap()
                .len(),
            1
        );
    }
}
