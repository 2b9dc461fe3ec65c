use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use tracing::debug;

/// The single external collaborator the core consumes: somewhere to read
/// class containers from. Implementations must answer consistently for the
/// same name during one transformer run and may be read concurrently.
pub trait ClassProvider: Send + Sync {
    fn get_class(&self, internal_name: &str) -> Option<Vec<u8>>;
}

/// Resolves internal names against a list of directory roots, the way a
/// class path does: `a/b/C` becomes `<root>/a/b/C.class`.
pub struct ClassPathProvider {
    roots: Vec<PathBuf>,
}

impl ClassPathProvider {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self { roots }
    }
}

impl ClassProvider for ClassPathProvider {
    fn get_class(&self, internal_name: &str) -> Option<Vec<u8>> {
        for root in self.roots.iter() {
            let path = root.join(format!("{}.class", internal_name));
            if path.exists() {
                debug!("resolved {} at {}", internal_name, path.display());
                return fs::read(path).ok();
            }
        }
        None
    }
}

/// Serves classes from an in-memory map. Build tools that already hold the
/// bytes use this, as do the tests.
#[derive(Default)]
pub struct MemoryProvider {
    classes: HashMap<String, Vec<u8>>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, internal_name: impl Into<String>, bytes: Vec<u8>) -> &mut Self {
        self.classes.insert(internal_name.into(), bytes);
        self
    }
}

impl ClassProvider for MemoryProvider {
    fn get_class(&self, internal_name: &str) -> Option<Vec<u8>> {
        self.classes.get(internal_name).cloned()
    }
}
