//! Assembly resolution by simple name.
//!
//! Unity installs keep every managed dependency flat in `Managed/`, so resolution is a
//! straight filename probe across the configured search directories, with loaded
//! images cached by simple name.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use log::debug;

use crate::{image::AssemblyImage, Error::UnresolvedAssembly, Result};

/// Resolves and caches assemblies by simple name.
pub struct AssemblyResolver {
    search_dirs: Vec<PathBuf>,
    cache: HashMap<String, AssemblyImage>,
}

impl AssemblyResolver {
    /// Create a resolver probing `search_dirs` in order.
    #[must_use]
    pub fn new(search_dirs: Vec<PathBuf>) -> AssemblyResolver {
        AssemblyResolver {
            search_dirs,
            cache: HashMap::new(),
        }
    }

    /// Add a directory to the end of the probe list.
    pub fn add_search_dir(&mut self, dir: &Path) {
        self.search_dirs.push(dir.to_path_buf());
    }

    /// Resolve `name` to a loaded image, probing `<dir>/<name>.dll` then
    /// `<dir>/<name>.exe` across the search directories.
    ///
    /// # Errors
    /// Returns [`crate::Error::UnresolvedAssembly`] when no candidate file exists, or
    /// a parse error if a candidate exists but cannot be loaded.
    pub fn resolve(&mut self, name: &str) -> Result<&AssemblyImage> {
        if !self.cache.contains_key(name) {
            let path = self
                .probe(name)
                .ok_or_else(|| UnresolvedAssembly(name.to_string()))?;

            debug!("resolved assembly '{}' to {}", name, path.display());
            let image = AssemblyImage::open(&path)?;
            self.cache.insert(name.to_string(), image);
        }

        Ok(&self.cache[name])
    }

    fn probe(&self, name: &str) -> Option<PathBuf> {
        for dir in &self.search_dirs {
            for extension in ["dll", "exe"] {
                let candidate = dir.join(format!("{name}.{extension}"));
                if candidate.is_file() {
                    return Some(candidate);
                }
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_assembly_reported_by_name() {
        let mut resolver = AssemblyResolver::new(vec![std::env::temp_dir()]);
        match resolver.resolve("Definitely.Not.Here") {
            Err(crate::Error::UnresolvedAssembly(name)) => {
                assert_eq!(name, "Definitely.Not.Here");
            }
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }
}
