//! File-system hooks
//!
//! The bridge never touches the file system itself. Module loading and the `json` module go
//! through whatever reader, writer and directory lister the host installs here.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::debug;

use crate::core::error::{BridgeError, BridgeResult};

/// Returns the contents of a file, or `None` when it does not exist.
pub type LoadFileFn = dyn Fn(&str) -> Option<String> + Send + Sync;
/// Writes a whole file.
pub type WriteFileFn = dyn Fn(&str, &str) -> BridgeResult<()> + Send + Sync;
/// Lists the entry names of a directory. Unknown directories list as empty.
pub type ReadDirFn = dyn Fn(&str) -> Vec<String> + Send + Sync;

#[derive(Default)]
pub struct FileHooks {
    reader: RwLock<Option<Arc<LoadFileFn>>>,
    writer: RwLock<Option<Arc<WriteFileFn>>>,
    dir_reader: RwLock<Option<Arc<ReadDirFn>>>,
}

impl FileHooks {
    pub fn set_reader(&self, reader: Arc<LoadFileFn>) {
        *self.reader.write().unwrap_or_else(PoisonError::into_inner) = Some(reader);
    }

    pub fn set_writer(&self, writer: Arc<WriteFileFn>) {
        *self.writer.write().unwrap_or_else(PoisonError::into_inner) = Some(writer);
    }

    pub fn set_dir_reader(&self, dir_reader: Arc<ReadDirFn>) {
        *self.dir_reader.write().unwrap_or_else(PoisonError::into_inner) = Some(dir_reader);
    }

    pub fn has_reader(&self) -> bool {
        self.reader
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn read_file(&self, path: &str) -> Option<String> {
        let reader = self
            .reader
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()?;
        let contents = reader(path);
        debug!(target: "bridge", path, found = contents.is_some(), "read file");
        contents
    }

    pub fn write_file(&self, path: &str, contents: &str) -> BridgeResult<()> {
        let writer = self
            .writer
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| BridgeError::NotFound("file writer".to_string()))?;
        writer(path, contents)
    }

    pub fn read_dir(&self, path: &str) -> Vec<String> {
        let dir_reader = self
            .dir_reader
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        dir_reader.map(|list| list(path)).unwrap_or_default()
    }
}

impl fmt::Debug for FileHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let is_set = |set: bool| if set { "set" } else { "unset" };
        f.debug_struct("FileHooks")
            .field("reader", &is_set(self.has_reader()))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_hooks() {
        let hooks = FileHooks::default();
        assert_eq!(hooks.read_file("a.lua"), None);
        assert!(hooks.write_file("a.json", "{}").is_err());
        assert!(hooks.read_dir(".").is_empty());
    }

    #[test]
    fn test_installed_reader() {
        let hooks = FileHooks::default();
        hooks.set_reader(Arc::new(|path: &str| {
            (path == "main.lua").then(|| "return 1".to_string())
        }));
        assert_eq!(hooks.read_file("main.lua").as_deref(), Some("return 1"));
        assert_eq!(hooks.read_file("other.lua"), None);
    }
}
