use alloc::string::String;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

// -----------------------------------------------------------------------------
// SeedStore

/// Durable storage for the seed of a [`RewriteGenerator`].
///
/// The store has a single writer: the generator serializes every call.
///
/// [`RewriteGenerator`]: crate::RewriteGenerator
pub trait SeedStore: Send + Sync {
    /// Loads the last stored seed, or `None` if nothing was stored yet.
    fn load(&self) -> io::Result<Option<String>>;

    /// Replaces the stored seed. Must not return before `seed` is durable.
    fn store(&self, seed: &str) -> io::Result<()>;
}

// -----------------------------------------------------------------------------
// FileSeedStore

/// Keeps the seed in a single text file.
///
/// Writes go to a sibling `*.tmp` file which is synced and then renamed
/// over the target, so a crash leaves either the old or the new seed.
#[derive(Debug, Clone)]
pub struct FileSeedStore {
    path: PathBuf,
}

impl FileSeedStore {
    #[inline]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = OsString::from(self.path.as_os_str());
        name.push(".tmp");
        PathBuf::from(name)
    }
}

impl SeedStore for FileSeedStore {
    fn load(&self) -> io::Result<Option<String>> {
        match fs::read_to_string(&self.path) {
            Ok(text) => {
                let seed = text.trim_end_matches(['\r', '\n']);
                Ok((!seed.is_empty()).then(|| seed.into()))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn store(&self, seed: &str) -> io::Result<()> {
        let temp = self.temp_path();
        {
            let mut file = File::create(&temp)?;
            file.write_all(seed.as_bytes())?;
            file.write_all(b"\n")?;
            file.sync_all()?;
        }
        fs::rename(&temp, &self.path)?;
        self.sync_parent();
        Ok(())
    }
}

impl FileSeedStore {
    // The rename itself is only durable once the directory is synced.
    #[cfg(unix)]
    fn sync_parent(&self) {
        let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) else {
            return;
        };
        if let Err(e) = File::open(parent).and_then(|dir| dir.sync_all()) {
            log::warn!(
                "seed stored but directory `{}` was not synced: {e}",
                parent.display()
            );
        }
    }

    #[cfg(not(unix))]
    fn sync_parent(&self) {}
}

// -----------------------------------------------------------------------------
// MemorySeedStore

/// Keeps the seed in memory. Useful for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemorySeedStore {
    seed: Mutex<Option<String>>,
}

impl MemorySeedStore {
    #[inline]
    pub const fn new() -> Self {
        Self {
            seed: Mutex::new(None),
        }
    }

    /// Creates a store that already holds `seed`.
    #[inline]
    pub fn with_seed(seed: impl Into<String>) -> Self {
        Self {
            seed: Mutex::new(Some(seed.into())),
        }
    }

    /// Returns the currently stored seed.
    pub fn current(&self) -> Option<String> {
        self.seed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl SeedStore for MemorySeedStore {
    fn load(&self) -> io::Result<Option<String>> {
        Ok(self.current())
    }

    fn store(&self, seed: &str) -> io::Result<()> {
        *self.seed.lock().unwrap_or_else(PoisonError::into_inner) = Some(seed.into());
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use super::{FileSeedStore, SeedStore};

    #[test]
    fn missing_file_loads_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSeedStore::new(dir.path().join("seed"));
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn store_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSeedStore::new(dir.path().join("seed"));

        store.store("a9").unwrap();
        assert_eq!(store.load().unwrap().as_deref(), Some("a9"));

        store.store("b0").unwrap();
        assert_eq!(store.load().unwrap().as_deref(), Some("b0"));
        assert!(!dir.path().join("seed.tmp").exists());
    }

    #[test]
    fn unwritable_location_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSeedStore::new(dir.path().join("missing").join("seed"));
        assert!(store.store("1").is_err());
    }
}
