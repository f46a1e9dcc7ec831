//! Opaque blob storage for the front-end.
//!
//! The GUI persists collections, request history and saved TLS templates
//! as JSON files it owns end to end; the engine's only contract is
//! read-all / write-all of a named file under the per-user config
//! directory.

use std::fs;
use std::path::PathBuf;

use crate::error::{Error, Result};

pub const COLLECTIONS_FILE: &str = "collections.json";
pub const HISTORY_FILE: &str = "history.json";
pub const TLS_TEMPLATES_FILE: &str = "tls_templates.json";

/// File-based storage rooted in the OS user config directory.
pub struct Storage {
    dir: PathBuf,
}

impl Storage {
    /// Open (creating if needed) `<user config dir>/wraith`.
    pub fn new() -> Result<Self> {
        let base = dirs::config_dir()
            .ok_or_else(|| Error::config("no user config directory on this platform"))?;
        Self::at(base.join("wraith"))
    }

    /// Storage rooted at an explicit directory.
    pub fn at(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn read(&self, name: &str) -> Result<Vec<u8>> {
        Ok(fs::read(self.dir.join(name))?)
    }

    pub fn write(&self, name: &str, data: &[u8]) -> Result<()> {
        Ok(fs::write(self.dir.join(name), data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_blobs() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = Storage::at(tmp.path().join("wraith")).unwrap();
        storage.write(HISTORY_FILE, br#"[{"id":"1"}]"#).unwrap();
        assert_eq!(storage.read(HISTORY_FILE).unwrap(), br#"[{"id":"1"}]"#);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = Storage::at(tmp.path().to_path_buf()).unwrap();
        assert!(matches!(
            storage.read(COLLECTIONS_FILE),
            Err(Error::Io(_))
        ));
    }
}
