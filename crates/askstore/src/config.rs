//! Store configuration.
//!
//! The store's location comes from `askconf` (`paths.store_dir`, or
//! `ASKCAPTURE_STORE_DIR`); this only describes the on-disk layout and the
//! access mode for a given base path.

use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Objects live in `{base_path}/objects/`, metadata in `{base_path}/metadata/`.
    pub base_path: PathBuf,

    /// Write the JSON metadata sidecar.
    pub write_metadata: bool,

    pub read_only: bool,
}

impl StoreConfig {
    pub fn with_base_path(path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: path.into(),
            write_metadata: true,
            read_only: false,
        }
    }

    pub fn read_only(path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: path.into(),
            write_metadata: false,
            read_only: true,
        }
    }

    pub fn objects_dir(&self) -> PathBuf {
        self.base_path.join("objects")
    }

    pub fn metadata_dir(&self) -> PathBuf {
        self.base_path.join("metadata")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_dirs() {
        let config = StoreConfig::with_base_path("/srv/store");
        assert_eq!(config.objects_dir(), PathBuf::from("/srv/store/objects"));
        assert_eq!(config.metadata_dir(), PathBuf::from("/srv/store/metadata"));
        assert!(config.write_metadata);
        assert!(!config.read_only);
    }

    #[test]
    fn test_read_only_skips_metadata() {
        let config = StoreConfig::read_only("/srv/store");
        assert!(config.read_only);
        assert!(!config.write_metadata);
    }
}
