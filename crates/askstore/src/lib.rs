//! Content-addressed media storage for askcapture.
//!
//! Recorded segments and attachments are written here by the default uploader.
//! Objects are keyed by their content, so re-uploading the same bytes (a retry
//! after a lost acknowledgement, the same file attached twice) never duplicates
//! storage.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use askstore::{FileStore, MediaStore, ObjectMeta};
//!
//! let store = FileStore::at_path("/var/lib/askcapture/store").unwrap();
//!
//! let key = store
//!     .put(b"RIFF....WAVE", &ObjectMeta::new("audio/wav").named("segment-1.wav"))
//!     .unwrap();
//! println!("Stored as: {}", key);
//!
//! if let Some(data) = store.get(&key).unwrap() {
//!     println!("Got {} bytes", data.len());
//! }
//! ```
//!
//! # Configuration
//!
//! The base path is owned by `askconf` (`paths.store_dir`, default
//! `~/.askcapture/store`, overridden by `ASKCAPTURE_STORE_DIR`).

pub mod config;
pub mod key;
pub mod metadata;
pub mod store;

pub use config::StoreConfig;
pub use key::{KeyError, ObjectKey};
pub use metadata::{ObjectMeta, StoredObject};
pub use store::{FileStore, MediaStore};
