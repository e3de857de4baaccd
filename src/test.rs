//! Test utilities for avatarstore.
//!
//! Provides temporary directory allocation and a ready-to-use store backed
//! by one, for tests that need a throwaway upload root.

use std::{path::Path, sync::Arc};

use tempfile::TempDir;

use crate::store::UploadStore;

/// Allocate a temporary directory for tests.
pub fn tempdir() -> TempDir {
    TempDir::with_prefix("avatarstore-test-").unwrap()
}

/// An upload store rooted in a fresh temporary directory.
///
/// The upload root is a subdirectory of the temp dir, so tests can place
/// files *next to* the root to probe containment.  The temp dir is cleaned
/// up when this struct is dropped.
#[derive(Debug)]
pub struct TestStore {
    /// The store, wrapped in Arc so the async wrappers can be exercised.
    pub store: Arc<UploadStore>,
    tempdir: TempDir,
}

impl TestStore {
    pub fn new() -> Self {
        let dir = tempdir();
        let store = UploadStore::open(dir.path().join("uploads")).unwrap();
        Self {
            store: Arc::new(store),
            tempdir: dir,
        }
    }

    /// The canonical upload root.
    pub fn root(&self) -> &Path {
        self.store.root_path().unwrap()
    }

    /// The temp directory containing the upload root.
    pub fn tempdir_path(&self) -> &Path {
        self.tempdir.path()
    }
}

impl Default for TestStore {
    fn default() -> Self {
        Self::new()
    }
}
