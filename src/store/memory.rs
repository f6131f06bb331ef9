use std::cell::RefCell;

use super::{PersistentStorage, StoreError};

/// In-process database, for targets without a filesystem and for tests.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    contents: RefCell<Option<Vec<u8>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_contents(bytes: Vec<u8>) -> Self {
        Self { contents: RefCell::new(Some(bytes)) }
    }

    pub fn contents(&self) -> Option<Vec<u8>> {
        self.contents.borrow().clone()
    }
}

impl PersistentStorage for MemoryStorage {
    fn load(&self) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.contents.borrow().clone())
    }

    fn store(&self, bytes: &[u8]) -> Result<(), StoreError> {
        *self.contents.borrow_mut() = Some(bytes.to_vec());
        Ok(())
    }

    fn remove(&self) -> Result<(), StoreError> {
        *self.contents.borrow_mut() = None;
        Ok(())
    }

    fn with_write_lock(
        &self,
        op: &mut dyn FnMut() -> Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        // Single-threaded by construction.
        op()
    }
}
