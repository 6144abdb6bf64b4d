//! Central store seam for the override value

use sharedstore::{BROADCAST_KEY, SharedStore, StoreError};

/// Durable home of the pool-wide override
///
/// Read once per worker at startup; written only when an override begins or ends.
pub trait CentralStore: Send + Sync {
    fn read_override(&self) -> Result<Option<String>, StoreError>;
    fn write_override(&self, value: &str) -> Result<(), StoreError>;
    fn clear_override(&self) -> Result<(), StoreError>;
}

impl CentralStore for SharedStore {
    fn read_override(&self) -> Result<Option<String>, StoreError> {
        self.get(BROADCAST_KEY)
    }

    fn write_override(&self, value: &str) -> Result<(), StoreError> {
        self.set(BROADCAST_KEY, value)
    }

    fn clear_override(&self) -> Result<(), StoreError> {
        self.remove(BROADCAST_KEY).map(|_| ())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::{Mutex, PoisonError};
    use tempfile::TempDir;

    /// In-memory store, optionally failing every call
    #[derive(Default)]
    pub(crate) struct MemoryStore {
        value: Mutex<Option<String>>,
        pub(crate) broken: bool,
    }

    impl MemoryStore {
        pub(crate) fn with(value: &str) -> Self {
            Self {
                value: Mutex::new(Some(value.to_string())),
                broken: false,
            }
        }

        pub(crate) fn broken() -> Self {
            Self {
                value: Mutex::new(None),
                broken: true,
            }
        }

        fn fail(&self) -> Result<(), StoreError> {
            if self.broken {
                return Err(StoreError::Io {
                    path: "memory".into(),
                    source: std::io::Error::other("store offline"),
                });
            }
            Ok(())
        }
    }

    impl CentralStore for MemoryStore {
        fn read_override(&self) -> Result<Option<String>, StoreError> {
            self.fail()?;
            Ok(self.value.lock().unwrap_or_else(PoisonError::into_inner).clone())
        }

        fn write_override(&self, value: &str) -> Result<(), StoreError> {
            self.fail()?;
            *self.value.lock().unwrap_or_else(PoisonError::into_inner) = Some(value.to_string());
            Ok(())
        }

        fn clear_override(&self) -> Result<(), StoreError> {
            self.fail()?;
            *self.value.lock().unwrap_or_else(PoisonError::into_inner) = None;
            Ok(())
        }
    }

    #[test]
    fn test_shared_store_round_trip() {
        let temp = TempDir::new().unwrap();
        let store = SharedStore::open(temp.path()).unwrap();

        assert_eq!(store.read_override().unwrap(), None);
        store.write_override("SALE").unwrap();

        let reopened = SharedStore::open(temp.path()).unwrap();
        assert_eq!(reopened.read_override().unwrap().as_deref(), Some("SALE"));

        reopened.clear_override().unwrap();
        assert_eq!(store.read_override().unwrap(), None);
        // clearing twice is fine
        store.clear_override().unwrap();
    }
}
