//! Integer handles for sessions held on behalf of foreign callers.
//!
//! Callers that cannot hold a Rust value (an FFI boundary, a scripting
//! host) get a `u32` handle instead and pass it back on every call.

use std::collections::HashMap;

use crate::error::{Error, Result};

/// Arena of values addressed by `u32` handles.
///
/// Handles start at 1 and are not reused while the value they name is
/// still registered.
#[derive(Debug)]
pub struct SessionRegistry<T> {
    entries: HashMap<u32, T>,
    next: u32,
}

impl<T> Default for SessionRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SessionRegistry<T> {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            next: 1,
        }
    }

    /// Stores `value` and returns its handle.
    pub fn insert(&mut self, value: T) -> u32 {
        let mut handle = self.next;
        while handle == 0 || self.entries.contains_key(&handle) {
            handle = handle.wrapping_add(1);
        }
        self.next = handle.wrapping_add(1);
        self.entries.insert(handle, value);
        tracing::debug!("registered handle {}", handle);
        handle
    }

    pub fn get(&self, handle: u32) -> Result<&T> {
        self.entries
            .get(&handle)
            .ok_or(Error::UnknownHandle(handle))
    }

    pub fn get_mut(&mut self, handle: u32) -> Result<&mut T> {
        self.entries
            .get_mut(&handle)
            .ok_or(Error::UnknownHandle(handle))
    }

    /// Removes and returns the value behind `handle`.
    pub fn remove(&mut self, handle: u32) -> Result<T> {
        let value = self
            .entries
            .remove(&handle)
            .ok_or(Error::UnknownHandle(handle))?;
        tracing::debug!("released handle {}", handle);
        Ok(value)
    }

    #[must_use]
    pub fn contains(&self, handle: u32) -> bool {
        self.entries.contains_key(&handle)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::tests::MockProvider;
    use crate::session::{SessionConfig, SessionManager, SessionState};

    #[test]
    fn test_insert_get_remove() {
        let mut registry = SessionRegistry::new();
        let a = registry.insert("a");
        let b = registry.insert("b");
        assert_ne!(a, 0);
        assert_ne!(a, b);
        assert_eq!(registry.get(a).copied().unwrap(), "a");

        *registry.get_mut(b).unwrap() = "c";
        assert_eq!(registry.remove(b).unwrap(), "c");
        assert!(!registry.contains(b));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_stale_handle_is_rejected() {
        let mut registry = SessionRegistry::new();
        let handle = registry.insert(1u8);
        registry.remove(handle).unwrap();

        assert!(matches!(registry.get(handle), Err(Error::UnknownHandle(h)) if h == handle));
        assert!(matches!(registry.remove(handle), Err(Error::UnknownHandle(_))));
        assert!(registry.get(0).is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_handles_skip_zero_and_live_entries() {
        let mut registry = SessionRegistry::new();
        registry.next = u32::MAX;
        let last = registry.insert('x');
        let wrapped = registry.insert('y');
        assert_eq!(last, u32::MAX);
        assert_eq!(wrapped, 1);

        registry.next = 1;
        assert_eq!(registry.insert('z'), 2);
    }

    #[test]
    fn test_sessions_by_handle() {
        let mut registry = SessionRegistry::new();
        let (session, _inbound) =
            SessionManager::new(MockProvider::default(), SessionConfig::default());
        let handle = registry.insert(session);

        let session = registry.get(handle).unwrap();
        assert_eq!(session.state(), SessionState::NoDevice);
        assert!(session.open_session().is_err());
    }
}
