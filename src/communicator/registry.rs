//! One communicator per target URL.
//!
//! The registry is owned by the application root and passed by reference;
//! there is no process-wide instance.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use url::Url;

use super::native::NativeCommunicator;
use crate::error::ChannelError;

/// Communicators keyed by the URL they talk to.
#[derive(Debug)]
pub struct CommunicatorRegistry<C> {
    entries: Mutex<HashMap<String, Arc<C>>>,
}

impl<C> Default for CommunicatorRegistry<C> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<C> CommunicatorRegistry<C> {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<C>>> {
        self.entries.lock().expect("registry lock poisoned")
    }

    /// The communicator for `url`, creating it with `create` on first use.
    pub fn get_or_insert_with(&self, url: &Url, create: impl FnOnce() -> C) -> Arc<C> {
        let mut entries = self.lock();
        Arc::clone(
            entries
                .entry(url.as_str().to_string())
                .or_insert_with(|| Arc::new(create())),
        )
    }

    /// The communicator for `url`, if one exists.
    pub fn get(&self, url: &Url) -> Option<Arc<C>> {
        self.lock().get(url.as_str()).cloned()
    }

    /// Forget the communicator for `url`.
    pub fn remove(&self, url: &Url) -> Option<Arc<C>> {
        self.lock().remove(url.as_str())
    }

    /// Number of registered communicators.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn snapshot(&self) -> Vec<Arc<C>> {
        self.lock().values().cloned().collect()
    }
}

impl CommunicatorRegistry<NativeCommunicator> {
    /// Offer a callback URL to every registered native communicator.
    /// Returns whether one of them owned it.
    pub fn handle_response(&self, response_url: &str) -> Result<bool, ChannelError> {
        for communicator in self.snapshot() {
            if communicator.handle_response(response_url)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::communicator::native::{BrowserView, BrowserViewOutcome};
    use async_trait::async_trait;

    #[derive(Debug, PartialEq)]
    struct Named(&'static str);

    #[test]
    fn test_one_instance_per_url() {
        let registry = CommunicatorRegistry::new();
        let url = Url::parse("https://keys.example.com/connect").unwrap();

        let first = registry.get_or_insert_with(&url, || Named("first"));
        let second = registry.get_or_insert_with(&url, || Named("second"));

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(*second, Named("first"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove_allows_recreation() {
        let registry = CommunicatorRegistry::new();
        let url = Url::parse("https://keys.example.com/connect").unwrap();
        registry.get_or_insert_with(&url, || Named("old"));

        assert!(registry.remove(&url).is_some());
        assert!(registry.get(&url).is_none());
        assert_eq!(*registry.get_or_insert_with(&url, || Named("new")), Named("new"));
    }

    struct IdleView;

    #[async_trait]
    impl BrowserView for IdleView {
        async fn open(&self, _url: &Url) -> Result<BrowserViewOutcome, ChannelError> {
            Ok(BrowserViewOutcome::Opened)
        }
        fn dismiss(&self) {}
    }

    #[test]
    fn test_unowned_callback_is_reported() {
        let registry: CommunicatorRegistry<NativeCommunicator> = CommunicatorRegistry::new();
        for target in ["https://a.example/connect", "https://b.example/connect"] {
            let url = Url::parse(target).unwrap();
            registry.get_or_insert_with(&url, || {
                NativeCommunicator::new(
                    url.clone(),
                    Url::parse("myapp://callback").unwrap(),
                    Arc::new(IdleView),
                )
            });
        }

        assert!(!registry
            .handle_response("myapp://other?requestId=1")
            .unwrap());
    }
}
