//! Named decorators, one per protected dependency
//!
//! Every call to a dependency has to go through the same breaker and
//! bulkhead for their counts to mean anything. The registry hands out clones
//! of a single [`ResiliencyDecorator`] per name.

use std::fmt;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, info};

use crate::clock::{Clock, SystemClock};
use crate::decorator::ResiliencyDecorator;
use crate::error::ConfigResult;
use crate::policy::ResiliencyPolicy;

/// Concurrent map from dependency name to its decorator.
///
/// Clones share the map.
pub struct PolicyRegistry<C: Clock + Clone = SystemClock> {
    decorators: Arc<DashMap<String, ResiliencyDecorator<C>>>,
    clock: C,
}

impl<C: Clock + Clone> Clone for PolicyRegistry<C> {
    fn clone(&self) -> Self {
        Self { decorators: Arc::clone(&self.decorators), clock: self.clock.clone() }
    }
}

impl<C: Clock + Clone> fmt::Debug for PolicyRegistry<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicyRegistry").field("names", &self.names()).finish()
    }
}

impl PolicyRegistry<SystemClock> {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl Default for PolicyRegistry<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock + Clone> PolicyRegistry<C> {
    /// Registry whose breakers read `clock`
    pub fn with_clock(clock: C) -> Self {
        Self { decorators: Arc::new(DashMap::new()), clock }
    }

    fn build(&self, name: &str, policy: &ResiliencyPolicy) -> ConfigResult<ResiliencyDecorator<C>> {
        ResiliencyDecorator::with_clock(name, policy, self.clock.clone())
    }

    /// Install a decorator for `name`, replacing any previous one
    pub fn register(
        &self,
        name: &str,
        policy: &ResiliencyPolicy,
    ) -> ConfigResult<ResiliencyDecorator<C>> {
        let decorator = self.build(name, policy)?;
        if self.decorators.insert(name.to_string(), decorator.clone()).is_some() {
            info!(name, "Replaced resiliency policy");
        } else {
            info!(name, "Registered resiliency policy");
        }
        Ok(decorator)
    }

    /// The decorator registered for `name`
    pub fn get(&self, name: &str) -> Option<ResiliencyDecorator<C>> {
        self.decorators.get(name).map(|entry| entry.value().clone())
    }

    /// The decorator for `name`, building it from `policy` if absent.
    ///
    /// An existing decorator is returned as is, even if it was built from a
    /// different policy. Concurrent callers for a new name all receive the
    /// same decorator.
    pub fn get_or_register(
        &self,
        name: &str,
        policy: &ResiliencyPolicy,
    ) -> ConfigResult<ResiliencyDecorator<C>> {
        if let Some(existing) = self.get(name) {
            return Ok(existing);
        }

        match self.decorators.entry(name.to_string()) {
            Entry::Occupied(entry) => Ok(entry.get().clone()),
            Entry::Vacant(entry) => {
                let decorator = self.build(name, policy)?;
                entry.insert(decorator.clone());
                info!(name, "Registered resiliency policy");
                Ok(decorator)
            }
        }
    }

    /// Remove and return the decorator for `name`
    pub fn remove(&self, name: &str) -> Option<ResiliencyDecorator<C>> {
        let removed = self.decorators.remove(name).map(|(_, decorator)| decorator);
        if removed.is_some() {
            debug!(name, "Removed resiliency policy");
        }
        removed
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> =
            self.decorators.iter().map(|entry| entry.key().clone()).collect();
        names.sort_unstable();
        names
    }

    /// Number of registered dependencies
    pub fn len(&self) -> usize {
        self.decorators.len()
    }

    /// Whether nothing is registered
    pub fn is_empty(&self) -> bool {
        self.decorators.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::{Admission, CircuitBreakerConfig, CircuitState};
    use crate::clock::MockClock;

    fn breaker_policy(threshold: u32) -> ResiliencyPolicy {
        ResiliencyPolicy::builder()
            .circuit_breaker(
                CircuitBreakerConfig::builder().failure_threshold(threshold).build().unwrap(),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn test_register_and_get_share_breaker() {
        let registry = PolicyRegistry::with_clock(MockClock::new());
        let registered = registry.register("billing", &breaker_policy(1)).unwrap();

        let fetched = registry.get("billing").expect("registered");
        let breaker = registered.circuit_breaker().unwrap();
        breaker.reset();
        if let Admission::Admitted(ticket) = breaker.check_admission() {
            breaker.record_failure(&ticket);
        }

        assert_eq!(fetched.circuit_breaker().unwrap().state(), CircuitState::Open);
        assert_eq!(fetched.name(), "billing");
    }

    #[test]
    fn test_get_or_register_keeps_existing() {
        let registry = PolicyRegistry::new();
        registry.register("search", &breaker_policy(3)).unwrap();

        let decorator = registry.get_or_register("search", &breaker_policy(9)).unwrap();
        assert_eq!(decorator.circuit_breaker().unwrap().config().failure_threshold, 3);

        let fresh = registry.get_or_register("geo", &breaker_policy(9)).unwrap();
        assert_eq!(fresh.circuit_breaker().unwrap().config().failure_threshold, 9);
        assert_eq!(registry.names(), vec!["geo".to_string(), "search".to_string()]);
    }

    #[test]
    fn test_invalid_policy_not_registered() {
        let registry = PolicyRegistry::new();
        let bad = ResiliencyPolicy {
            retry: Some(crate::retry::RetryConfig { max_attempts: 0, ..Default::default() }),
            ..Default::default()
        };

        assert!(registry.get_or_register("bad", &bad).is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_remove() {
        let registry = PolicyRegistry::new();
        registry.register("a", &ResiliencyPolicy::default()).unwrap();

        assert!(registry.remove("a").is_some());
        assert!(registry.remove("a").is_none());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_concurrent_get_or_register_yields_one_decorator() {
        let registry = PolicyRegistry::new();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    let decorator = registry.get_or_register("shared", &breaker_policy(2)).unwrap();
                    let breaker = decorator.circuit_breaker().unwrap();
                    if let Admission::Admitted(ticket) = breaker.check_admission() {
                        breaker.record_success(&ticket);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let decorator = registry.get("shared").unwrap();
        assert_eq!(decorator.metrics().breaker.unwrap().total_admitted, 8);
        assert_eq!(registry.len(), 1);
    }
}
