//! Cacheability policy.

use std::fmt;
use std::sync::Arc;

/// Query names that control transactions. Their results are never cached.
pub const TRANSACTION_CONTROL: [&str; 3] = [
    "begin transaction",
    "rollback transaction",
    "commit transaction",
];

/// Caller-supplied verdict on whether a query's results may be cached.
pub trait CachePolicy: Send + Sync {
    fn is_cacheable(&self, name: &str) -> bool;
}

impl<F> CachePolicy for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn is_cacheable(&self, name: &str) -> bool {
        self(name)
    }
}

/// Decides per query name whether results may be cached.
///
/// Transaction-control names are rejected before the override is ever
/// consulted; without an override everything else is cacheable.
#[derive(Clone, Default)]
pub struct Cacheability {
    override_policy: Option<Arc<dyn CachePolicy>>,
}

impl Cacheability {
    pub fn new(policy: Option<Arc<dyn CachePolicy>>) -> Self {
        Self {
            override_policy: policy,
        }
    }

    pub fn is_cacheable(&self, name: &str) -> bool {
        if TRANSACTION_CONTROL.contains(&name) {
            return false;
        }
        match &self.override_policy {
            Some(policy) => policy.is_cacheable(name),
            None => true,
        }
    }
}

impl fmt::Debug for Cacheability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cacheability")
            .field("override", &self.override_policy.is_some())
            .finish()
    }
}
