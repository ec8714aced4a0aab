//! Session authorization seam
//!
//! Whether a (role, tenant-id) subscription is permitted is decided by a
//! collaborator outside this core - typically the session established by
//! the authentication flow. The registry checks it once, synchronously,
//! at subscribe time.

use shared::channel::ChannelScope;
use std::collections::HashSet;

/// Resolves whether the current session may subscribe to a scope
pub trait ScopeAuthorizer: Send + Sync + std::fmt::Debug {
    fn is_authorized(&self, scope: &ChannelScope) -> bool;
}

/// Fixed allow-list authorizer
///
/// Sufficient for tests and for sessions whose grants are known at
/// login time.
#[derive(Debug, Default)]
pub struct StaticAuthorizer {
    allowed: HashSet<ChannelScope>,
}

impl StaticAuthorizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow(mut self, scope: ChannelScope) -> Self {
        self.allowed.insert(scope);
        self
    }
}

impl ScopeAuthorizer for StaticAuthorizer {
    fn is_authorized(&self, scope: &ChannelScope) -> bool {
        self.allowed.contains(scope)
    }
}

/// Authorizer that permits every scope (single-tenant embedding)
#[derive(Debug, Default)]
pub struct AllowAll;

impl ScopeAuthorizer for AllowAll {
    fn is_authorized(&self, _scope: &ChannelScope) -> bool {
        true
    }
}
