//! Channel scope types
//!
//! A channel is a logical subscription stream scoped to one tenant
//! role + id. These types are shared between the sync core and any
//! transport/server implementation.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Tenant role for a channel subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TenantRole {
    /// Merchant storefront operator
    Merchant,
    /// Wholesale supplier
    Supplier,
    /// Cooperative aggregate view across merchants
    Cooperative,
    /// Admin tooling
    Admin,
}

impl fmt::Display for TenantRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TenantRole::Merchant => write!(f, "merchant"),
            TenantRole::Supplier => write!(f, "supplier"),
            TenantRole::Cooperative => write!(f, "cooperative"),
            TenantRole::Admin => write!(f, "admin"),
        }
    }
}

/// Channel scope - identifies one tenant-scoped event stream
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelScope {
    pub role: TenantRole,
    pub tenant_id: String,
}

impl ChannelScope {
    pub fn new(role: TenantRole, tenant_id: impl Into<String>) -> Self {
        Self {
            role,
            tenant_id: tenant_id.into(),
        }
    }

    pub fn merchant(tenant_id: impl Into<String>) -> Self {
        Self::new(TenantRole::Merchant, tenant_id)
    }

    pub fn supplier(tenant_id: impl Into<String>) -> Self {
        Self::new(TenantRole::Supplier, tenant_id)
    }

    pub fn cooperative(tenant_id: impl Into<String>) -> Self {
        Self::new(TenantRole::Cooperative, tenant_id)
    }

    /// Logical channel identifier on the wire, e.g. `merchant:m-1`
    pub fn channel_id(&self) -> String {
        format!("{}:{}", self.role, self.tenant_id)
    }

    /// Parse a channel identifier back into a scope
    pub fn parse(channel_id: &str) -> Option<Self> {
        let (role, tenant_id) = channel_id.split_once(':')?;
        let role = match role {
            "merchant" => TenantRole::Merchant,
            "supplier" => TenantRole::Supplier,
            "cooperative" => TenantRole::Cooperative,
            "admin" => TenantRole::Admin,
            _ => return None,
        };
        if tenant_id.is_empty() {
            return None;
        }
        Some(Self::new(role, tenant_id))
    }
}

impl fmt::Display for ChannelScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.role, self.tenant_id)
    }
}

/// Channel connection state, observable by consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Connected,
    Backoff,
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelState::Disconnected => write!(f, "disconnected"),
            ChannelState::Connecting => write!(f, "connecting"),
            ChannelState::Connected => write!(f, "connected"),
            ChannelState::Backoff => write!(f, "backoff"),
        }
    }
}
