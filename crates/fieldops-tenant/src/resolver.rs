//! Tenant resolution
//!
//! Pure functions over the principal record. Absence of membership is a
//! valid, silent result: an empty scope.

use std::collections::BTreeSet;

use fieldops_common::{Principal, Role, TenantId};

/// Tenants a principal may read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TenantScope {
    /// SuperAdmin sentinel; never expanded into a tenant list
    All,
    /// Explicit membership, possibly empty
    Tenants(BTreeSet<TenantId>),
}

impl TenantScope {
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Tenants(set) if set.is_empty())
    }

    pub fn contains(&self, tenant: &TenantId) -> bool {
        match self {
            Self::All => true,
            Self::Tenants(set) => set.contains(tenant),
        }
    }
}

/// Maps principals to tenant scopes
#[derive(Debug, Default, Clone, Copy)]
pub struct TenantResolver;

impl TenantResolver {
    pub fn new() -> Self {
        Self
    }

    /// Tenant set the principal may access
    pub fn resolve_tenants(&self, principal: &Principal) -> TenantScope {
        match principal.role {
            Role::SuperAdmin => TenantScope::All,
            Role::Owner | Role::Employee => {
                TenantScope::Tenants(principal.tenant_id.iter().cloned().collect())
            }
            Role::Contractor => TenantScope::Tenants(
                principal
                    .tenant_set
                    .iter()
                    .chain(principal.tenant_id.iter())
                    .cloned()
                    .collect(),
            ),
        }
    }

    /// Tenant a write by this principal is stamped with
    pub fn home_tenant(&self, principal: &Principal) -> Option<TenantId> {
        match principal.role {
            Role::Owner | Role::Employee | Role::SuperAdmin => principal.tenant_id.clone(),
            Role::Contractor => {
                if let Some(tenant) = &principal.tenant_id {
                    return Some(tenant.clone());
                }
                let distinct: BTreeSet<&TenantId> = principal.tenant_set.iter().collect();
                if distinct.len() == 1 {
                    distinct.into_iter().next().cloned()
                } else {
                    None
                }
            }
        }
    }

    /// Membership check for a single record
    pub fn can_access(&self, principal: &Principal, tenant: &TenantId) -> bool {
        self.resolve_tenants(principal).contains(tenant)
    }
}
