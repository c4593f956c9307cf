//! Principal model
//!
//! The authenticated actor is always passed explicitly into the access layer.
//! [`PrincipalSource`] is the seam to whatever session system issued it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{FieldOpsError, FieldOpsResult};

/// Tenant (company) identifier
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TenantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TenantId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for TenantId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl AsRef<str> for TenantId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Principal role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Company owner
    Owner,
    /// Company staff
    Employee,
    /// Independent process server, possibly engaged by several companies
    Contractor,
    /// Platform operator, bypasses tenant scoping
    SuperAdmin,
}

/// Authenticated actor making a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: String,
    pub role: Role,
    pub tenant_id: Option<TenantId>,
    /// Companies a contractor works for
    #[serde(default)]
    pub tenant_set: Vec<TenantId>,
}

impl Principal {
    pub fn owner(id: impl Into<String>, tenant: impl Into<TenantId>) -> Self {
        Self {
            id: id.into(),
            role: Role::Owner,
            tenant_id: Some(tenant.into()),
            tenant_set: Vec::new(),
        }
    }

    pub fn employee(id: impl Into<String>, tenant: impl Into<TenantId>) -> Self {
        Self {
            id: id.into(),
            role: Role::Employee,
            tenant_id: Some(tenant.into()),
            tenant_set: Vec::new(),
        }
    }

    pub fn contractor<T: Into<TenantId>>(
        id: impl Into<String>,
        tenants: impl IntoIterator<Item = T>,
    ) -> Self {
        Self {
            id: id.into(),
            role: Role::Contractor,
            tenant_id: None,
            tenant_set: tenants.into_iter().map(Into::into).collect(),
        }
    }

    pub fn super_admin(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: Role::SuperAdmin,
            tenant_id: None,
            tenant_set: Vec::new(),
        }
    }

    /// Principal with a role but no tenant membership at all
    pub fn unaffiliated(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
            tenant_id: None,
            tenant_set: Vec::new(),
        }
    }

    pub fn is_super_admin(&self) -> bool {
        self.role == Role::SuperAdmin
    }

    pub fn is_contractor(&self) -> bool {
        self.role == Role::Contractor
    }
}

/// Current principal lookup
#[async_trait]
pub trait PrincipalSource: Send + Sync {
    /// Returns [`FieldOpsError::Unauthenticated`] when no principal is attached
    async fn current_principal(&self) -> FieldOpsResult<Principal>;
}

/// Fixed principal source for tests and embedding
#[derive(Debug, Clone, Default)]
pub struct StaticPrincipalSource {
    principal: Option<Principal>,
}

impl StaticPrincipalSource {
    pub fn new(principal: Principal) -> Self {
        Self { principal: Some(principal) }
    }

    pub fn anonymous() -> Self {
        Self { principal: None }
    }
}

#[async_trait]
impl PrincipalSource for StaticPrincipalSource {
    async fn current_principal(&self) -> FieldOpsResult<Principal> {
        self.principal.clone().ok_or(FieldOpsError::Unauthenticated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_anonymous_source_is_unauthenticated() {
        let source = StaticPrincipalSource::anonymous();
        assert_eq!(
            source.current_principal().await,
            Err(FieldOpsError::Unauthenticated)
        );
    }

    #[tokio::test]
    async fn test_static_source_returns_principal() {
        let source = StaticPrincipalSource::new(Principal::owner("u1", "acme"));
        let principal = source.current_principal().await.unwrap();

        assert_eq!(principal.role, Role::Owner);
        assert_eq!(principal.tenant_id, Some(TenantId::new("acme")));
    }

    #[test]
    fn test_role_serializes_snake_case() {
        let json = serde_json::to_string(&Role::SuperAdmin).unwrap();
        assert_eq!(json, "\"super_admin\"");
    }
}
