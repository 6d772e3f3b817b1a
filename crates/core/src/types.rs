use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[cfg(feature = "axum")]
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::Json,
};

macro_rules! opaque_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }
    };
}

opaque_id!(TenantId);
opaque_id!(UserId);
opaque_id!(RoleId);
opaque_id!(MappingId);
opaque_id!(SessionId);
opaque_id!(AccessRequestId);

/// Lifecycle state of a [Tenant](crate) row. Only `Active` tenants are
/// routable; deactivation invalidates every open session for the tenant
/// (invariant I1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenantStatus {
    Active,
    Inactive,
}

/// The four database families a tenant clone may be backed by. Closed on
/// purpose: the pool manager dispatches on this, it is never a free-form
/// string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatabaseKind {
    RelationalA,
    RelationalB,
    Document,
    Embedded,
}

/// Closed, versioned resource enum a [`Permission`] can target. Adding a
/// resource here is a version bump, never a free-form string lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    Users,
    Tenants,
    Sessions,
    Queries,
    Schemas,
    Reports,
    Audit,
    Settings,
}

/// Totally ordered permission level. `Level::Admin` on a resource implies
/// every lower level on that same resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    None,
    Read,
    Write,
    Create,
    Delete,
    Admin,
}

/// The (resource, level, conditions) triple from the role/permission
/// model. `conditions` is a JSON predicate: a permission's conditions
/// constrain the acceptable request conditions, evaluated by
/// `conditions_satisfied`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Permission {
    pub resource: Resource,
    pub level: Level,
    #[serde(default = "serde_json::Value::default")]
    pub conditions: serde_json::Value,
}

impl Permission {
    pub fn new(resource: Resource, level: Level) -> Self {
        Self {
            resource,
            level,
            conditions: serde_json::Value::Null,
        }
    }

    pub fn with_conditions(mut self, conditions: serde_json::Value) -> Self {
        self.conditions = conditions;
        self
    }

    /// `self` covers a request for `resource` at `required_level` with the
    /// supplied request conditions, per §4.2's `check_permission` rule:
    /// the permission's conditions must be a subset of (satisfied by) the
    /// request's conditions.
    pub fn covers(&self, resource: Resource, required_level: Level, request_conditions: &serde_json::Value) -> bool {
        self.resource == resource
            && self.level >= required_level
            && conditions_satisfied(&self.conditions, request_conditions)
    }
}

/// A permission's conditions are satisfied when every key/value pair they
/// require is present and equal in the request's conditions object. A
/// `Null` or empty-object condition set is always satisfied.
pub fn conditions_satisfied(required: &serde_json::Value, supplied: &serde_json::Value) -> bool {
    match required {
        serde_json::Value::Null => true,
        serde_json::Value::Object(map) if map.is_empty() => true,
        serde_json::Value::Object(map) => {
            let supplied = supplied.as_object();
            map.iter().all(|(k, v)| supplied.and_then(|s| s.get(k)) == Some(v))
        }
        other => supplied == other,
    }
}

/// The per-tenant arena slot a `TenantConnectionPool` lives at. Components
/// downstream of the routing middleware hold this index rather than a
/// pointer into the pool table (see Design Notes on cyclic references).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantSlot(pub usize);

/// Fields carried inside a signed token (§6.2). `fingerprint` binds the
/// token to the server-recorded session row; it is never derived from the
/// user's password.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    pub version: u8,
    pub session_id: SessionId,
    pub user_id: UserId,
    pub tenant_id: TenantId,
    pub roles: Vec<String>,
    pub issued_at: i64,
    pub expires_at: i64,
    pub fingerprint: String,
}

/// The immutable per-request value constructed by the routing middleware
/// and only ever read downstream (§9 Design Notes). Nothing past the
/// middleware re-derives tenant identity.
#[derive(Debug, Clone)]
pub struct TokenBearerContext {
    pub user_id: UserId,
    pub tenant_id: TenantId,
    pub roles: Vec<String>,
    pub allowed_operations: Vec<Permission>,
    pub session_id: SessionId,
    pub is_global_admin: bool,
    pub pool_handle: TenantSlot,
    pub request_id: String,
}

impl TokenBearerContext {
    /// `check_permission` restricted to what the middleware already
    /// resolved: whether any effective permission covers this operation.
    pub fn allows(&self, resource: Resource, required_level: Level, request_conditions: &serde_json::Value) -> bool {
        self.is_global_admin
            || self
                .allowed_operations
                .iter()
                .any(|p| p.covers(resource, required_level, request_conditions))
    }

    /// The conditions of whichever effective permission actually covered
    /// this request, for the role-scope result filter that runs after
    /// `allows` has already let the request through. A global admin has
    /// no conditioning permission to narrow by.
    pub fn covering_conditions(&self, resource: Resource, required_level: Level, request_conditions: &serde_json::Value) -> Option<serde_json::Value> {
        if self.is_global_admin {
            return None;
        }
        self.allowed_operations
            .iter()
            .find(|p| p.covers(resource, required_level, request_conditions))
            .map(|p| p.conditions.clone())
    }
}

#[cfg(feature = "axum")]
#[async_trait]
impl<S> FromRequestParts<S> for TokenBearerContext
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, Json<serde_json::Value>);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts.extensions.get::<TokenBearerContext>().cloned().ok_or_else(|| {
            (
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({ "error": { "kind": "Unauthenticated" } })),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_is_totally_ordered() {
        assert!(Level::Admin > Level::Delete);
        assert!(Level::Delete > Level::Create);
        assert!(Level::Create > Level::Write);
        assert!(Level::Write > Level::Read);
        assert!(Level::Read > Level::None);
    }

    #[test]
    fn permission_covers_higher_level_requests() {
        let p = Permission::new(Resource::Queries, Level::Admin);
        assert!(p.covers(Resource::Queries, Level::Read, &serde_json::Value::Null));
        assert!(!p.covers(Resource::Reports, Level::Read, &serde_json::Value::Null));
    }

    #[test]
    fn conditions_require_matching_keys() {
        let required = serde_json::json!({"read_only": true});
        assert!(!conditions_satisfied(&required, &serde_json::Value::Null));
        assert!(conditions_satisfied(&required, &serde_json::json!({"read_only": true, "extra": 1})));
    }
}
