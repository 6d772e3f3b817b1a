//! Role templates and permission resolution (§4.2). A [`RoleTemplate`]
//! is never mutated in place — extending one means publishing a new
//! version under the same name, per the central metadata store's
//! lifecycle rule for the entity.

use qgw_core::{Level, Permission, Resource};
use serde_json::json;
use std::collections::HashMap;

/// A named, versioned bundle of permissions with optional single
/// inheritance. `resolve` walks the parent chain, which the registry
/// guarantees is acyclic by construction (parents are only ever set to
/// an already-registered template).
#[derive(Debug, Clone)]
pub struct RoleTemplate {
    pub name: String,
    pub version: u32,
    pub parent: Option<String>,
    pub permissions: Vec<Permission>,
    pub is_global_admin: bool,
}

/// In-memory catalog of role templates, seeded with the normative set
/// on construction. The central metadata store persists templates;
/// this is the read-side cache the RBAC evaluator consults, rebuilt
/// from the store on startup and on template change.
#[derive(Default)]
pub struct RoleCatalog {
    templates: HashMap<String, RoleTemplate>,
}

impl RoleCatalog {
    pub fn new() -> Self {
        let mut catalog = Self {
            templates: HashMap::new(),
        };
        for template in seed_templates() {
            catalog.insert(template);
        }
        catalog
    }

    /// Registers a new version of `template`, replacing any prior
    /// version under the same name rather than mutating it.
    pub fn insert(&mut self, template: RoleTemplate) {
        self.templates.insert(template.name.clone(), template);
    }

    pub fn get(&self, name: &str) -> Option<&RoleTemplate> {
        self.templates.get(name)
    }

    pub fn list(&self) -> Vec<&RoleTemplate> {
        self.templates.values().collect()
    }

    /// `resolve(role) = role.permissions ∪ resolve(role.parent)` (§4.2).
    pub fn resolve(&self, name: &str) -> Vec<Permission> {
        let mut seen_names = Vec::new();
        self.resolve_inner(name, &mut seen_names)
    }

    fn resolve_inner(&self, name: &str, seen_names: &mut Vec<String>) -> Vec<Permission> {
        if seen_names.iter().any(|seen| seen == name) {
            return Vec::new();
        }
        seen_names.push(name.to_string());

        let Some(template) = self.templates.get(name) else {
            return Vec::new();
        };

        let mut permissions = template.permissions.clone();
        if let Some(parent) = &template.parent {
            permissions.extend(self.resolve_inner(parent, seen_names));
        }
        permissions
    }

    /// `effective(user, tenant)` for the caller's already-loaded set of
    /// role assignment names — the union of each role's resolved
    /// permissions (§4.2).
    pub fn effective_permissions(&self, role_names: &[String]) -> Vec<Permission> {
        role_names.iter().flat_map(|name| self.resolve(name)).collect()
    }

    pub fn is_global_admin(&self, role_names: &[String]) -> bool {
        role_names.iter().any(|name| self.templates.get(name).is_some_and(|t| t.is_global_admin))
    }
}

fn seed_templates() -> Vec<RoleTemplate> {
    let all_resources = [
        Resource::Users,
        Resource::Tenants,
        Resource::Sessions,
        Resource::Queries,
        Resource::Schemas,
        Resource::Reports,
        Resource::Audit,
        Resource::Settings,
    ];
    let tenant_scoped_resources = [
        Resource::Users,
        Resource::Sessions,
        Resource::Queries,
        Resource::Schemas,
        Resource::Reports,
        Resource::Audit,
        Resource::Settings,
    ];

    vec![
        RoleTemplate {
            name: "super_admin".to_string(),
            version: 1,
            parent: None,
            permissions: all_resources.iter().map(|r| Permission::new(*r, Level::Admin)).collect(),
            is_global_admin: true,
        },
        RoleTemplate {
            name: "admin".to_string(),
            version: 1,
            parent: None,
            permissions: tenant_scoped_resources.iter().map(|r| Permission::new(*r, Level::Admin)).collect(),
            is_global_admin: false,
        },
        RoleTemplate {
            name: "analyst".to_string(),
            version: 1,
            parent: None,
            permissions: vec![
                Permission::new(Resource::Queries, Level::Create),
                Permission::new(Resource::Schemas, Level::Create),
            ],
            is_global_admin: false,
        },
        RoleTemplate {
            name: "business_user".to_string(),
            version: 1,
            parent: None,
            permissions: vec![
                Permission::new(Resource::Queries, Level::Read),
                Permission::new(Resource::Reports, Level::Read),
            ],
            is_global_admin: false,
        },
        RoleTemplate {
            name: "viewer".to_string(),
            version: 1,
            parent: None,
            permissions: vec![Permission::new(Resource::Reports, Level::Read)],
            is_global_admin: false,
        },
        RoleTemplate {
            name: "api_user".to_string(),
            version: 1,
            parent: None,
            permissions: vec![Permission::new(Resource::Queries, Level::Create)],
            is_global_admin: false,
        },
        RoleTemplate {
            name: "guest".to_string(),
            version: 1,
            parent: None,
            permissions: vec![
                Permission::new(Resource::Queries, Level::Read).with_conditions(json!({"read_only": true})),
            ],
            is_global_admin: false,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn seeded_templates_are_present() {
        let catalog = RoleCatalog::new();
        for name in ["super_admin", "admin", "analyst", "business_user", "viewer", "api_user", "guest"] {
            assert!(catalog.get(name).is_some(), "missing seeded template {name}");
        }
    }

    #[test]
    fn super_admin_is_flagged_global_admin() {
        let catalog = RoleCatalog::new();
        assert!(catalog.is_global_admin(&["super_admin".to_string()]));
        assert!(!catalog.is_global_admin(&["admin".to_string()]));
    }

    #[test]
    fn child_role_inherits_parent_permissions() {
        let mut catalog = RoleCatalog::new();
        catalog.insert(RoleTemplate {
            name: "senior_analyst".to_string(),
            version: 1,
            parent: Some("analyst".to_string()),
            permissions: vec![Permission::new(Resource::Reports, Level::Write)],
            is_global_admin: false,
        });

        let resolved = catalog.resolve("senior_analyst");
        assert!(resolved.iter().any(|p| p.resource == Resource::Queries && p.level == Level::Create));
        assert!(resolved.iter().any(|p| p.resource == Resource::Reports && p.level == Level::Write));
    }

    #[test]
    fn guest_queries_are_conditioned_read_only() {
        let catalog = RoleCatalog::new();
        let permissions = catalog.effective_permissions(&["guest".to_string()]);
        let guest_query_permission = permissions.iter().find(|p| p.resource == Resource::Queries).unwrap();
        assert!(guest_query_permission.covers(Resource::Queries, Level::Read, &json!({"read_only": true})));
        assert!(!guest_query_permission.covers(Resource::Queries, Level::Read, &Value::Null));
    }

    #[test]
    fn cyclic_parent_chain_terminates() {
        let mut catalog = RoleCatalog::new();
        catalog.insert(RoleTemplate {
            name: "a".to_string(),
            version: 1,
            parent: Some("b".to_string()),
            permissions: vec![],
            is_global_admin: false,
        });
        catalog.insert(RoleTemplate {
            name: "b".to_string(),
            version: 1,
            parent: Some("a".to_string()),
            permissions: vec![],
            is_global_admin: false,
        });

        // Must return, not recurse forever.
        let _ = catalog.resolve("a");
    }
}
