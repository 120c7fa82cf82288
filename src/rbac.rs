use std::collections::{BTreeSet, HashMap};

use crate::error::{Error, Result};
use crate::models::{Role, User};

pub const SYSTEM_ACTOR: &str = "system";

/// Permission set held by the acting user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Permissions {
    granted: BTreeSet<String>,
}

impl Permissions {
    pub fn all() -> Self {
        Self::from_iter(["*"])
    }

    pub fn allows(&self, required: &str) -> bool {
        if self.granted.contains("*") || self.granted.contains(required) {
            return true;
        }
        match required.split_once(':') {
            Some((resource, _)) => self.granted.contains(&format!("{resource}:*")),
            None => false,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.granted.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for Permissions {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            granted: iter.into_iter().map(Into::into).collect(),
        }
    }
}

/// User to role to permissions. Unknown users or roles resolve to nothing.
pub fn resolve_permissions(user: Option<&User>, roles: &[Role]) -> Permissions {
    let Some(user) = user else {
        return Permissions::default();
    };
    let by_name: HashMap<&str, &Role> = roles.iter().map(|r| (r.name.as_str(), r)).collect();
    by_name
        .get(user.role.as_str())
        .map(|role| role.permissions.iter().cloned().collect())
        .unwrap_or_default()
}

/// The user a command runs as, with its resolved permissions.
#[derive(Debug, Clone)]
pub struct Actor {
    pub name: String,
    pub permissions: Permissions,
}

impl Actor {
    pub fn system() -> Self {
        Self {
            name: SYSTEM_ACTOR.to_string(),
            permissions: Permissions::all(),
        }
    }

    pub fn authorize(&self, required: &str) -> Result<()> {
        if self.permissions.allows(required) {
            Ok(())
        } else {
            tracing::warn!(actor = %self.name, permission = required, "authorization denied");
            Err(Error::Forbidden {
                actor: self.name.clone(),
                permission: required.to_string(),
            })
        }
    }
}

/// Roles created by `seed`.
pub fn default_roles() -> Vec<Role> {
    let role = |name: &str, permissions: &[&str]| Role {
        name: name.to_string(),
        permissions: permissions.iter().map(|p| p.to_string()).collect(),
    };
    vec![
        role("admin", &["*"]),
        role(
            "evaluator",
            &["evaluation-forms:read", "evaluation-form-responses:create"],
        ),
        role(
            "viewer",
            &["evaluation-forms:read", "personnel:read", "reports:read"],
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(role: &str) -> User {
        User {
            email: "jules@example.com".to_string(),
            display_name: "Jules Moreno".to_string(),
            role: role.to_string(),
        }
    }

    #[test]
    fn exact_and_wildcard_grants() {
        let perms: Permissions = ["personnel:*", "reports:read"].into_iter().collect();
        assert!(perms.allows("reports:read"));
        assert!(perms.allows("personnel:delete"));
        assert!(!perms.allows("reports:export"));
        assert!(!perms.allows("audit-logs:read"));
        assert!(Permissions::all().allows("anything:at-all"));
    }

    #[test]
    fn resolves_through_user_role() {
        let roles = default_roles();
        let perms = resolve_permissions(Some(&user("evaluator")), &roles);
        assert!(perms.allows("evaluation-form-responses:create"));
        assert!(!perms.allows("evaluation-forms:create"));
    }

    #[test]
    fn unknown_user_or_role_has_no_permissions() {
        let roles = default_roles();
        assert_eq!(resolve_permissions(None, &roles), Permissions::default());
        assert!(!resolve_permissions(Some(&user("janitor")), &roles).allows("reports:read"));
    }

    #[test]
    fn authorize_reports_missing_permission() {
        let actor = Actor {
            name: "jules@example.com".to_string(),
            permissions: resolve_permissions(Some(&user("viewer")), &default_roles()),
        };
        assert!(actor.authorize("reports:read").is_ok());
        let err = actor.authorize("personnel:import").unwrap_err();
        assert_eq!(
            err.to_string(),
            "jules@example.com lacks permission personnel:import"
        );
        assert!(Actor::system().authorize("personnel:import").is_ok());
    }
}
