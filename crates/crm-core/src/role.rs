//! Roles and the permission table
//!
//! Permissions are a pure function of the role. Nothing here is stored;
//! changing what a role may do is a code change, never a data migration.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{CrmError, ValidationFailure};

/// Access level granted to a user within a tenant (or platform-wide)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Global role, granted with no tenant reference
    PlatformAdmin,
    TenantOwner,
    TenantAdmin,
    Agent,
    Assistant,
    Viewer,
}

impl Role {
    pub const ALL: [Role; 6] = [
        Role::PlatformAdmin,
        Role::TenantOwner,
        Role::TenantAdmin,
        Role::Agent,
        Role::Assistant,
        Role::Viewer,
    ];

    /// Roles accepted by `require_admin`
    pub const ADMINS: [Role; 3] = [Role::PlatformAdmin, Role::TenantOwner, Role::TenantAdmin];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::PlatformAdmin => "platform_admin",
            Role::TenantOwner => "tenant_owner",
            Role::TenantAdmin => "tenant_admin",
            Role::Agent => "agent",
            Role::Assistant => "assistant",
            Role::Viewer => "viewer",
        }
    }

    /// Platform-level roles are granted with a null tenant reference
    pub fn is_platform(&self) -> bool {
        matches!(self, Role::PlatformAdmin)
    }

    pub fn is_admin(&self) -> bool {
        Self::ADMINS.contains(self)
    }

    /// Whether a holder of `self` may hand `target` to someone else inside a tenant
    pub fn can_grant(&self, target: Role) -> bool {
        match target {
            Role::PlatformAdmin => false,
            Role::TenantOwner => matches!(self, Role::PlatformAdmin | Role::TenantOwner),
            _ => self.is_admin(),
        }
    }

    /// The permission set this role implies
    pub fn permissions(&self) -> PermissionSet {
        PermissionSet::for_role(*self)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = CrmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "platform_admin" => Ok(Role::PlatformAdmin),
            "tenant_owner" => Ok(Role::TenantOwner),
            "tenant_admin" => Ok(Role::TenantAdmin),
            "agent" => Ok(Role::Agent),
            "assistant" => Ok(Role::Assistant),
            "viewer" => Ok(Role::Viewer),
            other => Err(CrmError::Validation(ValidationFailure::InvalidRole(
                format!("unknown role '{other}'"),
            ))),
        }
    }
}

/// Things a permission can be about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    Properties,
    Contacts,
    Leads,
    Relationships,
    Users,
    Settings,
    Tenants,
}

impl Resource {
    const BUSINESS: [Resource; 4] = [
        Resource::Properties,
        Resource::Contacts,
        Resource::Leads,
        Resource::Relationships,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Resource::Properties => "properties",
            Resource::Contacts => "contacts",
            Resource::Leads => "leads",
            Resource::Relationships => "relationships",
            Resource::Users => "users",
            Resource::Settings => "settings",
            Resource::Tenants => "tenants",
        }
    }

    /// Lenient parse; unknown names yield `None` so callers deny
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "properties" => Some(Resource::Properties),
            "contacts" => Some(Resource::Contacts),
            "leads" => Some(Resource::Leads),
            "relationships" => Some(Resource::Relationships),
            "users" => Some(Resource::Users),
            "settings" => Some(Resource::Settings),
            "tenants" => Some(Resource::Tenants),
            _ => None,
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operations on a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Read,
    Write,
    Delete,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Read => "read",
            Action::Write => "write",
            Action::Delete => "delete",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "read" => Some(Action::Read),
            "write" => Some(Action::Write),
            "delete" => Some(Action::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A (resource, action) capability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Permission {
    pub resource: Resource,
    pub action: Action,
}

impl Permission {
    pub const fn new(resource: Resource, action: Action) -> Self {
        Self { resource, action }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.resource, self.action)
    }
}

/// Effective permissions of a role, keyed by resource
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionSet(BTreeMap<Resource, BTreeSet<Action>>);

const READ: &[Action] = &[Action::Read];
const READ_WRITE: &[Action] = &[Action::Read, Action::Write];
const FULL: &[Action] = &[Action::Read, Action::Write, Action::Delete];

impl PermissionSet {
    /// Build the permission set for a role from the static table
    pub fn for_role(role: Role) -> Self {
        let mut set = PermissionSet::default();
        match role {
            Role::PlatformAdmin => {
                for resource in Resource::BUSINESS {
                    set.grant(resource, FULL);
                }
                set.grant(Resource::Users, FULL);
                set.grant(Resource::Settings, FULL);
                set.grant(Resource::Tenants, FULL);
            }
            Role::TenantOwner | Role::TenantAdmin => {
                for resource in Resource::BUSINESS {
                    set.grant(resource, FULL);
                }
                set.grant(Resource::Users, FULL);
                set.grant(Resource::Settings, FULL);
            }
            Role::Agent => {
                for resource in Resource::BUSINESS {
                    set.grant(resource, READ_WRITE);
                }
                set.grant(Resource::Settings, READ);
            }
            Role::Assistant => {
                set.grant(Resource::Properties, READ);
                set.grant(Resource::Contacts, READ_WRITE);
                set.grant(Resource::Leads, READ_WRITE);
                set.grant(Resource::Relationships, READ);
                set.grant(Resource::Settings, READ);
            }
            Role::Viewer => {
                for resource in Resource::BUSINESS {
                    set.grant(resource, READ);
                }
            }
        }
        set
    }

    fn grant(&mut self, resource: Resource, actions: &[Action]) {
        self.0
            .entry(resource)
            .or_default()
            .extend(actions.iter().copied());
    }

    pub fn contains(&self, permission: Permission) -> bool {
        self.0
            .get(&permission.resource)
            .is_some_and(|actions| actions.contains(&permission.action))
    }

    /// String-keyed check. Unknown resources or actions are denied, never an error.
    pub fn allows(&self, resource: &str, action: &str) -> bool {
        match (Resource::parse(resource), Action::parse(action)) {
            (Some(resource), Some(action)) => self.contains(Permission::new(resource, action)),
            _ => false,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = Permission> + '_ {
        self.0.iter().flat_map(|(resource, actions)| {
            actions
                .iter()
                .map(move |action| Permission::new(*resource, *action))
        })
    }

    pub fn actions_for(&self, resource: Resource) -> Vec<Action> {
        self.0
            .get(&resource)
            .map(|actions| actions.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
