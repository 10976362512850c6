//! Host and role definitions for the windlass inventory.
//!
//! Hosts are grouped by functional role (application, web, database);
//! tasks declare the roles they target and the inventory resolves that
//! to a concrete host list.

use std::collections::{BTreeMap, HashSet};

use serde::Deserialize;

use crate::error::{Error, Result};

/// A functional grouping of hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Application servers
    App,
    /// Web servers
    Web,
    /// Database servers
    Db,
}

impl Role {
    /// Every role, in declaration order.
    pub const ALL: [Role; 3] = [Role::App, Role::Web, Role::Db];
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::App => write!(f, "app"),
            Role::Web => write!(f, "web"),
            Role::Db => write!(f, "db"),
        }
    }
}

/// One managed host with its connection options and role membership.
///
/// Immutable once resolved for a task invocation.
#[derive(Debug, Clone)]
pub struct Host {
    /// Host identifier, also the address the transport connects to
    pub name: String,
    /// SSH port
    pub port: u16,
    /// Login user; transports fall back to the local user when unset
    pub user: Option<String>,
    /// Host-specific secret, consulted before any configured default
    pub password: Option<String>,
    /// Marks the primary database server
    pub primary: bool,
    /// Roles this host belongs to
    pub roles: HashSet<Role>,
}

impl Host {
    /// Creates a host with default connection options and the given roles.
    pub fn new(name: impl Into<String>, roles: impl IntoIterator<Item = Role>) -> Self {
        Self {
            name: name.into(),
            port: 22,
            user: None,
            password: None,
            primary: false,
            roles: roles.into_iter().collect(),
        }
    }
}

/// A host entry in the configuration file.
///
/// Either a bare hostname string or a table with per-host options.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum HostDef {
    /// `app = ["app1.example.com"]`
    Name(String),
    /// `app = [{ host = "app1.example.com", port = 2222, primary = true }]`
    Full {
        /// Host identifier/address
        host: String,
        /// SSH port
        #[serde(default = "default_port")]
        port: u16,
        /// Login user
        #[serde(default)]
        user: Option<String>,
        /// Host-specific secret
        #[serde(default)]
        password: Option<String>,
        /// Primary flag, meaningful for database hosts
        #[serde(default)]
        primary: bool,
    },
}

fn default_port() -> u16 {
    22
}

/// The `[roles]` section of the configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RolesConfig {
    /// Application servers
    #[serde(default)]
    pub app: Vec<HostDef>,
    /// Web servers
    #[serde(default)]
    pub web: Vec<HostDef>,
    /// Database servers
    #[serde(default)]
    pub db: Vec<HostDef>,
}

/// The resolved set of hosts, grouped by role.
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    hosts: Vec<Host>,
}

impl Inventory {
    /// Builds an inventory from an explicit host list.
    pub fn new(hosts: Vec<Host>) -> Self {
        Self { hosts }
    }

    /// Builds an inventory from the `[roles]` configuration section.
    ///
    /// A host named in more than one role resolves to a single entry
    /// carrying the union of its roles; conflicting per-host options are
    /// a configuration error.
    pub fn from_config(roles: &RolesConfig) -> Result<Self> {
        let mut by_name: BTreeMap<String, Host> = BTreeMap::new();
        let mut order: Vec<String> = Vec::new();

        for (role, defs) in [
            (Role::App, &roles.app),
            (Role::Web, &roles.web),
            (Role::Db, &roles.db),
        ] {
            for def in defs {
                let (name, port, user, password, primary) = match def {
                    HostDef::Name(name) => (name.clone(), default_port(), None, None, false),
                    HostDef::Full {
                        host,
                        port,
                        user,
                        password,
                        primary,
                    } => (
                        host.clone(),
                        *port,
                        user.clone(),
                        password.clone(),
                        *primary,
                    ),
                };

                match by_name.get_mut(&name) {
                    Some(existing) => {
                        if existing.port != port || existing.user != user {
                            return Err(Error::invalid_config(
                                name,
                                "host declared with conflicting connection options",
                            ));
                        }
                        existing.roles.insert(role);
                        existing.primary |= primary;
                        if existing.password.is_none() {
                            existing.password = password;
                        }
                    }
                    None => {
                        order.push(name.clone());
                        by_name.insert(
                            name.clone(),
                            Host {
                                name,
                                port,
                                user,
                                password,
                                primary,
                                roles: HashSet::from([role]),
                            },
                        );
                    }
                }
            }
        }

        let hosts = order
            .into_iter()
            .map(|name| by_name.remove(&name).expect("host recorded in order"))
            .collect();
        Ok(Self { hosts })
    }

    /// All hosts, in declaration order.
    pub fn hosts(&self) -> &[Host] {
        &self.hosts
    }

    /// Hosts belonging to any of the given roles, deduplicated, in
    /// declaration order.
    pub fn resolve(&self, roles: &[Role]) -> Vec<Host> {
        self.hosts
            .iter()
            .filter(|h| roles.iter().any(|r| h.roles.contains(r)))
            .cloned()
            .collect()
    }

    /// Like [`resolve`](Self::resolve), with an additional host filter.
    pub fn resolve_where(&self, roles: &[Role], filter: impl Fn(&Host) -> bool) -> Vec<Host> {
        self.resolve(roles).into_iter().filter(|h| filter(h)).collect()
    }
}
