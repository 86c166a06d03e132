//! Circuit isolation keys.
//!
//! ```text
//! {project}:global
//! {project}:pool:{name}
//! {project}:instance:{host}
//! {project}:tenant:{id}
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies one isolated breaker. Distinct keys never share state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CircuitKey(String);

/// Scope default used when no specifier is given.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitScope {
    #[default]
    Global,
    Pool,
    Instance,
    Tenant,
}

impl CircuitKey {
    pub fn global(project: &str) -> Self {
        Self(format!("{project}:global"))
    }

    pub fn pool(project: &str, name: &str) -> Self {
        Self(format!("{project}:pool:{name}"))
    }

    pub fn instance(project: &str, host: &str) -> Self {
        Self(format!("{project}:instance:{host}"))
    }

    pub fn tenant(project: &str, id: &str) -> Self {
        Self(format!("{project}:tenant:{id}"))
    }

    /// Build a key from whatever the caller knows.
    ///
    /// Explicit specifiers override `scope`; among them pool wins over
    /// instance, which wins over tenant. A scope naming a specifier that was
    /// not supplied degrades to the global key.
    pub fn resolve(
        project: &str,
        scope: CircuitScope,
        pool: Option<&str>,
        instance: Option<&str>,
        tenant: Option<&str>,
    ) -> Self {
        if let Some(name) = pool {
            return Self::pool(project, name);
        }
        if let Some(host) = instance {
            return Self::instance(project, host);
        }
        if let Some(id) = tenant {
            return Self::tenant(project, id);
        }
        if scope != CircuitScope::Global {
            tracing::debug!(project = %project, scope = ?scope, "Scope specifier missing, using global circuit");
        }
        Self::global(project)
    }

    /// Wrap an existing key string (e.g. read back from the store).
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CircuitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
