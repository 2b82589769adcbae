//! Tenant model and severity policy
//!
//! A tenant is a registered application whose logs are isolated on exactly
//! one shard and filtered by per-severity enable flags.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Tenant ID type
pub type TenantId = Uuid;

/// The four severities a tenant can enable or disable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    /// Parse a severity name case-insensitively; unknown names yield `None`
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "info" => Some(Self::Info),
            "warning" => Some(Self::Warning),
            "error" => Some(Self::Error),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }

    /// Get the canonical name of the severity
    pub fn name(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A registered tenant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    /// Unique tenant ID
    pub id: TenantId,
    /// Display name
    pub name: String,
    /// Inactive tenants have all their events dropped
    pub active: bool,
    /// Accept `info` events
    pub info_enabled: bool,
    /// Accept `warning` events
    pub warning_enabled: bool,
    /// Accept `error` events
    pub error_enabled: bool,
    /// Accept `critical` events
    pub critical_enabled: bool,
    /// How long logs are kept before the retention sweep removes them
    #[serde(with = "duration_secs")]
    pub retention: Duration,
    /// Owner of the tenant
    pub owner: Uuid,
}

impl Tenant {
    /// Create a new active tenant with every severity enabled
    pub fn new(name: impl Into<String>, owner: Uuid, retention: Duration) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            active: true,
            info_enabled: true,
            warning_enabled: true,
            error_enabled: true,
            critical_enabled: true,
            retention,
            owner,
        }
    }

    /// Set the ID
    pub fn with_id(mut self, id: TenantId) -> Self {
        self.id = id;
        self
    }

    /// Enable or disable one severity
    pub fn with_severity(mut self, severity: Severity, enabled: bool) -> Self {
        self.set_severity(severity, enabled);
        self
    }

    /// Set the active flag
    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    /// Enable or disable one severity in place
    pub fn set_severity(&mut self, severity: Severity, enabled: bool) {
        match severity {
            Severity::Info => self.info_enabled = enabled,
            Severity::Warning => self.warning_enabled = enabled,
            Severity::Error => self.error_enabled = enabled,
            Severity::Critical => self.critical_enabled = enabled,
        }
    }

    /// Whether events of this severity are accepted
    pub fn is_enabled(&self, severity: Severity) -> bool {
        match severity {
            Severity::Info => self.info_enabled,
            Severity::Warning => self.warning_enabled,
            Severity::Error => self.error_enabled,
            Severity::Critical => self.critical_enabled,
        }
    }

    /// Check a raw severity string against the enable flags.
    ///
    /// Unrecognised severities pass.
    pub fn accepts(&self, severity: &str) -> bool {
        Severity::parse(severity).map_or(true, |s| self.is_enabled(s))
    }

    /// Apply a partial update
    pub fn apply(&mut self, update: &TenantUpdate) {
        if let Some(ref name) = update.name {
            self.name = name.clone();
        }
        if let Some(active) = update.active {
            self.active = active;
        }
        if let Some(retention) = update.retention {
            self.retention = retention;
        }
        for (severity, flag) in [
            (Severity::Info, update.info_enabled),
            (Severity::Warning, update.warning_enabled),
            (Severity::Error, update.error_enabled),
            (Severity::Critical, update.critical_enabled),
        ] {
            if let Some(enabled) = flag {
                self.set_severity(severity, enabled);
            }
        }
    }
}

/// Request to register a tenant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTenant {
    pub name: String,
    pub owner: Uuid,
}

/// Partial update of a tenant; `None` fields are left unchanged
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TenantUpdate {
    pub name: Option<String>,
    pub active: Option<bool>,
    pub info_enabled: Option<bool>,
    pub warning_enabled: Option<bool>,
    pub error_enabled: Option<bool>,
    pub critical_enabled: Option<bool>,
    #[serde(default, with = "opt_duration_secs")]
    pub retention: Option<Duration>,
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

mod opt_duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&d.as_secs()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(d).map(|o| o.map(Duration::from_secs))
    }
}
