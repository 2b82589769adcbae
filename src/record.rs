//! Log submissions, stored log records and paged listing
//!
//! A [`LogSubmission`] is what a client puts on the queue. Once accepted by
//! the router it becomes an immutable [`LogRecord`] with a server-assigned ID
//! and receive time.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::tenant::TenantId;

/// Maximum page size for log listings
pub const MAX_PAGE_SIZE: usize = 1000;

/// Optional telemetry attributes attached to an event
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    pub version: Option<String>,
    pub environment: Option<String>,
    pub system: Option<String>,
    pub platform: Option<String>,
    pub language: Option<String>,
    pub device_id: Option<String>,
    pub ip_address: Option<String>,
    pub memory: Option<f64>,
    pub cpu: Option<f64>,
    pub memory_percent: Option<f64>,
    pub cpu_percent: Option<f64>,
    pub user_id: Option<String>,
    pub user_role: Option<String>,
    pub action: Option<String>,
    pub stack_trace: Option<String>,
    pub tag: Option<String>,
}

/// A log event as submitted by a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogSubmission {
    /// Severity name; `info`, `warning`, `error` or `critical`
    #[serde(default = "default_severity")]
    pub severity: String,
    /// Log message
    pub message: String,
    /// Owning tenant
    pub tenant_id: TenantId,
    /// Client-side timestamp; informational only, never stored
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    /// Optional telemetry
    #[serde(flatten)]
    pub telemetry: Telemetry,
}

fn default_severity() -> String {
    "info".to_string()
}

impl LogSubmission {
    /// Create a submission with no telemetry
    pub fn new(tenant_id: TenantId, severity: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: severity.into(),
            message: message.into(),
            tenant_id,
            timestamp: None,
            telemetry: Telemetry::default(),
        }
    }

    /// Set the client timestamp
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Set the telemetry attributes
    pub fn with_telemetry(mut self, telemetry: Telemetry) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Decode a queue payload
    pub fn decode(payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload).map_err(|e| Error::poison(format!("Undecodable log submission: {}", e)))
    }

    /// Encode as a queue payload
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// A stored log record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Server-assigned ID
    pub id: Uuid,
    /// Owning tenant
    pub tenant_id: TenantId,
    /// Severity as submitted
    pub severity: String,
    /// Log message
    pub message: String,
    /// Server receive time
    pub received_at: DateTime<Utc>,
    /// Optional telemetry
    #[serde(flatten)]
    pub telemetry: Telemetry,
}

impl LogRecord {
    /// Build a record from an accepted submission, stamping a fresh ID and
    /// the given receive time. The client timestamp is discarded.
    pub fn accept(submission: LogSubmission, received_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id: submission.tenant_id,
            severity: submission.severity,
            message: submission.message,
            received_at,
            telemetry: submission.telemetry,
        }
    }
}

/// Sort order for log listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortOrder {
    /// Ascending order (oldest first)
    Ascending,
    /// Descending order (newest first)
    Descending,
}

/// Fields a log listing can be sorted by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogSortField {
    ReceivedAt,
    Severity,
    Message,
    Version,
    Environment,
    Platform,
    DeviceId,
    UserId,
    Action,
    Tag,
    Memory,
    Cpu,
}

impl LogSortField {
    /// Parse a field name; accepts snake_case and the legacy PascalCase names.
    pub fn from_str(name: &str) -> Result<Self> {
        let normalized: String = name
            .chars()
            .filter(|c| *c != '_')
            .collect::<String>()
            .to_lowercase();

        match normalized.as_str() {
            "receivedat" | "datetime" | "timestamp" => Ok(Self::ReceivedAt),
            "severity" | "level" => Ok(Self::Severity),
            "message" => Ok(Self::Message),
            "version" => Ok(Self::Version),
            "environment" => Ok(Self::Environment),
            "platform" => Ok(Self::Platform),
            "deviceid" => Ok(Self::DeviceId),
            "userid" => Ok(Self::UserId),
            "action" => Ok(Self::Action),
            "tag" => Ok(Self::Tag),
            "memory" | "mem" => Ok(Self::Memory),
            "cpu" => Ok(Self::Cpu),
            _ => Err(Error::validation(format!("Unknown sort field: {}", name))),
        }
    }

    /// Compare two records by this field
    pub fn compare(&self, a: &LogRecord, b: &LogRecord) -> Ordering {
        let (ta, tb) = (&a.telemetry, &b.telemetry);
        match self {
            Self::ReceivedAt => a.received_at.cmp(&b.received_at),
            Self::Severity => a.severity.cmp(&b.severity),
            Self::Message => a.message.cmp(&b.message),
            Self::Version => ta.version.cmp(&tb.version),
            Self::Environment => ta.environment.cmp(&tb.environment),
            Self::Platform => ta.platform.cmp(&tb.platform),
            Self::DeviceId => ta.device_id.cmp(&tb.device_id),
            Self::UserId => ta.user_id.cmp(&tb.user_id),
            Self::Action => ta.action.cmp(&tb.action),
            Self::Tag => ta.tag.cmp(&tb.tag),
            Self::Memory => cmp_f64(ta.memory, tb.memory),
            Self::Cpu => cmp_f64(ta.cpu, tb.cpu),
        }
    }
}

fn cmp_f64(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.total_cmp(&b),
        (a, b) => a.is_some().cmp(&b.is_some()),
    }
}

/// A page of a log listing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    /// 1-based page number
    pub page: usize,
    /// Records per page
    pub size: usize,
    /// Sort field
    pub sort: LogSortField,
    /// Sort order
    pub order: SortOrder,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            size: 10,
            sort: LogSortField::ReceivedAt,
            order: SortOrder::Descending,
        }
    }
}

impl PageRequest {
    /// Build a page request from untyped parameters
    pub fn parse(page: usize, size: usize, sort_by: Option<&str>, descending: bool) -> Result<Self> {
        let request = Self {
            page,
            size,
            sort: sort_by.map(LogSortField::from_str).transpose()?.unwrap_or(LogSortField::ReceivedAt),
            order: if descending { SortOrder::Descending } else { SortOrder::Ascending },
        };
        request.validate()?;
        Ok(request)
    }

    /// Validate the page bounds
    pub fn validate(&self) -> Result<()> {
        if self.page < 1 {
            return Err(Error::validation("Page number must be at least 1"));
        }
        if self.size < 1 || self.size > MAX_PAGE_SIZE {
            return Err(Error::validation(format!(
                "Page size must be between 1 and {}",
                MAX_PAGE_SIZE
            )));
        }
        Ok(())
    }

    /// Sort records and cut out this page
    pub fn apply(&self, mut records: Vec<LogRecord>) -> Vec<LogRecord> {
        records.sort_by(|a, b| {
            let ord = self.sort.compare(a, b);
            match self.order {
                SortOrder::Ascending => ord,
                SortOrder::Descending => ord.reverse(),
            }
        });

        records
            .into_iter()
            .skip((self.page - 1) * self.size)
            .take(self.size)
            .collect()
    }
}
