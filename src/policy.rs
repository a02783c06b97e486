//! Role-keyed limits, capability checks and the audit sink.

use serde::{Deserialize, Serialize};

const MB: u64 = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Reader,
    Uploader,
    Moderator,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Reader => "reader",
            Role::Uploader => "uploader",
            Role::Moderator => "moderator",
            Role::Admin => "admin",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "reader" => Ok(Role::Reader),
            "uploader" => Ok(Role::Uploader),
            "moderator" => Ok(Role::Moderator),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// Upload and request ceilings for one role.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RoleLimits {
    pub can_upload: bool,
    pub max_file_size_mb: u64,
    pub storage_quota_mb: u64,
    pub daily_uploads: u32,
    pub requests_per_minute: u32,
}

impl RoleLimits {
    pub fn max_file_bytes(&self) -> u64 {
        self.max_file_size_mb * MB
    }

    pub fn storage_quota_bytes(&self) -> u64 {
        self.storage_quota_mb * MB
    }
}

impl Default for RoleLimits {
    fn default() -> Self {
        Self {
            can_upload: false,
            max_file_size_mb: 0,
            storage_quota_mb: 0,
            daily_uploads: 0,
            requests_per_minute: 60,
        }
    }
}

/// Role → limits table. Loaded from `[quota.<role>]` and handed to the
/// quota guard as a value.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RolePolicy {
    pub reader: RoleLimits,
    pub uploader: RoleLimits,
    pub moderator: RoleLimits,
    pub admin: RoleLimits,
}

impl RolePolicy {
    pub fn limits(&self, role: Role) -> &RoleLimits {
        match role {
            Role::Reader => &self.reader,
            Role::Uploader => &self.uploader,
            Role::Moderator => &self.moderator,
            Role::Admin => &self.admin,
        }
    }

    pub fn max_file_bytes_any_role(&self) -> u64 {
        [&self.reader, &self.uploader, &self.moderator, &self.admin]
            .iter()
            .filter(|l| l.can_upload)
            .map(|l| l.max_file_bytes())
            .max()
            .unwrap_or(0)
    }
}

impl Default for RolePolicy {
    fn default() -> Self {
        Self {
            reader: RoleLimits::default(),
            uploader: RoleLimits {
                can_upload: true,
                max_file_size_mb: 200,
                storage_quota_mb: 5 * 1024,
                daily_uploads: 50,
                requests_per_minute: 60,
            },
            moderator: RoleLimits {
                can_upload: true,
                max_file_size_mb: 500,
                storage_quota_mb: 20 * 1024,
                daily_uploads: 200,
                requests_per_minute: 120,
            },
            admin: RoleLimits {
                can_upload: true,
                max_file_size_mb: 1024,
                storage_quota_mb: 100 * 1024,
                daily_uploads: 1000,
                requests_per_minute: 600,
            },
        }
    }
}

/// The authenticated caller, as resolved by the upstream auth layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub user_id: i64,
    pub role: Role,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Upload,
    ProcessNow,
    DeleteUpload,
    ViewActivity,
}

/// Yes/no capability check consumed by the intake boundary.
pub trait PermissionCheck: Send + Sync {
    fn allows(&self, actor: &Actor, capability: Capability) -> bool;
}

/// Answers capability checks from the role table alone.
#[derive(Debug, Clone)]
pub struct RolePermissions {
    policy: RolePolicy,
}

impl RolePermissions {
    pub fn new(policy: RolePolicy) -> Self {
        Self { policy }
    }
}

impl PermissionCheck for RolePermissions {
    fn allows(&self, actor: &Actor, capability: Capability) -> bool {
        match capability {
            Capability::Upload | Capability::DeleteUpload => {
                self.policy.limits(actor.role).can_upload
            }
            Capability::ProcessNow | Capability::ViewActivity => {
                matches!(actor.role, Role::Moderator | Role::Admin)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub user_id: i64,
    pub action: &'static str,
    pub target: String,
    pub detail: String,
}

/// Fire-and-forget audit record sink.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Writes audit events to the `audit` tracing target.
#[derive(Debug, Default, Clone)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        tracing::info!(
            target: "audit",
            user_id = event.user_id,
            action = event.action,
            target_id = %event.target,
            "{}",
            event.detail
        );
    }
}
