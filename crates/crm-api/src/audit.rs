//! Security audit logging
//!
//! Every security-relevant action produces exactly one [`AuditEvent`],
//! emitted under the "audit" tracing target so it can be filtered and
//! routed separately from application logs.
//!
//! Refresh-token reuse and access denials are logged at WARN, the rest at
//! INFO. Events never carry passwords or raw tokens.
//!
//! ```ignore
//! use crm_api::audit::{audit_log, AuditEvent};
//!
//! audit_log(&AuditEvent::LoginSuccess {
//!     user_id: user.id,
//!     email: user.email.clone(),
//!     tenant: "demo".to_string(),
//!     session_id: session.id,
//!     ip_address: Some("192.168.1.1".to_string()),
//!     user_agent: None,
//! });
//! ```

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

/// Security audit events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum AuditEvent {
    RegistrationSuccess {
        user_id: Uuid,
        email: String,
        tenant: String,
        role: String,
        ip_address: Option<String>,
        user_agent: Option<String>,
    },

    RegistrationFailure {
        email: String,
        tenant: String,
        reason: String,
        ip_address: Option<String>,
        user_agent: Option<String>,
    },

    LoginSuccess {
        user_id: Uuid,
        email: String,
        tenant: String,
        session_id: Uuid,
        ip_address: Option<String>,
        user_agent: Option<String>,
    },

    /// Reason is the internal kind; clients only ever see "Invalid credentials"
    LoginFailure {
        email: String,
        tenant: String,
        reason: String,
        ip_address: Option<String>,
        user_agent: Option<String>,
    },

    Logout {
        user_id: Option<Uuid>,
        session_id: Option<Uuid>,
        logout_all_devices: bool,
        sessions_revoked: u64,
        ip_address: Option<String>,
    },

    SessionRefresh {
        user_id: Uuid,
        session_id: Uuid,
        ip_address: Option<String>,
        user_agent: Option<String>,
    },

    /// A consumed refresh token was presented again
    RefreshTokenReuse {
        session_id: Uuid,
        family_revoked: bool,
        ip_address: Option<String>,
        user_agent: Option<String>,
    },

    PasswordChange {
        user_id: Uuid,
        email: String,
        sessions_revoked: u64,
        ip_address: Option<String>,
    },

    InvitationCreated {
        invitation_id: Uuid,
        tenant_id: Uuid,
        email: String,
        role: String,
        invited_by: Uuid,
    },

    InvitationAccepted {
        user_id: Uuid,
        tenant_id: Uuid,
        role: String,
        ip_address: Option<String>,
    },

    MembershipChanged {
        actor_id: Uuid,
        user_id: Uuid,
        tenant_id: Uuid,
        old_role: String,
        /// `None` when the membership was deactivated
        new_role: Option<String>,
    },

    AccessDenied {
        user_id: Option<Uuid>,
        tenant: Option<String>,
        resource: String,
        reason: String,
        ip_address: Option<String>,
        user_agent: Option<String>,
    },

    InvalidSession {
        reason: String,
        ip_address: Option<String>,
        user_agent: Option<String>,
    },
}

impl AuditEvent {
    /// Stable event name, matching the serialized `event_type`
    pub fn name(&self) -> &'static str {
        match self {
            AuditEvent::RegistrationSuccess { .. } => "registration_success",
            AuditEvent::RegistrationFailure { .. } => "registration_failure",
            AuditEvent::LoginSuccess { .. } => "login_success",
            AuditEvent::LoginFailure { .. } => "login_failure",
            AuditEvent::Logout { .. } => "logout",
            AuditEvent::SessionRefresh { .. } => "session_refresh",
            AuditEvent::RefreshTokenReuse { .. } => "refresh_token_reuse",
            AuditEvent::PasswordChange { .. } => "password_change",
            AuditEvent::InvitationCreated { .. } => "invitation_created",
            AuditEvent::InvitationAccepted { .. } => "invitation_accepted",
            AuditEvent::MembershipChanged { .. } => "membership_changed",
            AuditEvent::AccessDenied { .. } => "access_denied",
            AuditEvent::InvalidSession { .. } => "invalid_session",
        }
    }

    /// Events that should page someone
    pub fn is_warning(&self) -> bool {
        matches!(
            self,
            AuditEvent::RefreshTokenReuse { .. } | AuditEvent::AccessDenied { .. }
        )
    }
}

/// Log a security audit event
///
/// The whole event is attached as JSON for log aggregators, alongside a few
/// flattened fields for quick filtering:
///
/// ```json
/// {
///   "timestamp": "2026-01-12T10:30:00Z",
///   "event_type": "login_success",
///   "user_id": "550e8400-e29b-41d4-a716-446655440000",
///   "tenant": "demo"
/// }
/// ```
pub fn audit_log(event: &AuditEvent) {
    let timestamp = Utc::now();
    let event_json = serde_json::to_string(event)
        .unwrap_or_else(|e| format!("{{\"error\":\"Failed to serialize audit event: {e}\"}}"));
    let event_type = event.name();

    match event {
        AuditEvent::RefreshTokenReuse {
            session_id,
            family_revoked,
            ip_address,
            ..
        } => {
            warn!(
                target: "audit",
                timestamp = %timestamp,
                event_type,
                event = %event_json,
                session_id = %session_id,
                family_revoked = %family_revoked,
                ip_address = ?ip_address,
                "Refresh token reuse detected"
            );
        }
        AuditEvent::AccessDenied {
            user_id,
            tenant,
            resource,
            ip_address,
            ..
        } => {
            warn!(
                target: "audit",
                timestamp = %timestamp,
                event_type,
                event = %event_json,
                user_id = ?user_id,
                tenant = ?tenant,
                resource = %resource,
                ip_address = ?ip_address,
                "Access denied"
            );
        }
        AuditEvent::LoginSuccess {
            user_id, tenant, ..
        }
        | AuditEvent::RegistrationSuccess {
            user_id, tenant, ..
        } => {
            info!(
                target: "audit",
                timestamp = %timestamp,
                event_type,
                event = %event_json,
                user_id = %user_id,
                tenant = %tenant,
                "Security event"
            );
        }
        AuditEvent::LoginFailure { email, tenant, .. }
        | AuditEvent::RegistrationFailure { email, tenant, .. } => {
            info!(
                target: "audit",
                timestamp = %timestamp,
                event_type,
                event = %event_json,
                email = %email,
                tenant = %tenant,
                "Security event"
            );
        }
        _ => {
            info!(
                target: "audit",
                timestamp = %timestamp,
                event_type,
                event = %event_json,
                "Security event"
            );
        }
    }
}

/// Client IP from proxy headers (X-Forwarded-For first, then X-Real-IP)
pub fn extract_ip_address(headers: &axum::http::HeaderMap) -> Option<String> {
    if let Some(xff) = headers.get("x-forwarded-for") {
        if let Ok(xff_str) = xff.to_str() {
            // First entry in the chain is the client
            if let Some(first_ip) = xff_str.split(',').next() {
                return Some(first_ip.trim().to_string());
            }
        }
    }

    if let Some(real_ip) = headers.get("x-real-ip") {
        if let Ok(ip_str) = real_ip.to_str() {
            return Some(ip_str.to_string());
        }
    }

    None
}

pub fn extract_user_agent(headers: &axum::http::HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|ua| ua.to_str().ok())
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_event_serialization() {
        let event = AuditEvent::LoginSuccess {
            user_id: Uuid::new_v4(),
            email: "test@example.com".to_string(),
            tenant: "demo".to_string(),
            session_id: Uuid::new_v4(),
            ip_address: Some("192.168.1.1".to_string()),
            user_agent: Some("Mozilla/5.0".to_string()),
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event_type\":\"login_success\""));
        assert!(json.contains("test@example.com"));
        assert_eq!(event.name(), "login_success");
    }

    #[test]
    fn test_names_match_serialized_tag() {
        let events = vec![
            AuditEvent::RefreshTokenReuse {
                session_id: Uuid::new_v4(),
                family_revoked: true,
                ip_address: None,
                user_agent: None,
            },
            AuditEvent::MembershipChanged {
                actor_id: Uuid::new_v4(),
                user_id: Uuid::new_v4(),
                tenant_id: Uuid::new_v4(),
                old_role: "agent".to_string(),
                new_role: None,
            },
            AuditEvent::InvalidSession {
                reason: "expired".to_string(),
                ip_address: None,
                user_agent: None,
            },
        ];

        for event in events {
            let value = serde_json::to_value(&event).unwrap();
            assert_eq!(value["event_type"], event.name());
            audit_log(&event);
        }
    }

    #[test]
    fn test_warning_events() {
        let denied = AuditEvent::AccessDenied {
            user_id: None,
            tenant: Some("demo".to_string()),
            resource: "users:write".to_string(),
            reason: "requires permission users:write".to_string(),
            ip_address: None,
            user_agent: None,
        };
        assert!(denied.is_warning());
        audit_log(&denied);

        let logout = AuditEvent::Logout {
            user_id: None,
            session_id: None,
            logout_all_devices: false,
            sessions_revoked: 0,
            ip_address: None,
        };
        assert!(!logout.is_warning());
    }

    #[test]
    fn test_extract_ip_from_x_forwarded_for() {
        let mut headers = axum::http::HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            "203.0.113.1, 198.51.100.1".parse().unwrap(),
        );

        assert_eq!(
            extract_ip_address(&headers),
            Some("203.0.113.1".to_string())
        );
    }

    #[test]
    fn test_extract_ip_from_x_real_ip() {
        let mut headers = axum::http::HeaderMap::new();
        headers.insert("x-real-ip", "203.0.113.1".parse().unwrap());

        assert_eq!(
            extract_ip_address(&headers),
            Some("203.0.113.1".to_string())
        );
    }

    #[test]
    fn test_extract_missing_headers() {
        let headers = axum::http::HeaderMap::new();

        assert_eq!(extract_ip_address(&headers), None);
        assert_eq!(extract_user_agent(&headers), None);
    }
}
