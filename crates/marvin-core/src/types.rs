use serde::{Deserialize, Serialize};

/// Caller permission level, ordered from most to least privileged.
///
/// `Ignored` users are rejected at the HTTP boundary and never reach the
/// orchestrator; the variant exists so the wire value round-trips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionLevel {
    Owner,
    Admin,
    Normal,
    Ignored,
}

impl PermissionLevel {
    /// Owner/admin share most bypasses (rate limits, moderation commands).
    pub fn is_staff(self) -> bool {
        matches!(self, PermissionLevel::Owner | PermissionLevel::Admin)
    }

    pub fn is_owner(self) -> bool {
        matches!(self, PermissionLevel::Owner)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PermissionLevel::Owner => "owner",
            PermissionLevel::Admin => "admin",
            PermissionLevel::Normal => "normal",
            PermissionLevel::Ignored => "ignored",
        }
    }
}

impl Default for PermissionLevel {
    fn default() -> Self {
        PermissionLevel::Normal
    }
}

impl std::fmt::Display for PermissionLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One message of recent channel history supplied with a mention request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub timestamp: String,
    pub nick: String,
    pub content: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_ordering_matches_privilege() {
        assert!(PermissionLevel::Owner < PermissionLevel::Admin);
        assert!(PermissionLevel::Admin < PermissionLevel::Normal);
        assert!(PermissionLevel::Normal < PermissionLevel::Ignored);
    }

    #[test]
    fn staff_covers_owner_and_admin_only() {
        assert!(PermissionLevel::Owner.is_staff());
        assert!(PermissionLevel::Admin.is_staff());
        assert!(!PermissionLevel::Normal.is_staff());
        assert!(!PermissionLevel::Ignored.is_staff());
    }

    #[test]
    fn wire_form_is_lowercase() {
        let level: PermissionLevel = serde_json::from_str("\"admin\"").unwrap();
        assert_eq!(level, PermissionLevel::Admin);
        assert_eq!(serde_json::to_string(&level).unwrap(), "\"admin\"");
    }
}
