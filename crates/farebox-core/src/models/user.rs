//! Current-user model used for sync visibility scoping

use serde::{Deserialize, Serialize};

/// Role of the signed-in user, deciding snapshot pull scope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Sees all passengers
    Admin,
    /// Sees only the assigned-route subset
    Conductor,
    /// Any unrecognized role; sync treats this as an error
    #[serde(other)]
    Unknown,
}

/// The user the sync pull resolves visibility for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentUser {
    /// Server-assigned user ID
    pub id: String,
    /// Visibility role
    pub role: Role,
    /// Conductor identity used when recording transactions
    #[serde(default)]
    pub conductor_id: Option<String>,
    /// Route assignment for conductor-scoped pulls
    #[serde(default)]
    pub assigned_route_id: Option<String>,
}
