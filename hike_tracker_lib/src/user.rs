use serde::{Deserialize, Serialize};

/// The signed-in user, kept for the lifetime of a login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub user_id: i64,
    pub name: String,
    pub access_token: String,
}
