// Viewer context - who is making the request

use uuid::Uuid;

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewerContext {
    pub request_id: String,
    pub user_id: Option<i64>,
}

impl ViewerContext {
    pub fn anonymous() -> Self {
        Self {
            request_id: new_request_id(),
            user_id: None,
        }
    }

    pub fn authenticated(user_id: i64) -> Self {
        Self {
            request_id: new_request_id(),
            user_id: Some(user_id),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.user_id.is_some()
    }

    /// The signed-in user's id, or AuthenticationRequired.
    pub fn require_user(&self) -> AppResult<i64> {
        self.user_id
            .ok_or_else(|| AppError::AuthenticationRequired("Authentication required.".to_string()))
    }
}

fn new_request_id() -> String {
    format!("req-{}", Uuid::new_v4())
}
