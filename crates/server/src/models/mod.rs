mod conversation;
mod message;
mod user;

pub use conversation::*;
pub use message::*;
pub use user::*;

use serde::Serialize;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginatedResponse<T: Serialize> {
    pub items: Vec<T>,
    pub cursor: Option<i64>,
    pub has_more: bool,
}
