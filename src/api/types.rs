//! Request and response types for the query API

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::{Position, SmoothedPosition};
use crate::storage::StorageError;

/// Event name position notifications are published under
pub const POSITION_UPDATE_EVENT: &str = "position_update";

/// Result type for API operations
pub type ApiResult<T> = Result<T, ApiError>;

/// Client-visible API errors
#[derive(Debug, Error)]
pub enum ApiError {
    /// Required request field absent or empty
    #[error("{0} is required")]
    MissingField(&'static str),
    #[error("destination '{0}' not found")]
    DestinationNotFound(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl ApiError {
    /// HTTP-equivalent status code for the error
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::MissingField(_) => 400,
            ApiError::DestinationNotFound(_) => 404,
            ApiError::Storage(_) => 500,
        }
    }
}

/// Current position of a tag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionResponse {
    pub tag_id: String,
    pub x: f64,
    pub y: f64,
}

impl PositionResponse {
    pub fn new(tag_id: impl Into<String>, position: Position) -> Self {
        Self {
            tag_id: tag_id.into(),
            x: position.x,
            y: position.y,
        }
    }

    pub fn position(&self) -> Position {
        Position::new(self.x, self.y)
    }
}

/// Path request as received from a client; both fields are required
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PathRequest {
    #[serde(default)]
    pub tag_id: Option<String>,
    #[serde(default)]
    pub dest_name: Option<String>,
}

impl PathRequest {
    pub fn new(tag_id: impl Into<String>, dest_name: impl Into<String>) -> Self {
        Self {
            tag_id: Some(tag_id.into()),
            dest_name: Some(dest_name.into()),
        }
    }
}

/// Waypoints from a tag to a destination; empty when unreachable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathResponse {
    pub tag_id: String,
    pub destination: String,
    pub path: Vec<Position>,
}

/// Payload pushed to viewers after each committed fix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionUpdate {
    pub id: String,
    pub x: f64,
    pub y: f64,
}

impl From<&SmoothedPosition> for PositionUpdate {
    fn from(smoothed: &SmoothedPosition) -> Self {
        Self {
            id: smoothed.tag_id.clone(),
            x: smoothed.position.x,
            y: smoothed.position.y,
        }
    }
}
