//! Query API, bus ingestion and position notifications
//!
//! The HTTP and websocket layers live outside this crate; they call into
//! [`LocatorService`] and map [`ApiError::status_code`] onto responses.

pub mod notify;
pub mod service;
pub mod types;

// Re-export commonly used API types
pub use notify::{
    CallbackHandle, CallbackNotifier, ChannelNotifier, FanOutNotifier, LogNotifier, NotifyError,
    PositionCallback, PositionNotifier,
};
pub use service::{LocatorService, MessageOutcome, StartupError};
pub use types::{
    ApiError, ApiResult, PathRequest, PathResponse, PositionResponse, PositionUpdate, POSITION_UPDATE_EVENT,
};
