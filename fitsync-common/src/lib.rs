//! FitSync Common Types
//!
//! Wire types shared by the backend and its API clients.

pub mod error;
pub mod health;
pub mod users;

pub use error::{ErrorBody, ValidationIssue};
pub use health::HealthResponse;
pub use users::{CreateUserRequest, LoginRequest, MessageResponse, SignupRequest};
