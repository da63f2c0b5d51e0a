//! Bearer token verification and role checks.

pub mod middleware;
mod token;

pub use middleware::{optional_auth, require_auth, require_role, MaybeAuthUser};
pub use token::{AuthError, AuthUser, TokenVerifier};
