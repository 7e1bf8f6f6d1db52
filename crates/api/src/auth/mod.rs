//! Authentication module for Tightship PMS
//!
//! Validates bearer session tokens and resolves tenant context. Signup and
//! credential management live outside this service.

pub mod jwt;
pub mod middleware;

pub use jwt::{Claims, JwtError, JwtManager};
pub use middleware::{require_auth, AuthState, AuthUser};
