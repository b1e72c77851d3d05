//! Authentication.
//!
//! Basic credentials are checked against a user record whose password field
//! holds a bcrypt hash. Requests without credentials are served
//! anonymously.

mod middleware;

pub use middleware::{hash_password, AuthUser};
