//! Agent authentication: a raw bearer API key resolved to a tenant id via
//! the Durable Store's `api_keys` table (§1 "API-key issuance and lookup" is
//! an out-of-scope collaborator — this module only does the lookup side).

pub mod middleware;
pub mod models;

pub use middleware::api_key_auth;
pub use models::Identity;
