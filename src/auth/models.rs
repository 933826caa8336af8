//! Identity the agent carries once its bearer API key resolves (§3
//! Identity/API Key collaborator, referenced by id only). No signup/login,
//! no JWT: the donor's `User`/`Claims`/role-lattice types have no
//! counterpart here since session auth is explicitly out of scope (§1).

use serde::{Deserialize, Serialize};

/// The tenant an authenticated request belongs to, attached to the request
/// extensions by [`super::middleware::api_key_auth`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub tenant_id: String,
}
