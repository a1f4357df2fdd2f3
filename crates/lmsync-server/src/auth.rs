use axum::http::HeaderMap;
use chrono::{DateTime, Duration, Utc};

use lmsync_crypto::{MachineToken, TokenError};
use lmsync_protocol::MACHINE_TOKEN_HEADER;
use lmsync_types::{AgentId, FacilityId};

use crate::error::{ServerError, ServerResult};
use crate::registry::AgentRegistry;

/// Who is calling, once the machine token checked out.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MachineIdentity {
    pub agent_id: AgentId,
    pub facility_id: FacilityId,
}

/// The raw token from the `x-machine-token` header.
pub fn token_from_headers(headers: &HeaderMap) -> ServerResult<&str> {
    headers
        .get(MACHINE_TOKEN_HEADER)
        .ok_or_else(|| ServerError::Unauthorized(format!("missing {MACHINE_TOKEN_HEADER} header")))?
        .to_str()
        .map_err(|_| ServerError::Unauthorized("token is not ASCII".into()))
}

/// Verify a machine token against the registered key of its agent.
///
/// The token's facility must be the one the agent registered with.
pub fn verify_token(
    registry: &AgentRegistry,
    token: &str,
    now: DateTime<Utc>,
    max_age: Duration,
) -> ServerResult<MachineIdentity> {
    let token = MachineToken::decode(token).map_err(unauthorized)?;
    let claims = &token.claims;
    let agent = registry
        .get(&claims.agent_id)
        .ok_or(ServerError::AgentNotRegistered(claims.agent_id))?;
    token
        .verify_fresh(&agent.verifying_key()?, now, max_age)
        .map_err(unauthorized)?;
    if claims.facility_id != agent.facility_id {
        return Err(ServerError::FacilityMismatch {
            token: claims.facility_id,
            registered: agent.facility_id,
        });
    }
    Ok(MachineIdentity {
        agent_id: claims.agent_id,
        facility_id: claims.facility_id,
    })
}

fn unauthorized(e: TokenError) -> ServerError {
    ServerError::Unauthorized(e.to_string())
}
