use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use lmsync_types::{AgentId, FacilityId};

use crate::signer::{Signature, SignatureError, SigningKey, VerifyingKey};

/// What a machine token asserts about its bearer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    pub agent_id: AgentId,
    pub facility_id: FacilityId,
    pub issued_at: DateTime<Utc>,
}

/// Errors from encoding, decoding or verifying a machine token.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("malformed machine token: {0}")]
    Malformed(String),

    #[error("machine token signature rejected: {0}")]
    Signature(#[from] SignatureError),

    #[error("machine token expired (issued {issued_at})")]
    Expired { issued_at: DateTime<Utc> },
}

/// A signed machine token.
///
/// Text form: `hex(bincode(claims)) "." hex(signature)`. The signature covers
/// the bincode claim bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MachineToken {
    pub claims: TokenClaims,
    claim_bytes: Vec<u8>,
    signature: Signature,
}

impl MachineToken {
    /// Issue a token for `claims`, signed with the agent's key.
    pub fn issue(claims: TokenClaims, key: &SigningKey) -> Result<Self, TokenError> {
        let claim_bytes =
            bincode::serialize(&claims).map_err(|e| TokenError::Malformed(e.to_string()))?;
        let signature = key.sign(&claim_bytes);
        Ok(Self {
            claims,
            claim_bytes,
            signature,
        })
    }

    /// Convenience for issuing a token stamped with the current time.
    pub fn issue_now(
        agent_id: AgentId,
        facility_id: FacilityId,
        key: &SigningKey,
    ) -> Result<Self, TokenError> {
        Self::issue(
            TokenClaims {
                agent_id,
                facility_id,
                issued_at: Utc::now(),
            },
            key,
        )
    }

    pub fn encode(&self) -> String {
        format!(
            "{}.{}",
            hex::encode(&self.claim_bytes),
            hex::encode(self.signature.to_bytes())
        )
    }

    pub fn decode(token: &str) -> Result<Self, TokenError> {
        let (claims_hex, sig_hex) = token
            .trim()
            .split_once('.')
            .ok_or_else(|| TokenError::Malformed("missing separator".into()))?;
        let claim_bytes =
            hex::decode(claims_hex).map_err(|e| TokenError::Malformed(e.to_string()))?;
        let sig_bytes = hex::decode(sig_hex).map_err(|e| TokenError::Malformed(e.to_string()))?;
        let claims: TokenClaims = bincode::deserialize(&claim_bytes)
            .map_err(|e| TokenError::Malformed(e.to_string()))?;
        let signature = Signature::from_slice(&sig_bytes)?;
        Ok(Self {
            claims,
            claim_bytes,
            signature,
        })
    }

    /// Check the signature against the key registered for the agent.
    pub fn verify(&self, key: &VerifyingKey) -> Result<(), TokenError> {
        key.verify(&self.claim_bytes, &self.signature)?;
        Ok(())
    }

    /// Verify the signature and reject tokens older than `max_age`.
    pub fn verify_fresh(
        &self,
        key: &VerifyingKey,
        now: DateTime<Utc>,
        max_age: Duration,
    ) -> Result<(), TokenError> {
        self.verify(key)?;
        if now - self.claims.issued_at > max_age {
            return Err(TokenError::Expired {
                issued_at: self.claims.issued_at,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issue(key: &SigningKey) -> MachineToken {
        MachineToken::issue_now(AgentId::random(), FacilityId::random(), key).unwrap()
    }

    #[test]
    fn encoded_token_verifies_against_issuer_key() {
        let key = SigningKey::generate();
        let token = issue(&key);
        let decoded = MachineToken::decode(&token.encode()).unwrap();
        assert_eq!(decoded.claims, token.claims);
        decoded.verify(&key.verifying_key()).unwrap();
    }

    #[test]
    fn token_from_other_key_is_rejected() {
        let token = issue(&SigningKey::generate());
        let other = SigningKey::generate().verifying_key();
        let err = token.verify(&other).unwrap_err();
        assert!(matches!(err, TokenError::Signature(SignatureError::InvalidSignature)));
    }

    #[test]
    fn tampered_claims_fail_verification() {
        let key = SigningKey::generate();
        let encoded = issue(&key).encode();
        let (claims, sig) = encoded.split_once('.').unwrap();
        let mut bytes = hex::decode(claims).unwrap();
        // first byte of the agent id, after the 8-byte length prefix
        bytes[8] ^= 0x01;
        let forged = format!("{}.{}", hex::encode(bytes), sig);
        let decoded = MachineToken::decode(&forged).unwrap();
        assert!(decoded.verify(&key.verifying_key()).is_err());
    }

    #[test]
    fn malformed_tokens() {
        assert!(matches!(
            MachineToken::decode("no-separator"),
            Err(TokenError::Malformed(_))
        ));
        assert!(matches!(
            MachineToken::decode("zz.zz"),
            Err(TokenError::Malformed(_))
        ));
    }

    #[test]
    fn stale_token_is_expired() {
        let key = SigningKey::generate();
        let claims = TokenClaims {
            agent_id: AgentId::random(),
            facility_id: FacilityId::random(),
            issued_at: Utc::now() - Duration::hours(2),
        };
        let token = MachineToken::issue(claims, &key).unwrap();
        let err = token
            .verify_fresh(&key.verifying_key(), Utc::now(), Duration::minutes(30))
            .unwrap_err();
        assert!(matches!(err, TokenError::Expired { .. }));
        token
            .verify_fresh(&key.verifying_key(), Utc::now(), Duration::hours(3))
            .unwrap();
    }
}
