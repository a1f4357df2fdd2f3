//! Cryptographic primitives for lmsync.
//!
//! Agents hold an Ed25519 key pair generated at activation. The public half is
//! registered with the online web; every later peering call carries a
//! [`MachineToken`] signed with the private half.
//!
//! Signing and verification come from `ed25519-dalek`.

pub mod signer;
pub mod token;

pub use signer::{Signature, SignatureError, SigningKey, VerifyingKey};
pub use token::{MachineToken, TokenClaims, TokenError};
