//! Wire protocol for lmsync peering.
//!
//! Defines the HTTP paths, the machine token header and the JSON bodies
//! exchanged between an agent and the online web during activation, push,
//! pull and acknowledgement.

pub mod dto;
pub mod endpoint;
pub mod error;
pub mod message;

pub use dto::{ExternalEventDto, ExternalEventDtoMapper};
pub use endpoint::{
    endpoints, HealthResponse, EVENT_COMPRESSION_HEADER, EVENT_COUNT_HEADER, MACHINE_TOKEN_HEADER,
    OPERATOR_SECRET_HEADER,
};
pub use error::{ProtocolError, ProtocolResult};
pub use message::{
    AckDto, AcksResponse, AgentRegistration, ConfirmResponse, EventBatch, EventIdsRequest,
    ImportResponse, RegistrationProof, RegistrationResponse, PROTOCOL_VERSION,
};
