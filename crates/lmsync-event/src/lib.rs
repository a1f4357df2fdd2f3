//! Event envelope and payload serialization for lmsync.
//!
//! An [`Event`] is the unit of synchronization: an immutable envelope with a
//! globally unique id, addressing (sender, optional receiver), an ordering
//! group and a typed [`EventPayload`].
//!
//! - [`PayloadSerializer`] maps payload discriminators to decoders
//! - [`EventCodec`] turns a whole event into a binary frame and back
//! - [`MasterDataEventRecord`] describes one captured row mutation

pub mod codec;
pub mod error;
pub mod event;
pub mod master_data;
pub mod payload;
pub mod serializer;

pub use codec::{EventCodec, FRAME_VERSION};
pub use error::{EventError, EventResult};
pub use event::{Event, EventDraft};
pub use master_data::{ChangeOperation, MasterDataEventRecord};
pub use payload::{
    payload_types, EventPayload, LineItem, RequisitionApproved, RequisitionRejected,
    RequisitionSubmitted,
};
pub use serializer::PayloadSerializer;
