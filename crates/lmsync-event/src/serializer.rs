use std::collections::HashMap;
use std::fmt;

use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{EventError, EventResult};
use crate::payload::{payload_types, EventPayload};

type Decoder = Box<dyn Fn(&[u8]) -> EventResult<EventPayload> + Send + Sync>;

/// Payload serializer driven by a discriminator registry.
///
/// Serialization writes the payload's JSON body and returns its discriminator.
/// Deserialization looks the discriminator up in the registry; unknown
/// discriminators fail with [`EventError::UnknownPayloadType`].
pub struct PayloadSerializer {
    decoders: HashMap<String, Decoder>,
}

impl PayloadSerializer {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            decoders: HashMap::new(),
        }
    }

    /// A registry with every built-in payload type.
    pub fn with_defaults() -> Self {
        let mut s = Self::new();
        s.register_json(
            payload_types::REQUISITION_SUBMITTED,
            EventPayload::RequisitionSubmitted,
        );
        s.register_json(
            payload_types::REQUISITION_APPROVED,
            EventPayload::RequisitionApproved,
        );
        s.register_json(
            payload_types::REQUISITION_REJECTED,
            EventPayload::RequisitionRejected,
        );
        s.register_json(payload_types::MASTER_DATA, EventPayload::MasterData);
        s
    }

    /// Register (or replace) the decoder for a discriminator.
    pub fn register<F>(&mut self, payload_type: impl Into<String>, decoder: F)
    where
        F: Fn(&[u8]) -> EventResult<EventPayload> + Send + Sync + 'static,
    {
        let payload_type = payload_type.into();
        if self
            .decoders
            .insert(payload_type.clone(), Box::new(decoder))
            .is_some()
        {
            debug!(%payload_type, "replaced payload decoder");
        }
    }

    /// Register a decoder that reads a JSON body of `T` and wraps it.
    pub fn register_json<T, W>(&mut self, payload_type: &str, wrap: W)
    where
        T: DeserializeOwned,
        W: Fn(T) -> EventPayload + Send + Sync + 'static,
    {
        let name = payload_type.to_string();
        self.register(payload_type, move |bytes| {
            serde_json::from_slice::<T>(bytes)
                .map(&wrap)
                .map_err(|e| EventError::InvalidPayload {
                    payload_type: name.clone(),
                    reason: e.to_string(),
                })
        });
    }

    pub fn is_registered(&self, payload_type: &str) -> bool {
        self.decoders.contains_key(payload_type)
    }

    /// Serialize a payload into `(discriminator, JSON body bytes)`.
    pub fn serialize(&self, payload: &EventPayload) -> EventResult<(String, Vec<u8>)> {
        let body = payload.body_json()?;
        let bytes =
            serde_json::to_vec(&body).map_err(|e| EventError::Serialization(e.to_string()))?;
        Ok((payload.type_name().to_string(), bytes))
    }

    /// Decode a payload body using the decoder registered for `payload_type`.
    pub fn deserialize(&self, payload_type: &str, bytes: &[u8]) -> EventResult<EventPayload> {
        let decoder = self
            .decoders
            .get(payload_type)
            .ok_or_else(|| EventError::UnknownPayloadType(payload_type.to_string()))?;
        decoder(bytes)
    }

    /// Decode a payload already parsed as JSON (the HTTP DTO form).
    pub fn deserialize_value(
        &self,
        payload_type: &str,
        value: &serde_json::Value,
    ) -> EventResult<EventPayload> {
        let bytes =
            serde_json::to_vec(value).map_err(|e| EventError::Serialization(e.to_string()))?;
        self.deserialize(payload_type, &bytes)
    }
}

impl Default for PayloadSerializer {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl fmt::Debug for PayloadSerializer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<&String> = self.decoders.keys().collect();
        types.sort();
        f.debug_struct("PayloadSerializer")
            .field("types", &types)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::master_data::{ChangeOperation, MasterDataEventRecord};
    use crate::payload::{LineItem, RequisitionSubmitted};

    fn submitted() -> EventPayload {
        EventPayload::RequisitionSubmitted(RequisitionSubmitted {
            requisition_id: uuid::Uuid::new_v4(),
            program_code: "EM".into(),
            submitted_by: "clerk".into(),
            line_items: vec![LineItem {
                product_code: "C100".into(),
                quantity: 12,
            }],
        })
    }

    #[test]
    fn serialize_then_deserialize_restores_payload() {
        let s = PayloadSerializer::with_defaults();
        let payload = submitted();
        let (ty, bytes) = s.serialize(&payload).unwrap();
        assert_eq!(ty, payload_types::REQUISITION_SUBMITTED);
        assert_eq!(s.deserialize(&ty, &bytes).unwrap(), payload);
    }

    #[test]
    fn master_data_body_keeps_nulls() {
        let s = PayloadSerializer::with_defaults();
        let payload = EventPayload::MasterData(MasterDataEventRecord {
            schema: "referencedata".into(),
            table: "orderables".into(),
            operation: ChangeOperation::Insert,
            column_names: vec!["id".into(), "note".into()],
            column_values: vec![Some("o-1".into()), None],
            primary_key: vec!["id".into()],
            snapshot_version: None,
        });
        let (ty, bytes) = s.serialize(&payload).unwrap();
        assert_eq!(s.deserialize(&ty, &bytes).unwrap(), payload);
    }

    #[test]
    fn unknown_discriminator_is_distinct_error() {
        let s = PayloadSerializer::with_defaults();
        let err = s.deserialize("stock.adjusted", b"{}").unwrap_err();
        assert!(matches!(err, EventError::UnknownPayloadType(t) if t == "stock.adjusted"));
    }

    #[test]
    fn malformed_body_names_payload_type() {
        let s = PayloadSerializer::with_defaults();
        let err = s
            .deserialize(payload_types::REQUISITION_APPROVED, b"{\"nope\":1}")
            .unwrap_err();
        assert!(matches!(
            err,
            EventError::InvalidPayload { payload_type, .. } if payload_type == payload_types::REQUISITION_APPROVED
        ));
    }

    #[test]
    fn legacy_alias_can_be_registered() {
        let mut s = PayloadSerializer::with_defaults();
        s.register_json("requisition.submitted.v0", EventPayload::RequisitionSubmitted);
        let payload = submitted();
        let (_, bytes) = s.serialize(&payload).unwrap();
        assert_eq!(
            s.deserialize("requisition.submitted.v0", &bytes).unwrap(),
            payload
        );
        assert!(s.is_registered("requisition.submitted.v0"));
    }

    #[test]
    fn empty_registry_knows_nothing() {
        let s = PayloadSerializer::new();
        assert!(!s.is_registered(payload_types::MASTER_DATA));
    }
}
