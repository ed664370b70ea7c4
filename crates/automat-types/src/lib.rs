#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **automat-types** – Shared primitive data structures for automat.
//!
//! The crate is dependency-light and sits at the very bottom of the crate
//! graph so that *every* other crate can depend on it without causing cycles.
//! It defines the signal and event envelopes moved through the durable
//! queues, the distinguished runtime events, the byte codecs used for
//! entities and events, and the clock abstraction the scheduler reads.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub mod clock;
pub mod codec;

pub use clock::{Clock, ManualClock, SystemClock};
pub use codec::{Codec, CodecError};

//─────────────────────────────
//  Validation constants
//─────────────────────────────

/// Maximum allowed length for entity and event class names.
pub const MAX_CLASS_NAME_LEN: usize = 256;

/// Maximum allowed length for entity identifiers.
pub const MAX_ENTITY_ID_LEN: usize = 256;

/// Maximum allowed size for a serialized event payload.
pub const MAX_EVENT_PAYLOAD_LEN: usize = 1_048_576; // 1MB

//─────────────────────────────
//  Wire naming
//─────────────────────────────

/// An entity type persisted by the runtime.
///
/// `NAME` is the stable string stored in entity and signal rows. It is part
/// of the on-disk format: renaming a class requires a data migration, and
/// the runtime never derives wire names from Rust type paths.
pub trait EntityClass: Serialize + DeserializeOwned {
    /// Stable class name written to entity rows.
    const NAME: &'static str;
}

/// An event type delivered to entities.
///
/// `NAME` is the stable string stored in queue and log rows, with the same
/// migration caveats as [`EntityClass::NAME`].
pub trait EventClass: Serialize + DeserializeOwned {
    /// Stable class name written to signal rows.
    const NAME: &'static str;
}

//─────────────────────────────
//  Distinguished events
//─────────────────────────────

/// Class name of the synthetic creation event delivered to fresh entities.
pub const CREATE_EVENT: &str = "automat.create";

/// Class name of the cancellation event that removes a timed signal.
pub const CANCEL_TIMED_EVENT: &str = "automat.cancel-timed";

/// Payload of the distinguished cancellation event.
///
/// Carries the *from* half of the cancellation key; the *to* half is the
/// signal's target. Distinguished payloads are always JSON encoded so their
/// wire format does not depend on the user-configured event codec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelTimedSignal {
    /// Class of the entity that scheduled the timed signal.
    pub from_class: String,
    /// Id of the entity that scheduled the timed signal.
    pub from_id: String,
}

//─────────────────────────────
//  Event envelope
//─────────────────────────────

/// Wire-level event: a stable class name plus opaque serialized payload.
///
/// The runtime core never inspects the payload except for the two
/// distinguished classes above; behaviours decode it with the configured
/// event codec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Stable event class name.
    pub class: String,
    /// Serialized payload bytes.
    pub payload: Vec<u8>,
}

impl Event {
    /// Build an event from raw parts.
    pub fn new(class: impl Into<String>, payload: Vec<u8>) -> Self {
        Self { class: class.into(), payload }
    }

    /// Encode a typed event with the given codec.
    pub fn encode<E: EventClass>(codec: Codec, event: &E) -> Result<Self, CodecError> {
        Ok(Self { class: E::NAME.to_string(), payload: codec.to_bytes(event)? })
    }

    /// Decode the payload as a typed event.
    ///
    /// Fails when the envelope carries a different class than `E`.
    pub fn decode<E: EventClass>(&self, codec: Codec) -> Result<E, CodecError> {
        if self.class != E::NAME {
            return Err(CodecError::Decode(format!(
                "event class mismatch: expected {}, got {}",
                E::NAME,
                self.class
            )));
        }
        codec.from_bytes(&self.payload)
    }

    /// The synthetic creation event delivered to not-yet-existing entities.
    pub fn create() -> Self {
        Self { class: CREATE_EVENT.to_string(), payload: Vec::new() }
    }

    /// A cancellation event removing the timed signal scheduled by
    /// `(from_class, from_id)` towards the entity this event is sent to.
    pub fn cancel_timed(
        from_class: impl Into<String>,
        from_id: impl Into<String>,
    ) -> Result<Self, CodecError> {
        let payload = CancelTimedSignal { from_class: from_class.into(), from_id: from_id.into() };
        Ok(Self { class: CANCEL_TIMED_EVENT.to_string(), payload: Codec::Json.to_bytes(&payload)? })
    }

    /// Whether this is the distinguished creation event.
    pub fn is_create(&self) -> bool {
        self.class == CREATE_EVENT
    }

    /// Decode the cancellation payload, or `None` for any other class.
    pub fn cancellation(&self) -> Result<Option<CancelTimedSignal>, CodecError> {
        if self.class != CANCEL_TIMED_EVENT {
            return Ok(None);
        }
        Codec::Json.from_bytes(&self.payload).map(Some)
    }
}

//─────────────────────────────
//  Signals
//─────────────────────────────

/// An event targeted at one entity, optionally with a fire-at time.
///
/// A signal without `fire_at` lives in the durable signal queue until
/// applied; one with `fire_at` lives in the delayed table and is delivered
/// by a timer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    /// Target entity class.
    pub class: String,
    /// Target entity id.
    pub id: String,
    /// The event to deliver.
    pub event: Event,
    /// Delivery time in epoch milliseconds, absent for immediate delivery.
    pub fire_at: Option<i64>,
}

impl Signal {
    /// A signal for immediate delivery.
    pub fn immediate(class: impl Into<String>, id: impl Into<String>, event: Event) -> Self {
        Self { class: class.into(), id: id.into(), event, fire_at: None }
    }

    /// A signal to be delivered at `fire_at` epoch milliseconds.
    pub fn delayed(
        class: impl Into<String>,
        id: impl Into<String>,
        event: Event,
        fire_at: i64,
    ) -> Self {
        Self { class: class.into(), id: id.into(), event, fire_at: Some(fire_at) }
    }

    /// Validate the envelope before it is persisted.
    pub fn validate(&self) -> Result<(), String> {
        if self.class.trim().is_empty() {
            return Err("target class cannot be empty".to_string());
        }
        if self.class.len() > MAX_CLASS_NAME_LEN {
            return Err("target class exceeds maximum length".to_string());
        }
        if self.id.trim().is_empty() {
            return Err("target id cannot be empty".to_string());
        }
        if self.id.len() > MAX_ENTITY_ID_LEN {
            return Err("target id exceeds maximum length".to_string());
        }
        if self.event.class.trim().is_empty() {
            return Err("event class cannot be empty".to_string());
        }
        if self.event.class.len() > MAX_CLASS_NAME_LEN {
            return Err("event class exceeds maximum length".to_string());
        }
        if self.event.payload.len() > MAX_EVENT_PAYLOAD_LEN {
            return Err("event payload exceeds maximum size".to_string());
        }
        Ok(())
    }
}

/// A signal paired with the sequence number its durable row was assigned.
///
/// This is the ephemeral handle the drain scheduler moves around; the seq
/// ties the in-memory work item back to exactly one queue row.
#[derive(Debug, Clone, PartialEq)]
pub struct NumberedSignal {
    /// Sequence number assigned by the signal or delayed-signal queue.
    pub seq: i64,
    /// The signal itself.
    pub signal: Signal,
}
