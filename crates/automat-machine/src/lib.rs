#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **automat-machine** – FSM adapter surface for automat.
//!
//! The runtime hosts many entity classes, each driven by a finite-state
//! machine it knows nothing about. This crate defines the seam: a
//! [`Behaviour`] creates and rehydrates [`Machine`]s for one class, a
//! [`BehaviourRegistry`] maps stable class names to behaviours, and the
//! narrow [`Persistence`] trait is what the runtime exposes back to
//! behaviours that need to reach into it. How machines are authored
//! (hand-written, macro-generated, DSL-compiled) is out of scope here.

use async_trait::async_trait;

use automat_types::{CodecError, Event};

mod registry;
pub use registry::BehaviourRegistry;

//─────────────────────────────
//  Errors
//─────────────────────────────

/// Errors produced while resolving or driving a state machine.
#[derive(Debug, thiserror::Error)]
pub enum MachineError {
    /// No behaviour is registered for the entity class.
    #[error("no behaviour registered for class {0}")]
    UnknownClass(String),
    /// A persisted state name is not recognized by the behaviour.
    #[error("class {class} has no state named {state}")]
    UnknownState {
        /// Entity class being rehydrated.
        class: String,
        /// The unrecognized persisted state name.
        state: String,
    },
    /// Entity or event bytes could not be encoded or decoded.
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// The machine refused the event in its current state.
    #[error("transition rejected: {0}")]
    Rejected(String),
}

//─────────────────────────────
//  Apply context
//─────────────────────────────

/// Context threaded into every [`Machine::apply`] call.
///
/// Carries the clock reading taken at the start of the apply cycle, so every
/// transition within one cascade schedules timed signals against the same
/// `now`.
#[derive(Debug, Clone, Copy)]
pub struct ApplyContext {
    now_ms: i64,
}

impl ApplyContext {
    /// Context for an apply cycle starting at `now_ms`.
    pub fn new(now_ms: i64) -> Self {
        Self { now_ms }
    }

    /// Epoch milliseconds at the start of the apply cycle.
    pub fn now_ms(&self) -> i64 {
        self.now_ms
    }
}

//─────────────────────────────
//  Emissions
//─────────────────────────────

/// A signal emitted by a machine towards another entity (or its future self).
#[derive(Debug, Clone, PartialEq)]
pub struct Emission {
    /// Target entity class.
    pub class: String,
    /// Target entity id.
    pub id: String,
    /// Event to deliver.
    pub event: Event,
    /// Delivery time in epoch milliseconds; absent for immediate delivery.
    pub fire_at: Option<i64>,
}

impl Emission {
    /// Emit `event` to `(class, id)` for immediate delivery.
    pub fn immediate(class: impl Into<String>, id: impl Into<String>, event: Event) -> Self {
        Self { class: class.into(), id: id.into(), event, fire_at: None }
    }

    /// Emit `event` to `(class, id)` at `fire_at` epoch milliseconds.
    pub fn delayed(
        class: impl Into<String>,
        id: impl Into<String>,
        event: Event,
        fire_at: i64,
    ) -> Self {
        Self { class: class.into(), id: id.into(), event, fire_at: Some(fire_at) }
    }
}

//─────────────────────────────
//  Machine trait
//─────────────────────────────

/// A state machine snapshot positioned at one state of one entity.
///
/// The apply engine owns the machine for the duration of a single apply
/// cycle and drives it single-threaded; implementations never need interior
/// synchronization.
pub trait Machine: Send {
    /// Entity class this machine drives.
    fn class(&self) -> &str;

    /// Id of the entity instance.
    fn id(&self) -> &str;

    /// Persisted name of the current state.
    fn state(&self) -> String;

    /// Advance the machine by one event.
    ///
    /// Transitions may stage follow-up events; the engine collects them via
    /// [`Machine::drain_self`] and [`Machine::drain_outbound`] after each
    /// call.
    fn apply(&mut self, event: &Event, ctx: &ApplyContext) -> Result<(), MachineError>;

    /// Serialized snapshot of the current entity value.
    ///
    /// `None` means the machine has not produced an entity yet; nothing is
    /// persisted for this cycle.
    fn snapshot(&self) -> Result<Option<Vec<u8>>, MachineError>;

    /// Take the events staged for this same entity, in emission order.
    ///
    /// These cascade synchronously within the running apply cycle.
    fn drain_self(&mut self) -> Vec<Event>;

    /// Take the signals staged for other entities, in emission order.
    ///
    /// These are enqueued durably and delivered after the cycle commits.
    fn drain_outbound(&mut self) -> Vec<Emission>;
}

//─────────────────────────────
//  Behaviour trait
//─────────────────────────────

/// Per-class adapter that knows how to create and rehydrate machines.
pub trait Behaviour: Send + Sync {
    /// A fresh machine for a not-yet-existing entity, not yet signalled.
    ///
    /// The engine delivers the distinguished creation event as the machine's
    /// first input.
    fn create(&self, id: &str) -> Box<dyn Machine>;

    /// A machine positioned at the persisted `state` with the stored
    /// `snapshot`.
    ///
    /// Parsing the persisted state name back into the machine's internal
    /// state happens here; an unrecognized name is
    /// [`MachineError::UnknownState`].
    fn rehydrate(
        &self,
        id: &str,
        snapshot: &[u8],
        state: &str,
    ) -> Result<Box<dyn Machine>, MachineError>;
}

//─────────────────────────────
//  Runtime-facing seam
//─────────────────────────────

/// The narrow view of the runtime exposed to behaviours.
///
/// Behaviours emit signals through their machines; this trait exists for the
/// rarer case of reaching back into the runtime during an apply (nested
/// reads, out-of-band publication). The runtime installs an implementation
/// in a process-wide slot around each apply cycle.
#[async_trait]
pub trait Persistence: Send + Sync {
    /// Durably publish a signal for immediate delivery.
    async fn signal_raw(&self, class: &str, id: &str, event: Event) -> anyhow::Result<()>;

    /// Read the serialized entity snapshot for `(class, id)`.
    async fn entity_bytes(&self, class: &str, id: &str) -> anyhow::Result<Option<Vec<u8>>>;
}
