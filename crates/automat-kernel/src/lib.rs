#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **automat-kernel** – The per-signal transactional apply cycle.
//!
//! [`Engine::apply`] processes exactly one numbered signal: it reads the
//! target entity, drives its state machine through the input event and every
//! self-signal that cascades from it, and persists the results - entity
//! bytes, property rows, signal-log rows, outbound signal rows - in a single
//! database transaction. Either all effects commit or none do; on failure
//! the input row survives and the cycle is retriable.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use sqlx::SqliteConnection;
use tracing::debug;

use automat_machine::{ApplyContext, BehaviourRegistry, MachineError};
use automat_store::{Store, StoreError};
use automat_types::{Clock, CodecError, Event, NumberedSignal, Signal};

//─────────────────────────────
//  Errors
//─────────────────────────────

/// Errors aborting an apply cycle. Any of these rolls the transaction back.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The underlying database reported an error.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Behaviour resolution or a machine transition failed.
    #[error(transparent)]
    Machine(#[from] MachineError),
    /// A distinguished event payload could not be decoded.
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// The properties factory refused to project the entity.
    #[error("properties factory failed: {0}")]
    Properties(String),
}

//─────────────────────────────
//  Properties factory
//─────────────────────────────

/// Projects an entity snapshot into its secondary-index property rows.
///
/// Invoked inside the apply transaction after every entity save; the rows
/// written equal the returned map exactly.
pub trait PropertiesFactory: Send + Sync {
    /// The property rows for `(class, id)` given the serialized entity.
    fn properties(
        &self,
        class: &str,
        id: &str,
        entity: &[u8],
    ) -> anyhow::Result<BTreeMap<String, String>>;
}

/// Default factory: no entity has property rows.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProperties;

impl PropertiesFactory for NoProperties {
    fn properties(
        &self,
        _class: &str,
        _id: &str,
        _entity: &[u8],
    ) -> anyhow::Result<BTreeMap<String, String>> {
        Ok(BTreeMap::new())
    }
}

//─────────────────────────────
//  Apply outcome
//─────────────────────────────

/// The outbound signals a committed apply cycle produced.
///
/// The drain scheduler offers `immediate` back to itself and hands each
/// entry of `delayed` to a timer.
#[derive(Debug, Default)]
pub struct ApplyOutcome {
    /// Newly enqueued non-delayed signals, in emission order.
    pub immediate: Vec<NumberedSignal>,
    /// Newly inserted (or replaced) delayed signals, in emission order.
    pub delayed: Vec<NumberedSignal>,
}

//─────────────────────────────
//  Engine
//─────────────────────────────

/// Executes apply cycles against one store.
#[derive(Clone)]
pub struct Engine {
    store: Store,
    behaviours: BehaviourRegistry,
    clock: Arc<dyn Clock>,
    store_signals: bool,
    properties: Arc<dyn PropertiesFactory>,
}

impl Engine {
    /// An engine over `store` driving the registered behaviours.
    pub fn new(
        store: Store,
        behaviours: BehaviourRegistry,
        clock: Arc<dyn Clock>,
        store_signals: bool,
        properties: Arc<dyn PropertiesFactory>,
    ) -> Self {
        Self { store, behaviours, clock, store_signals, properties }
    }

    /// Process one numbered signal to completion.
    ///
    /// Returns the outbound signals assigned durable sequence numbers by
    /// this cycle. A signal whose row no longer exists counts as already
    /// processed and yields an empty outcome.
    pub async fn apply(&self, input: &NumberedSignal) -> Result<ApplyOutcome, EngineError> {
        let now = self.clock.now_ms();
        let entities = self.store.entities();
        let queue = self.store.signal_queue();
        let delayed = self.store.delayed_queue();

        let mut tx = self.store.pool().begin().await.map_err(StoreError::from)?;

        let present = match input.signal.fire_at {
            Some(_) => delayed.exists(&mut tx, input.seq).await?,
            None => queue.exists(&mut tx, input.seq).await?,
        };
        if !present {
            debug!(seq = input.seq, "signal row gone, treating as already processed");
            return Ok(ApplyOutcome::default());
        }

        // Cancellation removes the matching delayed row before any FSM
        // invocation; the machine never observes the event.
        if let Some(cancel) = input.signal.event.cancellation()? {
            delayed
                .delete_by_key(
                    &mut tx,
                    &cancel.from_class,
                    &cancel.from_id,
                    &input.signal.class,
                    &input.signal.id,
                )
                .await?;
            self.consume_input(&mut tx, input).await?;
            tx.commit().await.map_err(StoreError::from)?;
            debug!(
                seq = input.seq,
                from_class = %cancel.from_class,
                from_id = %cancel.from_id,
                "cancelled timed signal"
            );
            return Ok(ApplyOutcome::default());
        }

        let behaviour = self.behaviours.resolve(&input.signal.class)?;
        let record = entities.read(&mut tx, &input.signal.class, &input.signal.id).await?;

        let mut pending: VecDeque<Event> = VecDeque::new();
        let mut machine = match record {
            Some(record) => {
                pending.push_back(input.signal.event.clone());
                behaviour.rehydrate(&input.signal.id, &record.bytes, &record.state)?
            }
            None => {
                // A fresh machine always observes the creation event first.
                pending.push_back(Event::create());
                if !input.signal.event.is_create() {
                    pending.push_back(input.signal.event.clone());
                }
                behaviour.create(&input.signal.id)
            }
        };

        // Self-signals cascade synchronously, head-first: the first emitted
        // event is the next one processed, and later emissions observe the
        // machine state left by earlier ones.
        let ctx = ApplyContext::new(now);
        let mut processed: Vec<Event> = Vec::new();
        let mut outbound = Vec::new();
        while let Some(event) = pending.pop_front() {
            machine.apply(&event, &ctx)?;
            for emitted in machine.drain_self().into_iter().rev() {
                pending.push_front(emitted);
            }
            outbound.extend(machine.drain_outbound());
            processed.push(event);
        }

        if self.store_signals {
            let log = self.store.signal_log();
            for event in &processed {
                log.append(
                    &mut tx,
                    &input.signal.class,
                    &input.signal.id,
                    &event.class,
                    &event.payload,
                    now,
                )
                .await?;
            }
        }

        let mut outcome = ApplyOutcome::default();
        for emission in outbound {
            match emission.fire_at {
                None => {
                    let seq = queue
                        .enqueue(
                            &mut tx,
                            &emission.class,
                            &emission.id,
                            &emission.event.class,
                            &emission.event.payload,
                            now,
                        )
                        .await?;
                    outcome.immediate.push(NumberedSignal {
                        seq,
                        signal: Signal::immediate(emission.class, emission.id, emission.event),
                    });
                }
                Some(fire_at) => {
                    let seq = delayed
                        .insert(
                            &mut tx,
                            machine.class(),
                            machine.id(),
                            &emission.class,
                            &emission.id,
                            &emission.event.class,
                            &emission.event.payload,
                            fire_at,
                        )
                        .await?;
                    outcome.delayed.push(NumberedSignal {
                        seq,
                        signal: Signal::delayed(
                            emission.class,
                            emission.id,
                            emission.event,
                            fire_at,
                        ),
                    });
                }
            }
        }

        self.consume_input(&mut tx, input).await?;

        if let Some(bytes) = machine.snapshot()? {
            let state = machine.state();
            entities.save(&mut tx, &input.signal.class, &input.signal.id, &bytes, &state).await?;
            let properties = self
                .properties
                .properties(&input.signal.class, &input.signal.id, &bytes)
                .map_err(|e| EngineError::Properties(e.to_string()))?;
            entities
                .save_properties(&mut tx, &input.signal.class, &input.signal.id, &properties)
                .await?;
        }

        tx.commit().await.map_err(StoreError::from)?;
        debug!(
            seq = input.seq,
            class = %input.signal.class,
            id = %input.signal.id,
            state = %machine.state(),
            cascaded = processed.len(),
            "applied signal"
        );
        Ok(outcome)
    }

    /// Delete the input signal's row from whichever table it came from.
    async fn consume_input(
        &self,
        conn: &mut SqliteConnection,
        input: &NumberedSignal,
    ) -> Result<(), EngineError> {
        match input.signal.fire_at {
            Some(_) => self.store.delayed_queue().delete(conn, input.seq).await?,
            None => self.store.signal_queue().delete(conn, input.seq).await?,
        }
        Ok(())
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("behaviours", &self.behaviours)
            .field("store_signals", &self.store_signals)
            .finish()
    }
}
