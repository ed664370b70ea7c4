#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **automat-runtime** – Durable state-machine runtime.
//!
//! Hosts many entity instances of many classes, each driven by a persistent
//! FSM. Signals published through [`Runtime::signal`] are durably enqueued
//! in SQLite and applied one at a time by a single drain worker; transitions
//! may emit further signals, immediate or timed, which re-enter the same
//! loop. On startup [`Runtime::initialize`] recovers pending delayed
//! signals (and orphaned queued ones) from the store.
//!
//! ```no_run
//! # use automat_runtime::{Runtime, RuntimeError};
//! # use automat_machine::BehaviourRegistry;
//! # async fn example(behaviours: BehaviourRegistry) -> Result<(), RuntimeError> {
//! let runtime = Runtime::builder()
//!     .database_path("automat.db")
//!     .behaviours(behaviours)
//!     .build()
//!     .await?;
//! runtime.create_schema().await?;
//! runtime.initialize().await?;
//! runtime.signal_raw("basket", "42", automat_types::Event::create()).await?;
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::SqlitePool;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::info;

use automat_kernel::{Engine, EngineError, NoProperties, PropertiesFactory};
use automat_machine::{BehaviourRegistry, Persistence};
use automat_store::{SqlCatalog, Store, StoreError};
use automat_types::{
    Clock, Codec, CodecError, Event, EventClass, NumberedSignal, Signal, SystemClock,
};

pub mod context;
mod query;
mod scheduler;

pub use query::{Combine, RangeQuery};
pub use scheduler::{ErrorHandler, LogAndRetry, Recovery};

/// Commonly used types, re-exported for one-line imports.
pub mod prelude {
    pub use crate::{Combine, ErrorHandler, LogAndRetry, RangeQuery, Recovery};
    pub use crate::{Handle, Runtime, RuntimeBuilder, RuntimeError};
    pub use automat_kernel::{NoProperties, PropertiesFactory};
    pub use automat_machine::{
        ApplyContext, Behaviour, BehaviourRegistry, Emission, Machine, MachineError,
    };
    pub use automat_types::{
        CancelTimedSignal, Clock, Codec, EntityClass, Event, EventClass, ManualClock, Signal,
        SystemClock, CANCEL_TIMED_EVENT, CREATE_EVENT,
    };
}

//─────────────────────────────
//  Error type
//─────────────────────────────

/// Errors surfaced by the runtime's public operations.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// The persistence layer failed (includes schema bootstrap).
    #[error(transparent)]
    Store(#[from] StoreError),
    /// An apply cycle failed.
    #[error(transparent)]
    Engine(#[from] EngineError),
    /// A value could not be encoded or decoded.
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// A published signal failed validation.
    #[error("invalid signal: {0}")]
    InvalidSignal(String),
    /// A required configuration field is unset, or no context is active.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// The operation is not available from this entrypoint.
    #[error("unsupported operation: {0}")]
    Unsupported(String),
}

//─────────────────────────────
//  Shared state
//─────────────────────────────

struct Inner {
    store: Store,
    clock: Arc<dyn Clock>,
    entity_codec: Codec,
    event_codec: Codec,
    drain: Arc<scheduler::DrainQueue>,
    shutdown: watch::Sender<bool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

//─────────────────────────────
//  Handle
//─────────────────────────────

/// The narrow view of a running runtime handed to behaviours.
///
/// Cheap to clone. Inside an apply cycle the current handle is available
/// through [`context::current`].
#[derive(Clone)]
pub struct Handle {
    inner: Arc<Inner>,
}

impl Handle {
    /// Durably publish a signal for immediate delivery.
    pub async fn signal_raw(
        &self,
        class: &str,
        id: &str,
        event: Event,
    ) -> Result<(), RuntimeError> {
        Runtime { inner: Arc::clone(&self.inner) }.signal_raw(class, id, event).await
    }

    /// Read the serialized entity snapshot for `(class, id)`.
    pub async fn entity_bytes(
        &self,
        class: &str,
        id: &str,
    ) -> Result<Option<Vec<u8>>, RuntimeError> {
        let mut conn = self.inner.store.pool().acquire().await.map_err(StoreError::from)?;
        let record = self.inner.store.queries().entity(&mut conn, class, id).await?;
        Ok(record.map(|record| record.bytes))
    }
}

#[async_trait]
impl Persistence for Handle {
    async fn signal_raw(&self, class: &str, id: &str, event: Event) -> anyhow::Result<()> {
        Handle::signal_raw(self, class, id, event).await.map_err(Into::into)
    }

    async fn entity_bytes(&self, class: &str, id: &str) -> anyhow::Result<Option<Vec<u8>>> {
        Handle::entity_bytes(self, class, id).await.map_err(Into::into)
    }
}

impl std::fmt::Debug for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handle").finish_non_exhaustive()
    }
}

//─────────────────────────────
//  Builder
//─────────────────────────────

/// Configures and constructs a [`Runtime`].
pub struct RuntimeBuilder {
    pool: Option<SqlitePool>,
    path: Option<PathBuf>,
    in_memory: bool,
    sql: Option<SqlCatalog>,
    behaviours: Option<BehaviourRegistry>,
    clock: Arc<dyn Clock>,
    entity_codec: Codec,
    event_codec: Codec,
    store_signals: bool,
    error_handler: Arc<dyn ErrorHandler>,
    retry_interval: Duration,
    properties: Arc<dyn PropertiesFactory>,
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self {
            pool: None,
            path: None,
            in_memory: false,
            sql: None,
            behaviours: None,
            clock: Arc::new(SystemClock),
            entity_codec: Codec::Json,
            event_codec: Codec::Json,
            store_signals: true,
            error_handler: Arc::new(LogAndRetry),
            retry_interval: Duration::from_secs(30),
            properties: Arc::new(NoProperties),
        }
    }
}

impl RuntimeBuilder {
    /// Use an existing connection pool.
    pub fn pool(mut self, pool: SqlitePool) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Open (or create) a database file at `path`.
    pub fn database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Use an in-memory database. Intended for tests and experiments; the
    /// pool is pinned to one connection, so behaviours must not reach back
    /// into the store during an apply.
    pub fn in_memory(mut self) -> Self {
        self.in_memory = true;
        self
    }

    /// Override the SQL statement catalog.
    pub fn sql(mut self, sql: SqlCatalog) -> Self {
        self.sql = Some(sql);
        self
    }

    /// The behaviour registry driving entity classes. Required.
    pub fn behaviours(mut self, behaviours: BehaviourRegistry) -> Self {
        self.behaviours = Some(behaviours);
        self
    }

    /// Override the wall clock.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Codec for entity snapshots. Default JSON.
    pub fn entity_codec(mut self, codec: Codec) -> Self {
        self.entity_codec = codec;
        self
    }

    /// Codec for event payloads. Default JSON.
    pub fn event_codec(mut self, codec: Codec) -> Self {
        self.event_codec = codec;
        self
    }

    /// Whether every applied event is appended to the signal store.
    /// Default true.
    pub fn store_signals(mut self, on: bool) -> Self {
        self.store_signals = on;
        self
    }

    /// Hook invoked when an apply cycle fails. Default: log and retry.
    pub fn error_handler(mut self, handler: Arc<dyn ErrorHandler>) -> Self {
        self.error_handler = handler;
        self
    }

    /// How long the drain loop sleeps after a failed apply. Default 30 s.
    pub fn retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Factory projecting entities into property-index rows.
    /// Default: no properties.
    pub fn properties_factory(mut self, factory: Arc<dyn PropertiesFactory>) -> Self {
        self.properties = factory;
        self
    }

    /// Validate the configuration, connect, and start the drain worker.
    pub async fn build(self) -> Result<Runtime, RuntimeError> {
        let behaviours = self.behaviours.ok_or_else(|| {
            RuntimeError::Configuration("behaviour registry is not configured".to_string())
        })?;

        let sql = self.sql.unwrap_or_default();
        let store = if let Some(pool) = self.pool {
            Store::with_catalog(pool, sql)
        } else if let Some(path) = self.path {
            let store = Store::open(&path).await?;
            Store::with_catalog(store.pool().clone(), sql)
        } else if self.in_memory {
            let store = Store::in_memory().await?;
            Store::with_catalog(store.pool().clone(), sql)
        } else {
            return Err(RuntimeError::Configuration(
                "connection factory is not configured".to_string(),
            ));
        };

        let engine = Engine::new(
            store.clone(),
            behaviours,
            Arc::clone(&self.clock),
            self.store_signals,
            self.properties,
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let inner = Arc::new(Inner {
            store,
            clock: Arc::clone(&self.clock),
            entity_codec: self.entity_codec,
            event_codec: self.event_codec,
            drain: Arc::new(scheduler::DrainQueue::new()),
            shutdown: shutdown_tx,
            worker: Mutex::new(None),
        });

        let runtime = Runtime { inner };
        let worker = scheduler::Worker {
            engine,
            queue: Arc::clone(&runtime.inner.drain),
            handle: runtime.handle(),
            error_handler: self.error_handler,
            retry_interval: self.retry_interval,
            clock: self.clock,
            shutdown: shutdown_rx,
        };
        let join = tokio::spawn(worker.run());
        *runtime.inner.worker.lock().await = Some(join);

        Ok(runtime)
    }
}

//─────────────────────────────
//  Runtime
//─────────────────────────────

/// The durable state-machine runtime.
///
/// Cheap to clone; all clones share the same store, drain queue and worker.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<Inner>,
}

impl Runtime {
    /// Start configuring a runtime.
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::default()
    }

    /// A narrow handle for behaviours and background tasks.
    pub fn handle(&self) -> Handle {
        Handle { inner: Arc::clone(&self.inner) }
    }

    /// Run the catalog's schema bootstrap script. Idempotent.
    pub async fn create_schema(&self) -> Result<(), RuntimeError> {
        self.inner.store.create_schema().await?;
        Ok(())
    }

    /// Run a caller-supplied `;`-separated bootstrap script.
    pub async fn create_schema_from(&self, script: &str) -> Result<(), RuntimeError> {
        self.inner.store.create_schema_from(script).await?;
        Ok(())
    }

    /// Publish a typed event for immediate delivery to `(class, id)`.
    pub async fn signal<E: EventClass>(
        &self,
        class: &str,
        id: &str,
        event: &E,
    ) -> Result<(), RuntimeError> {
        let event = Event::encode(self.inner.event_codec, event)?;
        self.signal_raw(class, id, event).await
    }

    /// Publish a pre-encoded event for immediate delivery to `(class, id)`.
    pub async fn signal_raw(
        &self,
        class: &str,
        id: &str,
        event: Event,
    ) -> Result<(), RuntimeError> {
        self.send(Signal::immediate(class, id, event)).await
    }

    /// Publish a signal envelope.
    ///
    /// Only the non-delayed variant is supported here; timed signals
    /// originate from FSM emission, where the cancellation key is known.
    pub async fn send(&self, signal: Signal) -> Result<(), RuntimeError> {
        if signal.fire_at.is_some() {
            return Err(RuntimeError::Unsupported(
                "delayed publication is only available to machine emissions".to_string(),
            ));
        }
        signal.validate().map_err(RuntimeError::InvalidSignal)?;

        let seq = {
            let mut conn = self.inner.store.pool().acquire().await.map_err(StoreError::from)?;
            self.inner
                .store
                .signal_queue()
                .enqueue(
                    &mut conn,
                    &signal.class,
                    &signal.id,
                    &signal.event.class,
                    &signal.event.payload,
                    self.inner.clock.now_ms(),
                )
                .await?
        };

        // The row is committed: the signal is durable from here on.
        self.inner.drain.offer(NumberedSignal { seq, signal });
        Ok(())
    }

    /// Recover durable work after a restart.
    ///
    /// Every delayed row is scheduled at its fire-at (immediately when past
    /// due). Queued non-delayed rows orphaned by a crash are re-offered in
    /// ascending sequence order; redelivery is harmless because an apply
    /// cycle starts with an existence probe.
    pub async fn initialize(&self) -> Result<(), RuntimeError> {
        let (delayed_rows, queued_rows) = {
            let mut conn = self.inner.store.pool().acquire().await.map_err(StoreError::from)?;
            let delayed = self.inner.store.delayed_queue().select_all(&mut conn).await?;
            let queued = self.inner.store.signal_queue().select_all(&mut conn).await?;
            (delayed, queued)
        };

        let recovered_delayed = delayed_rows.len();
        let recovered_queued = queued_rows.len();

        for row in delayed_rows {
            scheduler::spawn_timer(
                Arc::clone(&self.inner.drain),
                Arc::clone(&self.inner.clock),
                self.inner.shutdown.subscribe(),
                NumberedSignal {
                    seq: row.seq,
                    signal: Signal::delayed(
                        row.class,
                        row.id,
                        Event::new(row.event_class, row.event_bytes),
                        row.fire_at,
                    ),
                },
            );
        }
        for row in queued_rows {
            self.inner.drain.offer(NumberedSignal {
                seq: row.seq,
                signal: Signal::immediate(
                    row.class,
                    row.id,
                    Event::new(row.event_class, row.event_bytes),
                ),
            });
        }

        info!(
            delayed = recovered_delayed,
            queued = recovered_queued,
            "recovered durable signals"
        );
        Ok(())
    }

    /// Stop the drain worker and pending timers.
    ///
    /// Durable rows are untouched; a later [`Runtime::initialize`] on a new
    /// runtime picks the work back up.
    pub async fn shutdown(&self) {
        let _ = self.inner.shutdown.send(true);
        if let Some(join) = self.inner.worker.lock().await.take() {
            let _ = join.await;
        }
    }

    pub(crate) fn store(&self) -> &Store {
        &self.inner.store
    }

    pub(crate) fn entity_codec(&self) -> Codec {
        self.inner.entity_codec
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime").finish_non_exhaustive()
    }
}
