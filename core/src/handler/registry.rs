// Handler registry — name → builder at startup, name → handler at runtime

use super::{Handler, HandlerError};
use crate::message::Packet;
use futures::stream::{self, BoxStream, SelectAll, StreamExt};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};

/// Capacity of each handler's producer channel.
pub const PRODUCER_BUFFER: usize = 500;

/// Constructor for a named handler. Invoked exactly once by
/// [`HandlerRegistry::init_all`].
pub type HandlerBuilder =
    Box<dyn FnOnce() -> Result<Arc<dyn Handler>, HandlerError> + Send + 'static>;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Failed to init handler {name:?}: {source}")]
    Build {
        name: String,
        #[source]
        source: HandlerError,
    },
}

/// Builders collected before startup.
///
/// Consumed by [`HandlerRegistry::init_all`], so a registry can only be
/// initialized once and no builder can be added afterwards.
#[derive(Default)]
pub struct HandlerRegistry {
    builders: BTreeMap<String, HandlerBuilder>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a builder under `name`. Registering a name twice keeps the
    /// last builder.
    pub fn register_builder<F>(&mut self, name: impl Into<String>, builder: F)
    where
        F: FnOnce() -> Result<Arc<dyn Handler>, HandlerError> + Send + 'static,
    {
        let name = name.into();
        if self.builders.insert(name.clone(), Box::new(builder)).is_some() {
            warn!(handler = %name, "handler builder replaced");
        }
    }

    pub fn len(&self) -> usize {
        self.builders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.builders.is_empty()
    }

    /// Run every builder once, failing on the first error.
    pub fn init_all(self) -> Result<Handlers, RegistryError> {
        let mut handlers = HashMap::with_capacity(self.builders.len());
        for (name, builder) in self.builders {
            let handler = builder().map_err(|source| RegistryError::Build {
                name: name.clone(),
                source,
            })?;
            info!(handler = %name, "handler initialized");
            handlers.insert(name, handler);
        }
        Ok(Handlers {
            inner: Arc::new(handlers),
        })
    }
}

/// Initialized handlers, immutable for the rest of the process.
///
/// Cheap to clone; every clone shares the same handler instances.
#[derive(Clone, Default)]
pub struct Handlers {
    inner: Arc<HashMap<String, Arc<dyn Handler>>>,
}

impl Handlers {
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Handler>> {
        self.inner.get(name)
    }

    pub fn list_all(&self) -> &HashMap<String, Arc<dyn Handler>> {
        &self.inner
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.inner.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Spawn one producer task per handler and merge their channels.
    ///
    /// Must be called from within a tokio runtime. The tasks live for the
    /// process lifetime; the returned [`Producers`] outlives any single relay
    /// connection.
    pub fn spawn_producers(&self, buffer: usize) -> Producers {
        let mut streams = stream::select_all(Vec::<BoxStream<'static, (String, Packet)>>::new());

        for (name, handler) in self.inner.iter() {
            let (tx, rx) = mpsc::channel(buffer);
            let handler = Arc::clone(handler);
            let task_name = name.clone();
            tokio::spawn(async move {
                handler.produce(tx).await;
                warn!(handler = %task_name, "handler producer exited");
            });

            let name = name.clone();
            streams.push(
                ReceiverStream::new(rx)
                    .map(move |packet| (name.clone(), packet))
                    .boxed(),
            );
        }

        Producers { streams }
    }
}

impl std::fmt::Debug for Handlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handlers")
            .field("names", &self.names())
            .finish()
    }
}

/// Fan-in over every handler's producer channel.
///
/// Each item is tagged with the name of the handler that produced it. Ready
/// channels are polled round-robin, and packets from one handler keep their
/// emission order.
pub struct Producers {
    streams: SelectAll<BoxStream<'static, (String, Packet)>>,
}

impl Producers {
    /// Wait for the next packet from any handler. `None` once every producer
    /// has exited.
    pub async fn next(&mut self) -> Option<(String, Packet)> {
        self.streams.next().await
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}
