use loomcore::{NodeCategory, NodeContract, Processor};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

/// How a processor instance is obtained on lookup: a shared instance, or a
/// factory that builds a fresh (potentially stateful) one per retrieval.
#[derive(Clone)]
pub enum ProcessorSource {
    Shared(Arc<dyn Processor>),
    Factory(Arc<dyn Fn() -> Arc<dyn Processor> + Send + Sync>),
}

impl ProcessorSource {
    fn instantiate(&self) -> Arc<dyn Processor> {
        match self {
            Self::Shared(p) => Arc::clone(p),
            Self::Factory(f) => f(),
        }
    }
}

/// Contract plus executable, registered under the contract's type id.
#[derive(Clone)]
pub struct NodeDefinition {
    pub contract: NodeContract,
    pub processor: ProcessorSource,
}

impl NodeDefinition {
    pub fn new(contract: NodeContract, processor: Arc<dyn Processor>) -> Self {
        Self {
            contract,
            processor: ProcessorSource::Shared(processor),
        }
    }

    pub fn with_factory<F>(contract: NodeContract, factory: F) -> Self
    where
        F: Fn() -> Arc<dyn Processor> + Send + Sync + 'static,
    {
        Self {
            contract,
            processor: ProcessorSource::Factory(Arc::new(factory)),
        }
    }

    /// Obtain an executable instance; factory-backed definitions build a
    /// fresh one per call.
    pub fn instantiate(&self) -> Arc<dyn Processor> {
        self.processor.instantiate()
    }
}

/// Change notification pushed to registry listeners.
#[derive(Debug, Clone)]
pub enum RegistryEvent {
    Registered { type_id: String },
    Unregistered { type_id: String },
}

type Listener = Arc<dyn Fn(&RegistryEvent) + Send + Sync>;

/// Registry of available node types.
///
/// An explicit instance is handed to each scheduler by constructor; there is
/// no process-global registry. Lookups never fail loudly: a missing type is
/// `None` and the scheduler turns it into a structured per-node error.
pub struct NodeRegistry {
    definitions: RwLock<HashMap<String, NodeDefinition>>,
    /// Kept apart from the definitions and never held while a listener
    /// runs, so listeners may call back into the registry.
    listeners: Mutex<HashMap<u64, Listener>>,
    next_listener_id: AtomicU64,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self {
            definitions: RwLock::new(HashMap::new()),
            listeners: Mutex::new(HashMap::new()),
            next_listener_id: AtomicU64::new(0),
        }
    }

    /// Register a definition under its contract's type id. Re-registering an
    /// existing id overwrites it (hot-reloading node types is supported) and
    /// logs a warning.
    pub fn register(&self, definition: NodeDefinition) {
        let type_id = definition.contract.type_id.clone();
        {
            let mut definitions = self.definitions.write().expect("registry lock poisoned");
            if definitions.insert(type_id.clone(), definition).is_some() {
                tracing::warn!(%type_id, "overwriting existing node type registration");
            } else {
                tracing::info!(%type_id, "registered node type");
            }
        }
        self.notify(&RegistryEvent::Registered { type_id });
    }

    /// Convenience for factory-backed registrations.
    pub fn register_with_factory<F>(&self, contract: NodeContract, factory: F)
    where
        F: Fn() -> Arc<dyn Processor> + Send + Sync + 'static,
    {
        self.register(NodeDefinition::with_factory(contract, factory));
    }

    pub fn unregister(&self, type_id: &str) -> bool {
        let removed = {
            let mut definitions = self.definitions.write().expect("registry lock poisoned");
            definitions.remove(type_id).is_some()
        };
        if removed {
            self.notify(&RegistryEvent::Unregistered {
                type_id: type_id.to_string(),
            });
        }
        removed
    }

    pub fn get(&self, type_id: &str) -> Option<NodeDefinition> {
        let definitions = self.definitions.read().expect("registry lock poisoned");
        definitions.get(type_id).cloned()
    }

    pub fn contract(&self, type_id: &str) -> Option<NodeContract> {
        let definitions = self.definitions.read().expect("registry lock poisoned");
        definitions.get(type_id).map(|d| d.contract.clone())
    }

    /// Resolve an executable instance. Factory-backed types produce a fresh
    /// processor on every call.
    pub fn processor(&self, type_id: &str) -> Option<Arc<dyn Processor>> {
        let definitions = self.definitions.read().expect("registry lock poisoned");
        definitions.get(type_id).map(|d| d.processor.instantiate())
    }

    pub fn by_category(&self, category: NodeCategory) -> Vec<NodeContract> {
        let definitions = self.definitions.read().expect("registry lock poisoned");
        definitions
            .values()
            .filter(|d| d.contract.category == category)
            .map(|d| d.contract.clone())
            .collect()
    }

    /// Case-insensitive search over type id and display name, for palette UIs.
    pub fn search(&self, query: &str) -> Vec<NodeContract> {
        let needle = query.to_lowercase();
        let definitions = self.definitions.read().expect("registry lock poisoned");
        definitions
            .values()
            .filter(|d| {
                d.contract.type_id.to_lowercase().contains(&needle)
                    || d.contract.display_name.to_lowercase().contains(&needle)
            })
            .map(|d| d.contract.clone())
            .collect()
    }

    pub fn type_ids(&self) -> Vec<String> {
        let definitions = self.definitions.read().expect("registry lock poisoned");
        definitions.keys().cloned().collect()
    }

    /// Subscribe to register/unregister notifications. The subscription is
    /// removed when the returned guard is dropped.
    pub fn subscribe<F>(self: &Arc<Self>, listener: F) -> RegistrySubscription
    where
        F: Fn(&RegistryEvent) + Send + Sync + 'static,
    {
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut listeners = self.listeners.lock().expect("listener lock poisoned");
            listeners.insert(id, Arc::new(listener));
        }
        RegistrySubscription {
            registry: Arc::downgrade(self),
            id,
        }
    }

    fn notify(&self, event: &RegistryEvent) {
        // Snapshot the handles so no lock is held during invocation.
        let handles: Vec<(u64, Listener)> = {
            let listeners = self.listeners.lock().expect("listener lock poisoned");
            listeners.iter().map(|(id, l)| (*id, Arc::clone(l))).collect()
        };
        for (id, listener) in handles {
            // A panicking listener must not take down the registry or the
            // other listeners.
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                tracing::warn!(listener = id, "registry listener panicked");
            }
        }
    }

    fn remove_listener(&self, id: u64) {
        let mut listeners = self.listeners.lock().expect("listener lock poisoned");
        listeners.remove(&id);
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Guard for a registry subscription; dropping it unsubscribes.
pub struct RegistrySubscription {
    registry: Weak<NodeRegistry>,
    id: u64,
}

impl RegistrySubscription {
    pub fn unsubscribe(self) {}
}

impl Drop for RegistrySubscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove_listener(self.id);
        }
    }
}
