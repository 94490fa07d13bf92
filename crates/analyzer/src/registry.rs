//! Algorithm handle registry.
//!
//! One ordered map of handles per algorithm type plus the list of handles
//! currently selected for the pipeline. Both tables are indexed by
//! [`AlgoType::index`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use contracts::{
    AlgoConfig, AlgoDescriptor, AlgoMode, AlgoType, Algorithm, EngineError, EngineResult,
    PrepareParams, ResultGroup, ALGO_TYPE_COUNT,
};
use serde::Serialize;
use tracing::{debug, info};

/// Algorithm context shared between the registry and running passes
pub type AlgoContext = Arc<Mutex<Box<dyn Algorithm>>>;

/// Id of the built-in handle of every type
pub const DEFAULT_ALGO_ID: u32 = 0;

/// Lock an algorithm context, recovering from a poisoned mutex
pub fn lock_context(context: &AlgoContext) -> MutexGuard<'_, Box<dyn Algorithm>> {
    context.lock().unwrap_or_else(PoisonError::into_inner)
}

struct AlgoHandle {
    descriptor: AlgoDescriptor,
    enabled: bool,
    context: AlgoContext,
}

impl AlgoHandle {
    fn new(descriptor: AlgoDescriptor, enabled: bool) -> Self {
        let context = Arc::new(Mutex::new(descriptor.create()));
        Self {
            descriptor,
            enabled,
            context,
        }
    }
}

/// Handle selected for a pipeline pass
#[derive(Clone)]
pub struct ActiveHandle {
    pub algo: AlgoType,
    pub id: u32,
    pub context: AlgoContext,
}

impl fmt::Debug for ActiveHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveHandle")
            .field("algo", &self.algo)
            .field("id", &self.id)
            .finish()
    }
}

/// Registry listing entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HandleInfo {
    pub algo: AlgoType,
    pub id: u32,
    pub name: String,
    pub version: String,
    pub enabled: bool,
    pub current: bool,
}

struct Tables {
    handles: [BTreeMap<u32, AlgoHandle>; ALGO_TYPE_COUNT],
    current: [Vec<u32>; ALGO_TYPE_COUNT],
    next_id: [u32; ALGO_TYPE_COUNT],
}

impl Tables {
    fn new() -> Self {
        Self {
            handles: std::array::from_fn(|_| BTreeMap::new()),
            current: std::array::from_fn(|_| Vec::new()),
            next_id: [DEFAULT_ALGO_ID + 1; ALGO_TYPE_COUNT],
        }
    }

    fn handle_mut(&mut self, algo: AlgoType, id: u32) -> EngineResult<&mut AlgoHandle> {
        self.handles[algo.index()]
            .get_mut(&id)
            .ok_or(EngineError::AlgoNotFound { algo, id })
    }
}

/// Per-type table of algorithm handles
pub struct AlgoRegistry {
    mode: AlgoMode,
    tables: Mutex<Tables>,
}

impl fmt::Debug for AlgoRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlgoRegistry")
            .field("mode", &self.mode)
            .field("handles", &self.len())
            .finish()
    }
}

impl AlgoRegistry {
    pub fn new(mode: AlgoMode) -> Self {
        Self {
            mode,
            tables: Mutex::new(Tables::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn mode(&self) -> AlgoMode {
        self.mode
    }

    /// Install the built-in handle (id 0) of a type, enabled and current
    pub fn register_default(&self, descriptor: AlgoDescriptor) {
        let algo = descriptor.algo_type;
        let mut tables = self.lock();
        tables.handles[algo.index()].insert(DEFAULT_ALGO_ID, AlgoHandle::new(descriptor, true));
        tables.current[algo.index()] = vec![DEFAULT_ALGO_ID];
    }

    /// Register an additional handle, disabled and not current
    ///
    /// Ids are allocated per type starting at 1 and never reused.
    pub fn add_algo(&self, descriptor: AlgoDescriptor) -> u32 {
        let algo = descriptor.algo_type;
        let name = descriptor.name.clone();
        let mut tables = self.lock();
        let id = tables.next_id[algo.index()];
        tables.next_id[algo.index()] += 1;
        tables.handles[algo.index()].insert(id, AlgoHandle::new(descriptor, false));
        info!(algo = %algo, id, name = %name, "algorithm registered");
        id
    }

    /// Enable or disable a handle
    ///
    /// Enabling makes the handle current. In single mode, and for types
    /// without multi support, it replaces the previous current handle which
    /// is disabled. When `prepare` is given the handle is prepared first; a
    /// prepare failure leaves the registry unchanged.
    pub fn enable(
        &self,
        algo: AlgoType,
        id: u32,
        on: bool,
        prepare: Option<&PrepareParams>,
    ) -> EngineResult<()> {
        let context = {
            let mut tables = self.lock();
            let handle = tables.handle_mut(algo, id)?;
            if !on {
                handle.enabled = false;
                debug!(algo = %algo, id, "algorithm disabled");
                return Ok(());
            }
            handle.context.clone()
        };

        if let Some(params) = prepare {
            lock_context(&context).prepare(params)?;
        }

        let mut tables = self.lock();
        tables.handle_mut(algo, id)?.enabled = true;

        let replace = self.mode == AlgoMode::Single || !algo.supports_multi();
        if replace {
            let previous = std::mem::replace(&mut tables.current[algo.index()], vec![id]);
            for prev in previous.into_iter().filter(|p| *p != id) {
                if let Some(handle) = tables.handles[algo.index()].get_mut(&prev) {
                    handle.enabled = false;
                }
                debug!(algo = %algo, id = prev, "previous current handle disabled");
            }
        } else if !tables.current[algo.index()].contains(&id) {
            tables.current[algo.index()].push(id);
        }

        info!(algo = %algo, id, replace, "algorithm enabled");
        Ok(())
    }

    /// Remove a handle
    ///
    /// # Errors
    /// - `ProtectedAlgo` for id 0
    /// - `AlgoBusy` while the handle is current and enabled
    pub fn remove(&self, algo: AlgoType, id: u32) -> EngineResult<()> {
        if id == DEFAULT_ALGO_ID {
            return Err(EngineError::ProtectedAlgo { algo });
        }
        let mut tables = self.lock();
        let handle = tables.handle_mut(algo, id)?;
        let busy = handle.enabled;
        let current = tables.current[algo.index()].contains(&id);
        if busy && current {
            return Err(EngineError::AlgoBusy { algo, id });
        }
        tables.handles[algo.index()].remove(&id);
        tables.current[algo.index()].retain(|c| *c != id);
        info!(algo = %algo, id, "algorithm removed");
        Ok(())
    }

    /// Whether the handle exists and is enabled
    pub fn is_enabled(&self, algo: AlgoType, id: u32) -> bool {
        self.lock().handles[algo.index()]
            .get(&id)
            .map(|h| h.enabled)
            .unwrap_or(false)
    }

    /// Algorithm context of a handle
    pub fn get_context(&self, algo: AlgoType, id: u32) -> EngineResult<AlgoContext> {
        self.lock().handle_mut(algo, id).map(|h| h.context.clone())
    }

    /// Forward a tuning document to one handle
    pub fn update_config(&self, algo: AlgoType, id: u32, config: &AlgoConfig) -> EngineResult<()> {
        let context = self.get_context(algo, id)?;
        let result = lock_context(&context).update_config(config);
        result
    }

    /// Ids currently selected for a type
    pub fn current_ids(&self, algo: AlgoType) -> Vec<u32> {
        self.lock().current[algo.index()].clone()
    }

    /// Enabled current handles of a group, in registration order
    pub fn active_handles(&self, group: ResultGroup) -> Vec<ActiveHandle> {
        let tables = self.lock();
        let mut active = Vec::new();
        for algo in AlgoType::ALL.into_iter().filter(|a| a.group() == group) {
            for id in &tables.current[algo.index()] {
                if let Some(handle) = tables.handles[algo.index()].get(id) {
                    if handle.enabled {
                        active.push(ActiveHandle {
                            algo,
                            id: *id,
                            context: handle.context.clone(),
                        });
                    }
                }
            }
        }
        active
    }

    /// Every current handle, enabled or not, in registration order
    pub fn current_handles(&self) -> Vec<ActiveHandle> {
        let guard = self.lock();
        let tables: &Tables = &guard;
        let handles = AlgoType::ALL
            .into_iter()
            .flat_map(|algo| {
                tables.current[algo.index()].iter().filter_map(move |id| {
                    tables.handles[algo.index()]
                        .get(id)
                        .map(|handle| ActiveHandle {
                            algo,
                            id: *id,
                            context: handle.context.clone(),
                        })
                })
            })
            .collect();
        handles
    }

    /// Snapshot of every registered handle
    pub fn list(&self) -> Vec<HandleInfo> {
        let tables = self.lock();
        let mut infos = Vec::new();
        for algo in AlgoType::ALL {
            for (id, handle) in &tables.handles[algo.index()] {
                infos.push(HandleInfo {
                    algo,
                    id: *id,
                    name: handle.descriptor.name.clone(),
                    version: handle.descriptor.version.clone(),
                    enabled: handle.enabled,
                    current: tables.current[algo.index()].contains(id),
                });
            }
        }
        infos
    }

    /// Total registered handles
    pub fn len(&self) -> usize {
        self.lock().handles.iter().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Release every handle and reset id allocation
    pub fn clear(&self) {
        *self.lock() = Tables::new();
    }
}
