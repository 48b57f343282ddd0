//! Per-tab execution state
//!
//! A [`TabRuntime`] lives for one generation of a tab: from the parse of its
//! content until the next reload or delete. It owns the parsed graph, the
//! named values blocks store, the release listeners handlers registered and
//! every background task started on behalf of the tab.

use crate::block::BlockContext;
use crate::engine::SharedEngine;
use bw_core::{keys, BlockId, Context, EngineError, EngineResult, TabId, Value, VALUE_KEY};
use bw_graph::BlockGraph;
use bw_registry::ControlSignal;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};
use ulid::Ulid;

type ReleaseListener = Box<dyn FnOnce() + Send>;

struct TrackedTask {
    id: String,
    description: String,
    context: Context,
    started_at: DateTime<Utc>,
    handle: JoinHandle<()>,
}

/// Snapshot of a background task
#[derive(Debug, Clone, Serialize)]
pub struct TaskInfo {
    pub id: String,
    /// `"<tab name>: <ext> -> <opcode>"`
    pub description: String,
    pub context_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_context_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished: bool,
}

/// Execution state of one tab generation
pub struct TabRuntime {
    engine: SharedEngine,
    tab_id: TabId,
    tab_name: String,
    generation: String,
    graph: Arc<BlockGraph>,
    values: DashMap<(BlockId, String), Value>,
    release_listeners: Mutex<Vec<(BlockId, ReleaseListener)>>,
    tasks: Mutex<Vec<TrackedTask>>,
    destroyed: AtomicBool,
}

impl TabRuntime {
    pub fn new(
        engine: SharedEngine,
        tab_id: impl Into<TabId>,
        tab_name: impl Into<String>,
        graph: BlockGraph,
    ) -> Arc<Self> {
        Arc::new(Self {
            engine,
            tab_id: tab_id.into(),
            tab_name: tab_name.into(),
            generation: Ulid::new().to_string(),
            graph: Arc::new(graph),
            values: DashMap::new(),
            release_listeners: Mutex::new(Vec::new()),
            tasks: Mutex::new(Vec::new()),
            destroyed: AtomicBool::new(false),
        })
    }

    pub fn engine(&self) -> &SharedEngine {
        &self.engine
    }

    pub fn tab_id(&self) -> &str {
        &self.tab_id
    }

    pub fn tab_name(&self) -> &str {
        &self.tab_name
    }

    /// Unique id of this parse of the tab
    pub fn generation(&self) -> &str {
        &self.generation
    }

    pub fn graph(&self) -> &Arc<BlockGraph> {
        &self.graph
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Execution context for a block of this tab
    pub fn block(self: &Arc<Self>, block_id: &str) -> EngineResult<BlockContext> {
        BlockContext::root(self.clone(), block_id, Context::for_tab(self.tab_id.clone()))
    }

    // --- named values ---

    /// Store a named value on a block
    ///
    /// Writing [`VALUE_KEY`] also signals the block's value lock, which is how
    /// linked variables follow a source block.
    pub fn set_value(&self, block_id: &str, key: &str, value: Value) {
        self.values
            .insert((block_id.to_string(), key.to_string()), value.clone());
        if key == VALUE_KEY {
            self.engine
                .locks()
                .signal(&self.tab_id, &keys::block_value(block_id), value);
        }
    }

    /// Named value stored on exactly this block
    pub fn own_value(&self, block_id: &str, key: &str) -> Option<Value> {
        self.values
            .get(&(block_id.to_string(), key.to_string()))
            .map(|v| v.value().clone())
    }

    /// Named value of a block or, failing that, of its closest ancestor
    pub fn get_value(&self, block_id: &str, key: &str) -> Option<Value> {
        let mut current = self.graph.get(block_id);
        let mut hops = 0;
        while let Some(block) = current {
            if let Some(value) = self.own_value(&block.id, key) {
                return Some(value);
            }
            hops += 1;
            if hops > self.graph.len() {
                break;
            }
            current = self.graph.parent_of(&block.id);
        }
        None
    }

    // --- release listeners ---

    /// Register cleanup to run when the block is released
    pub fn on_release(&self, block_id: &str, listener: impl FnOnce() + Send + 'static) {
        self.listeners()
            .push((block_id.to_string(), Box::new(listener)));
    }

    fn listeners(&self) -> MutexGuard<'_, Vec<(BlockId, ReleaseListener)>> {
        self.release_listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    /// Run and drop every release listener
    pub fn release_blocks(&self) -> usize {
        let listeners: Vec<_> = self.listeners().drain(..).collect();
        let count = listeners.len();
        for (block_id, listener) in listeners {
            debug!(tab = %self.tab_id, block_id = %block_id, "Releasing block");
            listener();
        }
        count
    }

    // --- tasks ---

    fn tracked(&self) -> MutexGuard<'_, Vec<TrackedTask>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start a tracked background task
    ///
    /// The task runs inside a span named after the tab; its error, if any,
    /// is reported once. Returns `None` once the runtime is destroyed or
    /// when called outside a tokio runtime.
    pub fn spawn<F>(
        self: &Arc<Self>,
        description: impl Into<String>,
        context: Context,
        future: F,
    ) -> Option<String>
    where
        F: Future<Output = EngineResult<ControlSignal>> + Send + 'static,
    {
        // Held until the task is tracked so `shutdown` cannot miss it
        let mut tasks = self.tracked();
        if self.is_destroyed() {
            debug!(tab = %self.tab_id, "Not spawning on a destroyed tab");
            return None;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(tab = %self.tab_id, "No async runtime to spawn on");
            return None;
        };

        let description = description.into();
        let id = Ulid::new().to_string();
        let span = info_span!("tab", tab = %self.tab_name, task = %description);
        let runtime = self.clone();
        let task_description = description.clone();

        let join = handle.spawn(
            async move {
                match future.await {
                    Ok(_) => info!(task = %task_description, "finished"),
                    Err(err) => runtime.report(&err),
                }
            }
            .instrument(span),
        );

        tasks.retain(|t| !t.handle.is_finished());
        tasks.push(TrackedTask {
            id: id.clone(),
            description,
            context,
            started_at: Utc::now(),
            handle: join,
        });
        Some(id)
    }

    /// Report an aborted execution to the log and to the operator
    ///
    /// A lock released underneath a waiter is the tab being torn down and is
    /// not reported.
    pub fn report(&self, err: &EngineError) {
        if matches!(err.root_cause(), EngineError::LockReleased { .. }) {
            debug!(tab = %self.tab_id, error = %err, "Execution ended by lock release");
            return;
        }
        error!(tab = %self.tab_id, error = %err, "Execution aborted");
        self.engine
            .notifications()
            .error(Some(&self.tab_id), err.to_string());
    }

    /// Snapshot of the tracked tasks
    pub fn tasks(&self) -> Vec<TaskInfo> {
        self.tracked()
            .iter()
            .map(|t| TaskInfo {
                id: t.id.clone(),
                description: t.description.clone(),
                context_id: t.context.id.clone(),
                parent_context_id: t.context.parent_id.clone(),
                started_at: t.started_at,
                finished: t.handle.is_finished(),
            })
            .collect()
    }

    /// Number of tasks still running
    pub fn running_tasks(&self) -> usize {
        self.tracked()
            .iter()
            .filter(|t| !t.handle.is_finished())
            .count()
    }

    /// Abort the running tasks started with the given context id
    ///
    /// Returns how many tasks were aborted.
    pub fn cancel_context(&self, context_id: &str) -> usize {
        let mut cancelled = 0;
        for task in self.tracked().iter() {
            if task.context.id == context_id && !task.handle.is_finished() {
                debug!(tab = %self.tab_id, task = %task.description, "Cancelling task");
                task.handle.abort();
                cancelled += 1;
            }
        }
        cancelled
    }

    /// Stop accepting tasks, abort every tracked task and wait for them
    pub async fn shutdown(&self) {
        let tasks: Vec<TrackedTask> = {
            let mut tracked = self.tracked();
            self.destroyed.store(true, Ordering::SeqCst);
            tracked.drain(..).collect()
        };
        if tasks.is_empty() {
            return;
        }
        debug!(tab = %self.tab_id, count = tasks.len(), "Cancelling tasks");
        for task in &tasks {
            task.handle.abort();
        }
        for task in tasks {
            // Cancellation is the expected outcome
            let _ = task.handle.await;
        }
    }
}

impl std::fmt::Debug for TabRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TabRuntime")
            .field("tab_id", &self.tab_id)
            .field("tab_name", &self.tab_name)
            .field("generation", &self.generation)
            .field("blocks", &self.graph.len())
            .finish()
    }
}
