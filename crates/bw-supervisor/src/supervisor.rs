//! Tab lifecycle management

use crate::error::{SupervisorError, SupervisorResult};
use bw_blocks::is_once_execution;
use bw_core::{EngineResult, TabId, Value, GENERAL_TAB};
use bw_graph::{is_empty_content, BlockGraph};
use bw_interpreter::{BlockContext, SharedEngine, TabRuntime, TaskInfo};
use bw_registry::{BlockKind, ControlSignal};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex, RwLock};
use tracing::{debug, info, instrument, warn};

/// Lifecycle state of a tab
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TabStatus {
    /// Known but never started, or started with empty content
    Unloaded,
    /// Content is being parsed and its roots started
    Parsing,
    /// Running with `tasks` live background tasks
    Running { tasks: usize },
    /// Previous generation is being torn down
    Reloading,
    /// Stopped by a failed reload or by shutdown
    Stopped { last_error: Option<String> },
}

/// Snapshot of a tab
#[derive(Debug, Clone, Serialize)]
pub struct TabInfo {
    pub id: TabId,
    pub name: String,
    pub status: TabStatus,
    /// Id of the running generation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation: Option<String>,
}

/// Persisted tab handed to [`Supervisor::load_all`]
#[derive(Debug, Clone, Deserialize)]
pub struct TabSource {
    pub id: TabId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub content: String,
}

impl TabSource {
    pub fn new(id: impl Into<TabId>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            content: content.into(),
        }
    }
}

struct TabEntry {
    name: String,
    content: String,
    status: TabStatus,
    runtime: Option<Arc<TabRuntime>>,
}

impl TabEntry {
    fn new(name: &str, content: &str) -> Self {
        Self {
            name: name.to_string(),
            content: content.to_string(),
            status: TabStatus::Unloaded,
            runtime: None,
        }
    }

    fn status(&self) -> TabStatus {
        match (&self.status, &self.runtime) {
            (TabStatus::Running { .. }, Some(runtime)) => TabStatus::Running {
                tasks: runtime.running_tasks(),
            },
            (status, _) => status.clone(),
        }
    }
}

/// Owner of every tab and its running generation
///
/// The Supervisor is responsible for:
/// - Keeping the content of each tab
/// - Parsing content and starting one task per top-level tree
/// - Tearing a generation down (locks, release listeners, tasks) before the
///   next one starts
/// - Reporting load failures once and leaving the tab stopped
pub struct Supervisor {
    engine: SharedEngine,
    general_tab: TabId,
    tabs: RwLock<HashMap<TabId, TabEntry>>,
    /// Serializes reloads, deletes and shutdown
    reloads: Mutex<()>,
}

impl Supervisor {
    pub fn new(engine: SharedEngine) -> Self {
        Self {
            engine,
            general_tab: GENERAL_TAB.to_string(),
            tabs: RwLock::new(HashMap::new()),
            reloads: Mutex::new(()),
        }
    }

    /// Use another id for the tab that always exists
    pub fn with_general_tab(mut self, id: impl Into<TabId>) -> Self {
        self.general_tab = id.into();
        self
    }

    pub fn engine(&self) -> &SharedEngine {
        &self.engine
    }

    pub fn general_tab(&self) -> &str {
        &self.general_tab
    }

    /// Whether workspace content holds nothing worth running
    ///
    /// Content is empty when it is blank or when every block and variable
    /// group of its target is empty or absent.
    pub fn is_empty(content: &str) -> SupervisorResult<bool> {
        Ok(is_empty_content(content)?)
    }

    // --- tab management ---

    #[instrument(skip(self, content))]
    pub async fn create_tab(&self, id: &str, name: &str, content: &str) -> SupervisorResult<()> {
        let mut tabs = self.tabs.write().await;
        if tabs.contains_key(id) {
            return Err(SupervisorError::TabExists(id.to_string()));
        }
        tabs.insert(id.to_string(), TabEntry::new(name, content));
        info!("Tab created");
        Ok(())
    }

    /// Store new content for a tab and reload it
    ///
    /// Unknown tabs are created, named after their id.
    #[instrument(skip(self, content))]
    pub async fn save(&self, id: &str, content: &str) -> SupervisorResult<()> {
        {
            let mut tabs = self.tabs.write().await;
            tabs.entry(id.to_string())
                .or_insert_with(|| TabEntry::new(id, ""))
                .content = content.to_string();
        }
        self.reload(id).await
    }

    /// Delete a tab, stopping its generation
    ///
    /// The general tab and tabs that still have content are kept.
    #[instrument(skip(self))]
    pub async fn delete_tab(&self, id: &str) -> SupervisorResult<()> {
        if id == self.general_tab {
            return Err(SupervisorError::GeneralTabNotDeletable(id.to_string()));
        }
        let _serial = self.reloads.lock().await;
        let runtime = {
            let mut tabs = self.tabs.write().await;
            let entry = tabs
                .get(id)
                .ok_or_else(|| SupervisorError::TabNotFound(id.to_string()))?;
            if !is_empty_content(&entry.content).unwrap_or(false) {
                return Err(SupervisorError::TabNotEmpty(id.to_string()));
            }
            tabs.remove(id).and_then(|entry| entry.runtime)
        };
        self.teardown(id, runtime).await;
        info!("Tab deleted");
        Ok(())
    }

    /// Register persisted tabs and start each of them
    ///
    /// The general tab is created when the sources do not contain it. Load
    /// failures are reported per tab and do not stop the others. Returns the
    /// number of tabs that loaded.
    pub async fn load_all(&self, sources: Vec<TabSource>) -> usize {
        let mut ids = Vec::with_capacity(sources.len() + 1);
        {
            let mut tabs = self.tabs.write().await;
            if !sources.iter().any(|s| s.id == self.general_tab) && !tabs.contains_key(&self.general_tab) {
                tabs.insert(
                    self.general_tab.clone(),
                    TabEntry::new(&self.general_tab, ""),
                );
                ids.push(self.general_tab.clone());
            }
            for source in sources {
                let name = source.name.unwrap_or_else(|| source.id.clone());
                let entry = tabs
                    .entry(source.id.clone())
                    .or_insert_with(|| TabEntry::new(&name, ""));
                entry.name = name;
                entry.content = source.content;
                ids.push(source.id);
            }
        }

        let mut loaded = 0;
        for id in &ids {
            if self.reload(id).await.is_ok() {
                loaded += 1;
            }
        }
        info!(tabs = ids.len(), loaded, "Tabs loaded");
        loaded
    }

    // --- lifecycle ---

    /// Replace the running generation of a tab with one built from its content
    ///
    /// The old generation is fully torn down first. A failure is reported
    /// once and leaves the tab stopped; nothing is rolled back.
    #[instrument(skip(self))]
    pub async fn reload(&self, id: &str) -> SupervisorResult<()> {
        let _serial = self.reloads.lock().await;
        let (name, content, previous) = {
            let mut tabs = self.tabs.write().await;
            let entry = tabs
                .get_mut(id)
                .ok_or_else(|| SupervisorError::TabNotFound(id.to_string()))?;
            entry.status = TabStatus::Reloading;
            (entry.name.clone(), entry.content.clone(), entry.runtime.take())
        };
        self.teardown(id, previous).await;

        self.set_status(id, TabStatus::Parsing).await;
        match self.start(id, &name, &content).await {
            Ok(runtime) => {
                let mut tabs = self.tabs.write().await;
                if let Some(entry) = tabs.get_mut(id) {
                    entry.status = match runtime {
                        Some(_) => TabStatus::Running { tasks: 0 },
                        None => TabStatus::Unloaded,
                    };
                    entry.runtime = runtime;
                }
                Ok(())
            }
            Err(err) => {
                self.engine
                    .notifications()
                    .error(Some(id), format!("Unable to load tab '{}': {}", name, err));
                self.set_status(
                    id,
                    TabStatus::Stopped {
                        last_error: Some(err.to_string()),
                    },
                )
                .await;
                Err(err.into())
            }
        }
    }

    /// Stop the running generation of a tab, keeping its content
    ///
    /// The tab stays stopped until the next reload.
    #[instrument(skip(self))]
    pub async fn release(&self, id: &str) -> SupervisorResult<()> {
        let _serial = self.reloads.lock().await;
        let runtime = {
            let mut tabs = self.tabs.write().await;
            let entry = tabs
                .get_mut(id)
                .ok_or_else(|| SupervisorError::TabNotFound(id.to_string()))?;
            entry.status = TabStatus::Stopped { last_error: None };
            entry.runtime.take()
        };
        self.teardown(id, runtime).await;
        info!("Tab released");
        Ok(())
    }

    /// Release locks and listeners, then cancel and await every task
    async fn teardown(&self, id: &str, runtime: Option<Arc<TabRuntime>>) {
        let locks = self.engine.locks();
        locks.release(id);
        if let Some(runtime) = runtime {
            let released = runtime.release_blocks();
            runtime.shutdown().await;
            debug!(
                tab = %id,
                generation = %runtime.generation(),
                released,
                "Generation torn down"
            );
        }
        // Tasks may have created locks while being cancelled
        locks.release(id);
    }

    /// Parse content and start its roots
    ///
    /// Once-execution roots are handled inline. Hat roots are started next
    /// and given up to the poll interval to subscribe, so command roots that
    /// signal them right away are heard.
    async fn start(
        &self,
        id: &str,
        name: &str,
        content: &str,
    ) -> EngineResult<Option<Arc<TabRuntime>>> {
        if is_empty_content(content)? {
            debug!(tab = %id, "Tab has no content");
            return Ok(None);
        }
        let graph = BlockGraph::parse(content)?;
        for (var_id, var_name, initial) in graph.declared_variables() {
            self.engine.variables().declare(&var_id, &var_name, initial);
        }
        let runtime = TabRuntime::new(self.engine.clone(), id, name, graph);

        let registry = self.engine.registry();
        let mut once = Vec::new();
        let mut hats = Vec::new();
        let mut commands = Vec::new();
        for root in runtime.graph().top_level_roots() {
            let ctx = runtime.block(&root.id)?;
            if is_once_execution(&root.opcode) {
                once.push(ctx);
            } else if registry.block_kind(root.opcode.extension_id(), root.opcode.opcode())
                == Some(BlockKind::Hat)
            {
                hats.push(ctx);
            } else {
                commands.push(ctx);
            }
        }

        for ctx in once {
            if let Err(err) = ctx.handle().await {
                runtime.report(&err);
            }
        }

        let mut subscribed = Vec::with_capacity(hats.len());
        for ctx in hats {
            let (done, finished) = oneshot::channel::<()>();
            spawn_root(&runtime, ctx, Some(done));
            subscribed.push(finished);
        }
        let limit = self.engine.settings().poll_interval;
        if tokio::time::timeout(limit, join_all(subscribed)).await.is_err() {
            warn!(tab = %id, "Hats still starting, starting commands anyway");
        }

        for ctx in commands {
            spawn_root(&runtime, ctx, None);
        }

        info!(
            tab = %id,
            generation = %runtime.generation(),
            tasks = runtime.running_tasks(),
            "Tab started"
        );
        Ok(Some(runtime))
    }

    /// Stop every tab and release every lock
    pub async fn shutdown(&self) {
        let _serial = self.reloads.lock().await;
        let generations: Vec<(TabId, Option<Arc<TabRuntime>>)> = {
            let mut tabs = self.tabs.write().await;
            tabs.iter_mut()
                .map(|(id, entry)| {
                    entry.status = TabStatus::Stopped { last_error: None };
                    (id.clone(), entry.runtime.take())
                })
                .collect()
        };
        for (id, runtime) in generations {
            self.teardown(&id, runtime).await;
        }
        self.engine.locks().release_all();
        info!("Supervisor stopped");
    }

    async fn set_status(&self, id: &str, status: TabStatus) {
        if let Some(entry) = self.tabs.write().await.get_mut(id) {
            entry.status = status;
        }
    }

    // --- queries ---

    pub async fn tab_status(&self, id: &str) -> Option<TabStatus> {
        self.tabs.read().await.get(id).map(TabEntry::status)
    }

    /// All tabs, sorted by id
    pub async fn tabs(&self) -> Vec<TabInfo> {
        let tabs = self.tabs.read().await;
        let mut infos: Vec<TabInfo> = tabs
            .iter()
            .map(|(id, entry)| TabInfo {
                id: id.clone(),
                name: entry.name.clone(),
                status: entry.status(),
                generation: entry.runtime.as_ref().map(|r| r.generation().to_string()),
            })
            .collect();
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        infos
    }

    /// Tasks of the running generation of a tab
    pub async fn tasks(&self, id: &str) -> Vec<TaskInfo> {
        self.runtime(id)
            .await
            .map(|runtime| runtime.tasks())
            .unwrap_or_default()
    }

    /// Running generation of a tab
    pub async fn runtime(&self, id: &str) -> Option<Arc<TabRuntime>> {
        self.tabs
            .read()
            .await
            .get(id)
            .and_then(|entry| entry.runtime.clone())
    }

    async fn running(&self, tab: &str, block: &str) -> SupervisorResult<BlockContext> {
        let tabs = self.tabs.read().await;
        let entry = tabs
            .get(tab)
            .ok_or_else(|| SupervisorError::TabNotFound(tab.to_string()))?;
        let runtime = entry
            .runtime
            .as_ref()
            .ok_or_else(|| SupervisorError::NotRunning(tab.to_string()))?;
        Ok(runtime.block(block)?)
    }

    // --- entry points ---

    /// Handle a block of a running tab as a statement
    pub async fn handle(&self, tab: &str, block: &str) -> SupervisorResult<ControlSignal> {
        let ctx = self.running(tab, block).await?;
        Ok(ctx.handle().await?)
    }

    /// Evaluate a block of a running tab as an expression
    pub async fn evaluate(&self, tab: &str, block: &str) -> SupervisorResult<Value> {
        let ctx = self.running(tab, block).await?;
        Ok(ctx.evaluate().await?)
    }
}

/// Start the tracked task of a top-level tree
fn spawn_root(runtime: &Arc<TabRuntime>, ctx: BlockContext, done: Option<oneshot::Sender<()>>) {
    let description = ctx.description();
    let context = ctx.context().clone();
    runtime.spawn(description, context, async move {
        let result = ctx.handle_or_evaluate().await;
        if let Some(done) = done {
            // Nobody listening once the start window has passed
            let _ = done.send(());
        }
        result
    });
}

/// Thread-safe wrapper for Supervisor
pub type SharedSupervisor = Arc<Supervisor>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_empty() {
        assert!(Supervisor::is_empty("").unwrap());
        assert!(Supervisor::is_empty(r#"{"target": {"blocks": {}, "variables": {}}}"#).unwrap());
        assert!(!Supervisor::is_empty(
            r#"{"target": {"blocks": {}, "variables": {"v": ["n", 1]}}}"#
        )
        .unwrap());
        assert!(Supervisor::is_empty("{broken").is_err());
    }

    #[test]
    fn test_entry_status_without_runtime() {
        let mut entry = TabEntry::new("Main", "");
        assert_eq!(entry.status(), TabStatus::Unloaded);

        // Running without a generation falls back to the stored state
        entry.status = TabStatus::Running { tasks: 3 };
        assert_eq!(entry.status(), TabStatus::Running { tasks: 3 });
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_value(TabStatus::Running { tasks: 2 }).unwrap();
        assert_eq!(json, serde_json::json!({"state": "running", "tasks": 2}));

        let json = serde_json::to_value(TabStatus::Stopped { last_error: None }).unwrap();
        assert_eq!(json["state"], "stopped");
    }
}
