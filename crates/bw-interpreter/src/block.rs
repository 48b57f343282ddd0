//! Block execution
//!
//! A [`BlockContext`] is the handle a block handler receives: the block being
//! run, its tab runtime and its position in the evaluation stack. `handle`
//! runs a block as a statement and follows its `next` chain; `evaluate` runs
//! it as an expression.

use crate::engine::SharedEngine;
use crate::runtime::TabRuntime;
use bw_core::{BlockId, Context, EngineError, EngineResult, OpcodeId, Value, VALUE_KEY};
use bw_graph::Block;
use bw_registry::{BlockFuture, BlockKind, BlockSpec, ControlSignal, Handler};
use std::collections::HashSet;
use std::future::Future;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Execution handle of one block
#[derive(Clone)]
pub struct BlockContext {
    runtime: Arc<TabRuntime>,
    block: Arc<Block>,
    depth: usize,
    context: Context,
}

impl std::fmt::Debug for BlockContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockContext")
            .field("tab", &self.runtime.tab_id())
            .field("block", &self.block.id)
            .field("opcode", &self.block.opcode.to_string())
            .field("depth", &self.depth)
            .finish()
    }
}

impl BlockContext {
    pub(crate) fn root(
        runtime: Arc<TabRuntime>,
        block_id: &str,
        context: Context,
    ) -> EngineResult<Self> {
        let block = runtime.graph().get_shared(block_id).ok_or_else(|| {
            EngineError::MalformedGraph(format!("block '{}' not found", block_id))
        })?;
        Ok(Self {
            runtime,
            block,
            depth: 0,
            context,
        })
    }

    fn at(&self, block_id: &str, depth: usize) -> EngineResult<Self> {
        if depth > self.runtime.engine().settings().max_depth {
            return Err(EngineError::MalformedGraph(format!(
                "evaluation deeper than {} blocks at '{}'",
                self.runtime.engine().settings().max_depth,
                block_id
            )));
        }
        let block = self.runtime.graph().get_shared(block_id).ok_or_else(|| {
            EngineError::MalformedGraph(format!("block '{}' not found", block_id))
        })?;
        Ok(Self {
            runtime: self.runtime.clone(),
            block,
            depth,
            context: self.context.clone(),
        })
    }

    /// Context of a block nested inside this one (an input or a substack)
    pub fn child(&self, block_id: &str) -> EngineResult<Self> {
        self.at(block_id, self.depth + 1)
    }

    /// The same block under a new execution context
    pub fn with_context(&self, context: Context) -> Self {
        Self {
            context,
            ..self.clone()
        }
    }

    // --- accessors ---

    pub fn block(&self) -> &Block {
        &self.block
    }

    pub fn id(&self) -> &str {
        &self.block.id
    }

    pub fn opcode(&self) -> &OpcodeId {
        &self.block.opcode
    }

    pub fn runtime(&self) -> &Arc<TabRuntime> {
        &self.runtime
    }

    pub fn engine(&self) -> &SharedEngine {
        self.runtime.engine()
    }

    pub fn tab_id(&self) -> &str {
        self.runtime.tab_id()
    }

    pub fn tab_name(&self) -> &str {
        self.runtime.tab_name()
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// `"<tab name>: <ext> -> <opcode>"`
    pub fn description(&self) -> String {
        format!("{}: {}", self.tab_name(), self.block.opcode.describe())
    }

    /// Field display value, empty when missing
    pub fn field(&self, name: &str) -> String {
        self.block.field_value(name).unwrap_or_default()
    }

    /// Field reference id, falling back to the display value
    pub fn field_id(&self, name: &str) -> String {
        self.block
            .field_id(name)
            .map(str::to_string)
            .unwrap_or_else(|| self.field(name))
    }

    /// The block linked after this one, at the same depth
    pub fn next(&self) -> Option<Self> {
        let next = self.block.next.as_deref()?;
        match self.at(next, self.depth) {
            Ok(ctx) => Some(ctx),
            Err(err) => {
                warn!(block_id = %self.id(), error = %err, "Unresolvable next block");
                None
            }
        }
    }

    pub fn parent(&self) -> Option<Self> {
        let parent = self.block.parent.as_deref()?;
        self.at(parent, self.depth.saturating_sub(1)).ok()
    }

    // --- named values ---

    pub fn set_value(&self, key: &str, value: Value) {
        self.runtime.set_value(self.id(), key, value);
    }

    /// Named value of this block or of the closest ancestor holding it
    pub fn get_value(&self, key: &str) -> Option<Value> {
        self.runtime.get_value(self.id(), key)
    }

    /// Register cleanup to run when the tab releases its blocks
    pub fn on_release(&self, listener: impl FnOnce() + Send + 'static) {
        self.runtime.on_release(self.id(), listener);
    }

    // --- execution ---

    fn lookup(&self) -> EngineResult<BlockSpec<BlockContext>> {
        self.engine()
            .registry()
            .lookup(&self.block.opcode)
            .map_err(|err| {
                warn!(
                    tab = %self.tab_id(),
                    block_id = %self.id(),
                    opcode = %self.block.opcode,
                    "No handler for block"
                );
                self.annotate(err)
            })
    }

    fn annotate(&self, err: EngineError) -> EngineError {
        err.at_block(
            self.tab_id(),
            self.id(),
            self.block.opcode.extension_id(),
            self.block.opcode.opcode(),
        )
    }

    /// Run the block as a statement, then the rest of its chain
    ///
    /// The chain ends after a hat, on `Stop`, or on a block already run in
    /// this chain.
    pub fn handle(&self) -> BlockFuture<ControlSignal> {
        let start = self.clone();
        Box::pin(async move {
            let mut visited: HashSet<BlockId> = HashSet::new();
            let mut current = Some(start);

            while let Some(ctx) = current.take() {
                if !visited.insert(ctx.id().to_string()) {
                    warn!(block_id = %ctx.id(), "Cycle in block chain");
                    break;
                }
                let spec = ctx.lookup()?;
                trace!(block_id = %ctx.id(), opcode = %ctx.block.opcode, "Handling block");

                match spec.handler() {
                    Handler::Command(handler) => {
                        let signal = handler(ctx.clone())
                            .await
                            .map_err(|err| ctx.annotate(err))?;
                        if signal == ControlSignal::Stop {
                            debug!(block_id = %ctx.id(), "Chain stopped");
                            return Ok(ControlSignal::Stop);
                        }
                        if spec.kind() != BlockKind::Hat {
                            current = ctx.next();
                        }
                    }
                    Handler::Reporter(handler) => {
                        let value = handler(ctx.clone())
                            .await
                            .map_err(|err| ctx.annotate(err))?;
                        ctx.set_value(VALUE_KEY, value);
                    }
                }
            }
            Ok(ControlSignal::Continue)
        })
    }

    /// Run the block as an expression and remember the result
    pub fn evaluate(&self) -> BlockFuture<Value> {
        let ctx = self.clone();
        Box::pin(async move {
            let spec = ctx.lookup()?;
            let value = match spec.handler() {
                Handler::Reporter(handler) => handler(ctx.clone()).await,
                Handler::Command(handler) => handler(ctx.clone()).await.map(|_| Value::Null),
            }
            .map_err(|err| ctx.annotate(err))?;

            ctx.set_value(VALUE_KEY, value.clone());
            Ok(value)
        })
    }

    /// Evaluate blocks registered as reporters, handle everything else
    pub async fn handle_or_evaluate(&self) -> EngineResult<ControlSignal> {
        let kind = self
            .engine()
            .registry()
            .block_kind(self.block.opcode.extension_id(), self.block.opcode.opcode());
        if kind == Some(BlockKind::Reporter) {
            self.evaluate().await?;
            Ok(ControlSignal::Continue)
        } else {
            self.handle().await
        }
    }

    /// Handle the chain plugged into a statement input (e.g. `SUBSTACK`)
    ///
    /// An empty input is a no-op.
    pub async fn handle_input(&self, key: &str) -> EngineResult<ControlSignal> {
        match self.input_block(key)? {
            Some(body) => body.handle().await,
            None => Ok(ControlSignal::Continue),
        }
    }

    /// Start a tracked background task running `future` on this tab
    pub fn spawn<F>(&self, future: F) -> Option<String>
    where
        F: Future<Output = EngineResult<ControlSignal>> + Send + 'static,
    {
        self.runtime
            .spawn(self.description(), self.context.child(), future)
    }

    /// Start a tracked task handling `chain` under a child context
    ///
    /// The task and the chain share that context, so the task can be
    /// cancelled from inside the chain.
    pub fn spawn_chain(&self, chain: &BlockContext) -> Option<String> {
        let chain = chain.with_context(self.context.child());
        self.runtime
            .spawn(self.description(), chain.context.clone(), async move {
                chain.handle().await
            })
    }

    /// Start a tracked task handling the chain after this block
    ///
    /// Used by hats on every accepted signal.
    pub fn spawn_next(&self) -> Option<String> {
        self.spawn_next_if(async { Ok(true) })
    }

    /// Like [`spawn_next`](Self::spawn_next), handling the chain only when
    /// `guard` resolves to true
    pub fn spawn_next_if<G>(&self, guard: G) -> Option<String>
    where
        G: Future<Output = EngineResult<bool>> + Send + 'static,
    {
        let next = self.next()?.with_context(self.context.child());
        self.runtime
            .spawn(self.description(), next.context.clone(), async move {
                if guard.await? {
                    next.handle().await
                } else {
                    Ok(ControlSignal::Continue)
                }
            })
    }

    /// Repeat `body` until it breaks, pausing between iterations
    ///
    /// The pause is never shorter than the configured loop interval. The
    /// iteration number, counted from 0, is exposed as the `INDEX` named
    /// value. The signal `body` breaks with is returned.
    pub async fn repeat_every<F, Fut>(
        &self,
        interval: Duration,
        mut body: F,
    ) -> EngineResult<ControlSignal>
    where
        F: FnMut(u64) -> Fut,
        Fut: Future<Output = EngineResult<ControlFlow<ControlSignal>>>,
    {
        let interval = interval.max(self.engine().settings().loop_interval);
        let mut index: u64 = 0;
        loop {
            self.set_value(bw_core::INDEX_KEY, Value::from(index));
            if let ControlFlow::Break(signal) = body(index).await? {
                trace!(block_id = %self.id(), iterations = index + 1, "Loop ended");
                return Ok(signal);
            }
            index += 1;
            tokio::time::sleep(interval).await;
        }
    }
}
