use crate::history::{HistoryRecorder, ProvenanceRecord};
use crate::interpolator::Interpolator;
use crate::registry::NodeRegistry;
use chrono::Utc;
use loomcore::{
    EngineError, EngineEvent, EventBus, ExecutionContext, FailureKind, GraphDefinition,
    NodeCategory, NodeError, NodeFailure, NodeStatus, ProcessorContext, RunId, RunStatus,
};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, watch, Mutex, RwLock};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Tuning knobs for one run.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Interval of the cooperative tick loop.
    pub tick_interval: Duration,
    /// Upper bound on node executions in flight at once.
    pub max_concurrent: usize,
    /// Total attempts a node gets before its failure is terminal.
    pub max_retries: u32,
    /// Capacity of the engine event channel.
    pub event_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(50),
            max_concurrent: 3,
            max_retries: 3,
            event_capacity: 256,
        }
    }
}

/// Outcome of one spawned node execution, reported back to the tick loop.
struct ExecOutcome {
    node_id: String,
    result: Result<Option<Value>, NodeError>,
    duration_ms: u64,
}

/// Tick-based execution engine for one run.
///
/// Each tick the scheduler applies finished executions, discovers ready
/// nodes (all incoming edges holding signals, or none declared), dispatches
/// up to the concurrency cap, and checks for settlement. Node processors run
/// as independent spawned tasks; the tick loop itself never blocks on them,
/// and an explicit re-entrancy guard keeps ticks from overlapping. Per-node
/// failures stay contained to their node: the run settles `Completed` with a
/// mix of successful and failed branches rather than aborting siblings.
pub struct Scheduler {
    shared: Arc<Shared>,
    control: StdMutex<Control>,
    status_rx: watch::Receiver<RunStatus>,
}

struct Control {
    tick_cancel: Option<CancellationToken>,
}

struct Shared {
    run_id: RunId,
    graph: GraphDefinition,
    registry: Arc<NodeRegistry>,
    config: SchedulerConfig,
    context: RwLock<ExecutionContext>,
    events: EventBus,
    interpolator: Interpolator,
    recorder: StdMutex<HistoryRecorder>,
    in_flight: StdMutex<HashSet<String>>,
    tick_guard: AtomicBool,
    results_tx: mpsc::UnboundedSender<ExecOutcome>,
    results_rx: Mutex<mpsc::UnboundedReceiver<ExecOutcome>>,
    /// Cancelled on stop; handed to processors as their child token.
    run_cancel: CancellationToken,
    status_tx: watch::Sender<RunStatus>,
}

impl Scheduler {
    pub fn new(graph: GraphDefinition, registry: Arc<NodeRegistry>) -> Result<Self, EngineError> {
        Self::with_config(graph, registry, SchedulerConfig::default())
    }

    pub fn with_config(
        graph: GraphDefinition,
        registry: Arc<NodeRegistry>,
        config: SchedulerConfig,
    ) -> Result<Self, EngineError> {
        graph.validate()?;
        let context = ExecutionContext::new(&graph);
        let run_id = context.run_id;
        let (results_tx, results_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(RunStatus::Idle);

        let shared = Arc::new(Shared {
            run_id,
            graph,
            registry,
            events: EventBus::new(config.event_capacity),
            config,
            context: RwLock::new(context),
            interpolator: Interpolator::new(),
            recorder: StdMutex::new(HistoryRecorder::new()),
            in_flight: StdMutex::new(HashSet::new()),
            tick_guard: AtomicBool::new(false),
            results_tx,
            results_rx: Mutex::new(results_rx),
            run_cancel: CancellationToken::new(),
            status_tx,
        });

        Ok(Self {
            shared,
            control: StdMutex::new(Control { tick_cancel: None }),
            status_rx,
        })
    }

    pub fn run_id(&self) -> RunId {
        self.shared.run_id
    }

    /// Begin ticking. Idempotent while running; a settled run stays settled.
    pub async fn start(&self) {
        {
            let mut ctx = self.shared.context.write().await;
            match ctx.status {
                RunStatus::Idle | RunStatus::Paused => ctx.status = RunStatus::Running,
                _ => return,
            }
        }
        self.shared.set_status(RunStatus::Running);
        self.shared.events.emit(EngineEvent::RunStarted {
            run_id: self.shared.run_id,
            timestamp: Utc::now(),
        });
        tracing::info!(run = %self.shared.run_id, "run started");
        self.spawn_tick_loop();
    }

    /// Cancel the next tick without discarding state. In-flight node
    /// executions keep running; their results are applied after resume.
    pub async fn pause(&self) {
        {
            let mut ctx = self.shared.context.write().await;
            if ctx.status != RunStatus::Running {
                return;
            }
            ctx.status = RunStatus::Paused;
        }
        self.cancel_tick_loop();
        self.shared.set_status(RunStatus::Paused);
        self.shared.events.emit(EngineEvent::RunPaused {
            run_id: self.shared.run_id,
            timestamp: Utc::now(),
        });
        tracing::info!(run = %self.shared.run_id, "run paused");
    }

    pub async fn resume(&self) {
        {
            let mut ctx = self.shared.context.write().await;
            if ctx.status != RunStatus::Paused {
                return;
            }
            ctx.status = RunStatus::Running;
        }
        self.shared.set_status(RunStatus::Running);
        self.shared.events.emit(EngineEvent::RunResumed {
            run_id: self.shared.run_id,
            timestamp: Utc::now(),
        });
        self.spawn_tick_loop();
    }

    /// Cancel the tick loop and force a terminal status. In-flight
    /// executions are not awaited; whatever they produce is discarded
    /// because the context stops ticking.
    pub async fn stop(&self) {
        self.cancel_tick_loop();
        self.shared.run_cancel.cancel();

        let status = {
            let mut ctx = self.shared.context.write().await;
            if !ctx.status.is_terminal() {
                ctx.status = if ctx.all_nodes_settled() {
                    RunStatus::Completed
                } else {
                    RunStatus::Failed
                };
            }
            ctx.status
        };
        self.shared.set_status(status);
        self.shared.events.emit(EngineEvent::RunStopped {
            run_id: self.shared.run_id,
            status,
            timestamp: Utc::now(),
        });
        tracing::info!(run = %self.shared.run_id, ?status, "run stopped");
    }

    /// Write a value onto the run's global blackboard.
    pub async fn set_global(&self, key: impl Into<String>, value: Value) {
        let mut ctx = self.shared.context.write().await;
        ctx.memory.insert(key.into(), value);
    }

    /// Set a read-only environment value (secrets, feature flags).
    pub async fn set_env(&self, key: impl Into<String>, value: Value) {
        let mut ctx = self.shared.context.write().await;
        ctx.environment.insert(key.into(), value);
    }

    /// Cloned view of the current run state.
    pub async fn snapshot(&self) -> ExecutionContext {
        self.shared.context.read().await.clone()
    }

    /// Engine events, including a full context snapshot after every tick.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.shared.events.subscribe()
    }

    pub fn provenance(&self, node_id: &str) -> Option<ProvenanceRecord> {
        self.shared
            .recorder
            .lock()
            .expect("recorder lock poisoned")
            .provenance(node_id)
            .cloned()
    }

    /// Wait until the run reaches a terminal status.
    pub async fn wait_settled(&self) -> RunStatus {
        let mut rx = self.status_rx.clone();
        loop {
            let status = *rx.borrow_and_update();
            if status.is_terminal() {
                return status;
            }
            if rx.changed().await.is_err() {
                return *rx.borrow();
            }
        }
    }

    fn spawn_tick_loop(&self) {
        let cancel = CancellationToken::new();
        {
            let mut control = self.control.lock().expect("control lock poisoned");
            if let Some(previous) = control.tick_cancel.take() {
                previous.cancel();
            }
            control.tick_cancel = Some(cancel.clone());
        }

        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(shared.config.tick_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        // Re-entrancy guard: a tick whose work outlives the
                        // interval is never overlapped, the slot is skipped.
                        if shared.tick_guard.swap(true, Ordering::Acquire) {
                            continue;
                        }
                        let settled = shared.run_tick().await;
                        shared.tick_guard.store(false, Ordering::Release);
                        if settled {
                            break;
                        }
                    }
                }
            }
        });
    }

    fn cancel_tick_loop(&self) {
        let mut control = self.control.lock().expect("control lock poisoned");
        if let Some(cancel) = control.tick_cancel.take() {
            cancel.cancel();
        }
    }
}

impl Shared {
    fn set_status(&self, status: RunStatus) {
        let _ = self.status_tx.send(status);
    }

    /// One tick: apply finished executions, dispatch ready nodes, check for
    /// settlement, publish a snapshot. Returns true once the run settles.
    async fn run_tick(&self) -> bool {
        let mut ctx = self.context.write().await;
        if ctx.status != RunStatus::Running {
            return ctx.status.is_terminal();
        }

        {
            let mut rx = self.results_rx.lock().await;
            while let Ok(outcome) = rx.try_recv() {
                self.apply_outcome(&mut ctx, outcome);
            }
        }

        let ready = self.ready_nodes(&ctx);
        for node_id in &ready {
            if let Some(state) = ctx.node_mut(node_id) {
                state.status = NodeStatus::Ready;
            }
        }
        let capacity = {
            let in_flight = self.in_flight.lock().expect("in_flight lock poisoned");
            self.config.max_concurrent.saturating_sub(in_flight.len())
        };
        for node_id in ready.iter().take(capacity) {
            self.dispatch_node(&mut ctx, node_id);
        }

        let settled = self.check_settlement(&mut ctx);

        let snapshot = Arc::new(ctx.clone());
        drop(ctx);
        self.events.emit(EngineEvent::TickCompleted {
            run_id: self.run_id,
            context: snapshot,
            timestamp: Utc::now(),
        });
        settled
    }

    /// A node is ready when it is pending, not in flight, and either has no
    /// incoming edges, carries a cached input buffer from a failed attempt,
    /// or every incoming edge holds an undelivered signal (barrier joins).
    fn ready_nodes(&self, ctx: &ExecutionContext) -> Vec<String> {
        let in_flight = self.in_flight.lock().expect("in_flight lock poisoned");
        let mut ready: Vec<String> = ctx
            .node_states
            .values()
            .filter(|s| matches!(s.status, NodeStatus::Pending | NodeStatus::Ready))
            .filter(|s| !in_flight.contains(&s.id))
            .filter(|s| {
                if s.retry_count > 0 && !s.input_buffer.is_empty() {
                    return true;
                }
                let mut incoming = self.graph.incoming_edges(&s.id).peekable();
                if incoming.peek().is_none() {
                    return true;
                }
                incoming.all(|edge| ctx.edge_signals.contains_key(&edge.id))
            })
            .map(|s| s.id.clone())
            .collect();
        // Stable order keeps ticks deterministic; ordering beyond the
        // concurrency cap is still unspecified to callers.
        ready.sort();
        ready
    }

    fn dispatch_node(&self, ctx: &mut ExecutionContext, node_id: &str) {
        let Some(instance) = self.graph.find_node(node_id) else {
            return;
        };
        let Some(definition) = self.registry.get(&instance.node_type) else {
            // No registration means no useful retry: terminal immediately.
            self.fail_terminal(
                ctx,
                node_id,
                FailureKind::UnregisteredType,
                format!("node type '{}' is not registered", instance.node_type),
            );
            return;
        };

        // First attempt collects incoming signals; retries reuse the cached
        // buffer so upstream nodes are not re-triggered.
        let buffer = {
            let state = ctx.node(node_id).expect("state exists for graph node");
            if state.input_buffer.is_empty() {
                let mut buffer = HashMap::new();
                for edge in self.graph.incoming_edges(node_id) {
                    if let Some(signal) = ctx.edge_signals.get(&edge.id) {
                        let key = edge
                            .target_handle
                            .clone()
                            .unwrap_or_else(|| edge.source.clone());
                        buffer.insert(key, signal.clone());
                    }
                }
                buffer
            } else {
                state.input_buffer.clone()
            }
        };

        // Contract defaults, overridden by instance config, overridden by
        // edge-delivered inputs.
        let mut merged: HashMap<String, Value> = definition
            .contract
            .defaults
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for (key, value) in &instance.config {
            merged.insert(key.clone(), value.clone());
        }
        for (key, value) in &buffer {
            merged.insert(key.clone(), value.clone());
        }

        let prepared = self
            .interpolator
            .prepare_inputs(&merged, &definition.contract, ctx);

        let now = Utc::now();
        let attempt = {
            let state = ctx.node_mut(node_id).expect("state exists for graph node");
            state.input_buffer = buffer;
            state.status = NodeStatus::Working;
            state.started_at = Some(now);
            state.execution_version += 1;
            state.retry_count + 1
        };

        let inputs = match prepared {
            Ok((inputs, _dependencies)) => inputs,
            Err(err) => {
                // Input resolution failures follow the same retry policy as
                // execution failures, never a silent skip.
                self.fail_node(ctx, node_id, &NodeError::Interpolation(err));
                return;
            }
        };

        if definition.contract.category == NodeCategory::Human {
            self.events.emit(EngineEvent::ApprovalRequested {
                run_id: self.run_id,
                node_id: node_id.to_string(),
                timestamp: now,
            });
        }

        let processor = definition.instantiate();
        let exec_ctx = ProcessorContext {
            node_id: node_id.to_string(),
            inputs,
            config: instance.config.clone(),
            cancellation: self.run_cancel.child_token(),
        };

        self.in_flight
            .lock()
            .expect("in_flight lock poisoned")
            .insert(node_id.to_string());
        self.events.emit(EngineEvent::NodeStarted {
            run_id: self.run_id,
            node_id: node_id.to_string(),
            attempt,
            timestamp: now,
        });
        tracing::debug!(node = node_id, attempt, "node dispatched");

        let tx = self.results_tx.clone();
        let id = node_id.to_string();
        tokio::spawn(async move {
            let started = Instant::now();
            let result = processor.execute(exec_ctx).await;
            let _ = tx.send(ExecOutcome {
                node_id: id,
                result,
                duration_ms: started.elapsed().as_millis() as u64,
            });
        });
    }

    fn apply_outcome(&self, ctx: &mut ExecutionContext, outcome: ExecOutcome) {
        self.in_flight
            .lock()
            .expect("in_flight lock poisoned")
            .remove(&outcome.node_id);
        match outcome.result {
            Ok(output) => {
                self.complete_node(ctx, &outcome.node_id, output, outcome.duration_ms)
            }
            Err(err) => self.fail_node(ctx, &outcome.node_id, &err),
        }
    }

    fn complete_node(
        &self,
        ctx: &mut ExecutionContext,
        node_id: &str,
        output: Option<Value>,
        duration_ms: u64,
    ) {
        // Null and None are the same: the node produced nothing.
        let output = output.filter(|v| !v.is_null());

        let inputs = {
            let Some(state) = ctx.node_mut(node_id) else {
                return;
            };
            state.status = NodeStatus::Completed;
            state.finished_at = Some(Utc::now());
            state.output = output.clone();
            state.error = None;
            std::mem::take(&mut state.input_buffer)
        };
        self.consume_incoming_signals(ctx, node_id);

        {
            let mut recorder = self.recorder.lock().expect("recorder lock poisoned");
            recorder.record_provenance(node_id, &inputs);
            recorder.record_delta(ctx);
        }

        self.events.emit(EngineEvent::NodeCompleted {
            run_id: self.run_id,
            node_id: node_id.to_string(),
            duration_ms,
            timestamp: Utc::now(),
        });
        tracing::info!(node = node_id, duration_ms, "node completed");

        if let Some(value) = output {
            self.propagate(ctx, node_id, value);
        }
    }

    /// Deposit the output as a token on each outgoing edge. An edge without
    /// a source handle carries the whole output. When the output carries a
    /// `route` tag, handled edges are pure branch selectors: only the edge
    /// whose handle equals the tag gets the whole output, every other
    /// handled edge gets nothing, even if an output field shares the
    /// handle's name. Without a tag, a handled edge carries the output
    /// field named like the handle, or nothing.
    fn propagate(&self, ctx: &mut ExecutionContext, node_id: &str, value: Value) {
        let mut token_base = value;
        if let Value::Object(ref mut map) = token_base {
            map.entry("generatedBy")
                .or_insert_with(|| Value::String(node_id.to_string()));
        }

        for edge in self.graph.outgoing_edges(node_id) {
            let token = match &edge.source_handle {
                None => Some(token_base.clone()),
                Some(handle) => match token_base.get("route").and_then(Value::as_str) {
                    Some(route) => (route == handle).then(|| token_base.clone()),
                    None => token_base.get(handle).cloned().filter(|v| !v.is_null()),
                },
            };
            if let Some(token) = token {
                // Single-slot mailbox: an unconsumed token is overwritten.
                ctx.edge_signals.insert(edge.id.clone(), token);
            }
        }
    }

    fn fail_node(&self, ctx: &mut ExecutionContext, node_id: &str, err: &NodeError) {
        let kind = FailureKind::from(err);
        let message = err.to_string();

        let (retry_count, terminal) = {
            let Some(state) = ctx.node_mut(node_id) else {
                return;
            };
            state.retry_count += 1;
            state.error = Some(NodeFailure::new(kind, &message));
            (state.retry_count, state.retry_count >= self.config.max_retries)
        };

        if terminal {
            self.fail_terminal(ctx, node_id, kind, message);
            return;
        }

        if let Some(state) = ctx.node_mut(node_id) {
            // Back to the ready pool with the cached input buffer intact.
            state.status = NodeStatus::Pending;
            state.finished_at = None;
        }
        self.events.emit(EngineEvent::NodeFailed {
            run_id: self.run_id,
            node_id: node_id.to_string(),
            kind,
            error: message.clone(),
            attempt: retry_count,
            terminal: false,
            timestamp: Utc::now(),
        });
        tracing::warn!(node = node_id, attempt = retry_count, error = %message, "node failed, will retry");
    }

    fn fail_terminal(
        &self,
        ctx: &mut ExecutionContext,
        node_id: &str,
        kind: FailureKind,
        message: String,
    ) {
        let attempt = {
            let Some(state) = ctx.node_mut(node_id) else {
                return;
            };
            state.status = NodeStatus::Error;
            state.finished_at = Some(Utc::now());
            state.error = Some(NodeFailure::new(kind, &message));
            state.input_buffer.clear();
            state.retry_count
        };
        self.consume_incoming_signals(ctx, node_id);
        self.recorder
            .lock()
            .expect("recorder lock poisoned")
            .record_delta(ctx);

        self.events.emit(EngineEvent::NodeFailed {
            run_id: self.run_id,
            node_id: node_id.to_string(),
            kind,
            error: message.clone(),
            attempt,
            terminal: true,
            timestamp: Utc::now(),
        });
        tracing::error!(node = node_id, attempt, error = %message, "node failed terminally");
    }

    /// Exactly-once consumption: delivered tokens disappear when the
    /// consumer completes or fails terminally.
    fn consume_incoming_signals(&self, ctx: &mut ExecutionContext, node_id: &str) {
        let edge_ids: Vec<String> = self
            .graph
            .incoming_edges(node_id)
            .map(|e| e.id.clone())
            .collect();
        for id in edge_ids {
            ctx.edge_signals.remove(&id);
        }
    }

    /// The run settles when every node is terminal, or when pending nodes
    /// remain but nothing is in flight and nothing can ever become ready (a
    /// structurally unsatisfiable graph, e.g. a join past a pruned branch).
    fn check_settlement(&self, ctx: &mut ExecutionContext) -> bool {
        {
            let in_flight = self.in_flight.lock().expect("in_flight lock poisoned");
            if !in_flight.is_empty() {
                return false;
            }
        }
        if ctx
            .node_states
            .values()
            .any(|s| s.status == NodeStatus::Working)
        {
            return false;
        }

        if ctx.all_nodes_settled() {
            self.settle(ctx);
            return true;
        }

        if self.ready_nodes(ctx).is_empty() {
            let stranded: Vec<String> = ctx
                .node_states
                .values()
                .filter(|s| !s.status.is_settled())
                .map(|s| s.id.clone())
                .collect();
            tracing::warn!(
                run = %self.run_id,
                pending = ?stranded,
                "deadlock: pending nodes remain but none can become ready"
            );
            self.events.emit(EngineEvent::DeadlockDetected {
                run_id: self.run_id,
                pending: stranded.clone(),
                timestamp: Utc::now(),
            });
            for node_id in &stranded {
                if let Some(state) = ctx.node_mut(node_id) {
                    state.status = NodeStatus::Skipped;
                }
            }
            self.settle(ctx);
            return true;
        }

        false
    }

    fn settle(&self, ctx: &mut ExecutionContext) {
        ctx.status = RunStatus::Completed;
        self.recorder
            .lock()
            .expect("recorder lock poisoned")
            .record_delta(ctx);
        self.set_status(RunStatus::Completed);
        self.events.emit(EngineEvent::RunSettled {
            run_id: self.run_id,
            status: RunStatus::Completed,
            timestamp: Utc::now(),
        });
        tracing::info!(run = %self.run_id, "run settled");
    }
}
