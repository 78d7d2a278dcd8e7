//! Pipeline: a connected graph of Nodes plus its state and lifecycle
//! controller. Owns the queues connecting Nodes and runs the
//! generic worker-thread scheduling loop over whatever concrete
//! `Node`/`NodeWorker` implementations the caller registered — this
//! orchestration logic is node-agnostic, so it lives here rather than in the
//! application layer that knows concrete node classes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::batch_collector::{BatchCollector, DefaultBatchCollector, StreamBatchCollector};
use crate::blob::BlobRef;
use crate::error::PipelineError;
use crate::node::{BatchingPolicy, Node, NodeEvent, NodeWorker, WorkerContext};
use crate::queue::Queue;
use crate::response::ResponseAccumulator;
use crate::state::PipelineState;
use crate::value_objects::NodeName;

/// A wire connecting an output port of one Node to an input port of
/// another.
#[derive(Debug, Clone)]
pub struct Link {
    pub src_node: NodeName,
    pub src_port: u32,
    pub dst_node: NodeName,
    pub dst_port: u32,
}

#[derive(Default, Clone, Copy)]
struct PerfStats {
    calls: u64,
    total: Duration,
}

/// Observes pipeline execution for metrics/telemetry, independent of any
/// concrete backend. A `Pipeline` holds one observer (default a no-op); the
/// application layer supplies a real implementation at build time.
pub trait PipelineObserver: Send + Sync {
    fn on_worker_duration(&self, node: &NodeName, elapsed: Duration) {
        let _ = (node, elapsed);
    }
    fn on_frame_error(&self, error: &PipelineError) {
        let _ = error;
    }
}

struct NoopObserver;
impl PipelineObserver for NoopObserver {}

struct WorkerContextImpl {
    node_name: NodeName,
    out_routes: Vec<Vec<Queue<BlobRef>>>,
    depleting_counter: Arc<AtomicI64>,
    event_sink: Arc<dyn Fn(&NodeName, NodeEvent) + Send + Sync>,
    pipeline: std::sync::Weak<Pipeline>,
}

impl WorkerContext for WorkerContextImpl {
    fn send_output(&self, blob: BlobRef, out_port_idx: u32, timeout: Duration) -> Result<(), PipelineError> {
        let destinations = self
            .out_routes
            .get(out_port_idx as usize)
            .ok_or_else(|| PipelineError::internal(format!("node {} has no route for output port {out_port_idx}", self.node_name)))?;
        for queue in destinations {
            queue.push(blob.clone(), timeout)?;
        }
        Ok(())
    }

    fn hold_depleting(&self) {
        self.depleting_counter.fetch_add(1, Ordering::SeqCst);
    }

    fn release_depleting(&self) {
        self.depleting_counter.fetch_sub(1, Ordering::SeqCst);
    }

    fn emit_event(&self, event: NodeEvent) {
        (self.event_sink)(&self.node_name, event);
    }

    fn performance_report(&self) -> String {
        self.pipeline.upgrade().map(|p| p.report_performance_data_to_string()).unwrap_or_default()
    }
}

struct NodeRuntime {
    node: Mutex<Box<dyn Node>>,
    input_port_count: u32,
}

/// Assembles a runnable `Pipeline` from Nodes and Links. `PipelineParser`
/// (application layer) is the usual caller; tests can use it directly.
pub struct PipelineBuilder {
    name: String,
    nodes: HashMap<NodeName, NodeRuntime>,
    links: Vec<Link>,
    queue_capacity: usize,
    event_sink: Arc<dyn Fn(&NodeName, NodeEvent) + Send + Sync>,
    observer: Arc<dyn PipelineObserver>,
}

impl PipelineBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: HashMap::new(),
            links: Vec::new(),
            queue_capacity: 64,
            event_sink: Arc::new(|_, _| {}),
            observer: Arc::new(NoopObserver),
        }
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn event_sink(mut self, sink: Arc<dyn Fn(&NodeName, NodeEvent) + Send + Sync>) -> Self {
        self.event_sink = sink;
        self
    }

    pub fn observer(mut self, observer: Arc<dyn PipelineObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn add_node(mut self, node: Box<dyn Node>, input_port_count: u32) -> Self {
        let name = node.name().clone();
        self.nodes.insert(
            name,
            NodeRuntime {
                node: Mutex::new(node),
                input_port_count,
            },
        );
        self
    }

    pub fn add_link(mut self, link: Link) -> Self {
        self.links.push(link);
        self
    }

    /// Parsing is atomic: any failure here leaves no partially built
    /// pipeline behind.
    pub fn build(self) -> Result<Pipeline, PipelineError> {
        for link in &self.links {
            if !self.nodes.contains_key(&link.src_node) {
                return Err(PipelineError::build_failure(format!("unknown source node {}", link.src_node)));
            }
            if !self.nodes.contains_key(&link.dst_node) {
                return Err(PipelineError::build_failure(format!(
                    "unknown destination node {}",
                    link.dst_node
                )));
            }
        }

        let mut input_queues: HashMap<(NodeName, u32), Queue<BlobRef>> = HashMap::new();
        for (name, runtime) in &self.nodes {
            for port in 0..runtime.input_port_count {
                input_queues.insert((name.clone(), port), Queue::new(self.queue_capacity));
            }
        }

        let mut routes: HashMap<(NodeName, u32), Vec<Queue<BlobRef>>> = HashMap::new();
        for link in &self.links {
            let queue = input_queues
                .get(&(link.dst_node.clone(), link.dst_port))
                .cloned()
                .ok_or_else(|| PipelineError::build_failure(format!("no input port {} on {}", link.dst_port, link.dst_node)))?;
            routes.entry((link.src_node.clone(), link.src_port)).or_default().push(queue);
        }

        Ok(Pipeline {
            name: self.name,
            state: Mutex::new(PipelineState::Idle),
            nodes: self.nodes,
            input_queues,
            routes,
            links: self.links,
            depleting_counter: Arc::new(AtomicI64::new(0)),
            event_sink: self.event_sink,
            response_accumulators: Mutex::new(HashMap::new()),
            worker_handles: Mutex::new(Vec::new()),
            shutdown: Arc::new(AtomicBool::new(false)),
            performance: Mutex::new(HashMap::new()),
            observer: self.observer,
        })
    }
}

pub struct Pipeline {
    name: String,
    state: Mutex<PipelineState>,
    nodes: HashMap<NodeName, NodeRuntime>,
    input_queues: HashMap<(NodeName, u32), Queue<BlobRef>>,
    routes: HashMap<(NodeName, u32), Vec<Queue<BlobRef>>>,
    links: Vec<Link>,
    depleting_counter: Arc<AtomicI64>,
    event_sink: Arc<dyn Fn(&NodeName, NodeEvent) + Send + Sync>,
    response_accumulators: Mutex<HashMap<NodeName, Arc<ResponseAccumulator>>>,
    worker_handles: Mutex<Vec<JoinHandle<()>>>,
    shutdown: Arc<AtomicBool>,
    performance: Mutex<HashMap<String, PerfStats>>,
    observer: Arc<dyn PipelineObserver>,
}

impl Pipeline {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    pub fn node_names(&self) -> impl Iterator<Item = &NodeName> {
        self.nodes.keys()
    }

    /// Names of every node flagged `Is Source Node`, the ports
    /// a PipelineManager feeds with Run-time media segments.
    pub fn source_node_names(&self) -> Vec<NodeName> {
        self.nodes
            .iter()
            .filter(|(_, runtime)| runtime.node.lock().unwrap().is_source())
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Every source node's name alongside the sensor slot it was configured
    /// to read, for a `PipelineManager` to demultiplex a combined run's
    /// `mediaUris` across sources that share one capture feed.
    pub fn source_nodes_with_sensor_index(&self) -> Vec<(NodeName, Option<u32>)> {
        self.nodes
            .iter()
            .filter_map(|(name, runtime)| {
                let node = runtime.node.lock().unwrap();
                node.is_source().then(|| (name.clone(), node.sensor_index()))
            })
            .collect()
    }

    pub fn get_state(&self) -> PipelineState {
        *self.state.lock().unwrap()
    }

    pub fn register_response_accumulator(&self, node: NodeName, accumulator: Arc<ResponseAccumulator>) {
        self.response_accumulators.lock().unwrap().insert(node, accumulator);
    }

    pub fn response_accumulator(&self, node: &NodeName) -> Option<Arc<ResponseAccumulator>> {
        self.response_accumulators.lock().unwrap().get(node).cloned()
    }

    /// Entry point used by the PipelineManager to inject work.
    pub fn send_to_port(&self, blob: BlobRef, node_name: &NodeName, port_idx: u32, timeout: Duration) -> Result<(), PipelineError> {
        let state = self.get_state();
        if state == PipelineState::Depleting || state == PipelineState::Stop {
            return Err(PipelineError::bad_request("pipeline is depleting or stopped"));
        }
        let queue = self
            .input_queues
            .get(&(node_name.clone(), port_idx))
            .ok_or_else(|| PipelineError::bad_request(format!("no such input port {port_idx} on {node_name}")))?;
        queue.push(blob, timeout)
    }

    pub fn holds_outstanding_work(&self) -> bool {
        self.depleting_counter.load(Ordering::SeqCst) > 0
    }

    fn all_queues_empty(&self) -> bool {
        self.input_queues.values().all(|q| q.is_empty())
    }

    /// `configureByString` has already run on every node by this point
    /// (idle -> configured is the caller's responsibility); this
    /// drives `configured -> prepared` by calling `prepare()` on every node.
    pub fn prepare(&self) -> Result<(), PipelineError> {
        let mut state = self.state.lock().unwrap();
        *state = state.transit_to(PipelineState::Prepared)?;
        for (name, runtime) in &self.nodes {
            let mut node = runtime.node.lock().unwrap();
            node.prepare()?;
            let accumulator = node.response_accumulator();
            drop(node);
            if let Some(accumulator) = accumulator {
                self.response_accumulators.lock().unwrap().insert(name.clone(), accumulator);
            }
        }
        Ok(())
    }

    /// `prepared -> running`: spawns `totalThreadNum` worker threads per
    /// Node.
    pub fn start(self: &Arc<Self>) -> Result<(), PipelineError> {
        {
            let mut state = self.state.lock().unwrap();
            *state = state.transit_to(PipelineState::Running)?;
        }

        let mut handles = self.worker_handles.lock().unwrap();
        for (name, runtime) in &self.nodes {
            let node = runtime.node.lock().unwrap();
            let total_threads = node.total_thread_num();
            let batching = *node.batching();
            let input_ports: Vec<u32> = (0..runtime.input_port_count).collect();
            let input_queues: Vec<Queue<BlobRef>> = input_ports
                .iter()
                .map(|p| self.input_queues[&(name.clone(), *p)].clone())
                .collect();
            let out_routes = self.build_out_routes(name);

            for worker_idx in 0..total_threads {
                let worker = node.create_node_worker();
                let collector: Box<dyn BatchCollector> = match batching.policy {
                    BatchingPolicy::Default => Box::new(DefaultBatchCollector),
                    BatchingPolicy::BatchingWithStream => Box::new(StreamBatchCollector::new(worker_idx, batching.stream_num.max(1))),
                };
                let ctx = Arc::new(WorkerContextImpl {
                    node_name: name.clone(),
                    out_routes: out_routes.clone(),
                    depleting_counter: self.depleting_counter.clone(),
                    event_sink: self.event_sink.clone(),
                    pipeline: Arc::downgrade(self),
                });
                let node_name = name.clone();
                let pipeline = self.clone();
                let shutdown = self.shutdown.clone();
                let queues = input_queues.clone();
                let ports = input_ports.clone();

                let handle = std::thread::Builder::new()
                    .name(format!("{node_name}-{worker_idx}"))
                    .spawn(move || run_worker(node_name, worker_idx, worker, collector, ports, queues, ctx, shutdown, pipeline))
                    .expect("failed to spawn node worker thread");
                handles.push(handle);
            }
        }
        Ok(())
    }

    fn build_out_routes(&self, node_name: &NodeName) -> Vec<Vec<Queue<BlobRef>>> {
        let max_port = self
            .links
            .iter()
            .filter(|l| &l.src_node == node_name)
            .map(|l| l.src_port)
            .max()
            .map(|m| m + 1)
            .unwrap_or(0);
        (0..max_port)
            .map(|port| self.routes.get(&(node_name.clone(), port)).cloned().unwrap_or_default())
            .collect()
    }

    fn record_perf(&self, node: &NodeName, elapsed: Duration) {
        {
            let mut perf = self.performance.lock().unwrap();
            let stats = perf.entry(node.0.clone()).or_default();
            stats.calls += 1;
            stats.total += elapsed;
        }
        self.observer.on_worker_duration(node, elapsed);
    }

    /// A node worker's `process()` returned an error for the current frame;
    /// the frame is dropped but the pipeline keeps running (see `run_worker`).
    fn record_frame_error(&self, error: &PipelineError) {
        self.observer.on_frame_error(error);
    }

    /// Aggregated per-node timing emitted on finish.
    pub fn report_performance_data_to_string(&self) -> String {
        let perf = self.performance.lock().unwrap();
        let mut lines: Vec<String> = perf
            .iter()
            .map(|(node, stats)| {
                let avg = if stats.calls > 0 {
                    stats.total / stats.calls as u32
                } else {
                    Duration::ZERO
                };
                format!("{node}: calls={} total={:?} avg={:?}", stats.calls, stats.total, avg)
            })
            .collect();
        lines.sort();
        lines.join("\n")
    }

    /// `running -> depleting`: new inputs are refused, in-flight blobs are
    /// drained.
    pub fn begin_depleting(&self) -> Result<(), PipelineError> {
        let mut state = self.state.lock().unwrap();
        if *state == PipelineState::Running {
            *state = state.transit_to(PipelineState::Depleting)?;
        }
        Ok(())
    }

    /// `stop()` is idempotent from any state. From `running`
    /// it first depletes; any other state is forced directly to `stop`.
    pub fn stop(&self) -> Result<(), PipelineError> {
        {
            let current = self.get_state();
            if current == PipelineState::Stop {
                return Ok(());
            }
            if current == PipelineState::Running {
                self.begin_depleting()?;
            }
        }

        let deadline = Instant::now() + Duration::from_secs(5);
        while (self.holds_outstanding_work() || !self.all_queues_empty()) && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }

        self.shutdown.store(true, Ordering::SeqCst);
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.worker_handles.lock().unwrap());
        for handle in handles {
            let _ = handle.join();
        }

        let mut state = self.state.lock().unwrap();
        *state = state.transit_to_forced(PipelineState::Stop);
        Ok(())
    }
}

#[allow(clippy::too_many_arguments)]
fn run_worker(
    node_name: NodeName,
    worker_idx: u32,
    mut worker: Box<dyn NodeWorker>,
    mut collector: Box<dyn BatchCollector>,
    input_ports: Vec<u32>,
    input_queues: Vec<Queue<BlobRef>>,
    ctx: Arc<WorkerContextImpl>,
    shutdown: Arc<AtomicBool>,
    pipeline: Arc<Pipeline>,
) {
    let _ = worker.init();
    let _ = worker.process_by_first_run(worker_idx, ctx.as_ref());

    while !shutdown.load(Ordering::SeqCst) {
        match collector.get_batched_input(worker_idx, &input_ports, &input_queues, Duration::from_millis(100)) {
            Ok(batch) => {
                for violation in batch.violations {
                    ctx.emit_event(violation.as_event());
                    let _ = ctx.send_output(violation.blob, 0, Duration::from_millis(0));
                }
                if !batch.blobs.is_empty() {
                    let start = Instant::now();
                    // A worker error is isolated to the current frame; the
                    // pipeline itself keeps running.
                    let result = worker.process(worker_idx, batch.blobs, ctx.as_ref());
                    pipeline.record_perf(&node_name, start.elapsed());
                    if let Err(err) = result {
                        pipeline.record_frame_error(&err);
                    }
                }
            }
            Err(PipelineError::Timeout) => {
                if pipeline.get_state() == PipelineState::Depleting && !pipeline.holds_outstanding_work() {
                    break;
                }
            }
            Err(_) => {}
        }
    }

    let _ = worker.process_by_last_run(worker_idx, ctx.as_ref());
    let _ = worker.deinit();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::BatchingConfig;

    struct PassThroughWorker;
    impl NodeWorker for PassThroughWorker {
        fn process(&mut self, _batch_idx: u32, inputs: Vec<BlobRef>, ctx: &dyn WorkerContext) -> Result<(), PipelineError> {
            for blob in inputs {
                ctx.send_output(blob, 0, Duration::from_millis(50))?;
            }
            Ok(())
        }
    }

    struct PassThroughNode {
        name: NodeName,
        batching: BatchingConfig,
    }
    impl Node for PassThroughNode {
        fn name(&self) -> &NodeName {
            &self.name
        }
        fn class_name(&self) -> &'static str {
            "PassThrough"
        }
        fn total_thread_num(&self) -> u32 {
            1
        }
        fn batching(&self) -> &BatchingConfig {
            &self.batching
        }
        fn batching_mut(&mut self) -> &mut BatchingConfig {
            &mut self.batching
        }
        fn configure_by_string(&mut self, _config: &str) -> Result<(), PipelineError> {
            Ok(())
        }
        fn create_node_worker(&self) -> Box<dyn NodeWorker> {
            Box::new(PassThroughWorker)
        }
    }

    #[test]
    fn build_fails_atomically_on_unknown_link_target() {
        let builder = PipelineBuilder::new("t").add_link(Link {
            src_node: NodeName("a".into()),
            src_port: 0,
            dst_node: NodeName("b".into()),
            dst_port: 0,
        });
        assert!(builder.build().is_err());
    }

    #[test]
    fn stop_is_idempotent_from_idle() {
        let pipeline = Arc::new(
            PipelineBuilder::new("t")
                .add_node(
                    Box::new(PassThroughNode {
                        name: NodeName("a".into()),
                        batching: BatchingConfig::default(),
                    }),
                    1,
                )
                .build()
                .unwrap(),
        );
        pipeline.stop().unwrap();
        pipeline.stop().unwrap();
        assert_eq!(pipeline.get_state(), PipelineState::Stop);
    }
}
