//! Pipeline builder for wiring stages together
//!
//! Stages are added by name; `connect` binds an output port of one stage to
//! an input port of another. An output may feed many inputs (fan-out); an
//! input accepts exactly one producer. Queues are created at `build()`, so
//! bindings never change once the stages are running.

use super::errors::{ConnectionError, PipelineError};
use super::external::{Feed, Tap};
use super::node::{InputPort, OutputPort, ProcessNode};
use super::ports::{PortDirection, PortSchema};
use super::scheduler::Scheduler;
use super::sender::{ChannelMessage, OverflowPolicy, QueueCapacity, Sender};
use super::type_registry::TYPE_REGISTRY;
use super::watchdog::Watchdog;
use crossbeam_channel::unbounded;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use tracing::{debug, error, info};

type PortKey = (usize, usize);

/// Pipeline builder that manages stages and connections
pub struct Pipeline {
    nodes: Vec<(usize, Box<dyn ProcessNode>)>,
    node_names: HashMap<String, usize>,
    node_schemas: HashMap<usize, (Vec<PortSchema>, Vec<PortSchema>)>,
    connections: Vec<PendingConnection>,
    taps: Vec<(PortKey, Box<dyn Any + Send>)>,
    feeds: Vec<(PortKey, Box<dyn Any + Send>)>,
    next_id: usize,
    default_capacity: QueueCapacity,
    watchdog: Watchdog,
}

pub(crate) struct PendingConnection {
    pub(crate) from_node: usize,
    pub(crate) from_port: usize,
    pub(crate) to_node: usize,
    pub(crate) to_port: usize,
    pub(crate) type_id: TypeId,
    pub(crate) capacity: QueueCapacity,
}

impl Pipeline {
    /// Create a new pipeline
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            node_names: HashMap::new(),
            node_schemas: HashMap::new(),
            connections: Vec::new(),
            taps: Vec::new(),
            feeds: Vec::new(),
            next_id: 0,
            default_capacity: QueueCapacity::Unbounded,
            watchdog: Watchdog::new(),
        }
    }

    /// Set the default capacity for connections (unbounded unless set)
    pub fn with_default_capacity(mut self, capacity: QueueCapacity) -> Self {
        self.default_capacity = capacity;
        self
    }

    /// Use a custom watchdog (e.g. another blocked-operation threshold)
    pub fn with_watchdog(mut self, watchdog: Watchdog) -> Self {
        self.watchdog = watchdog;
        self
    }

    /// Add a stage by name (inputs/outputs determined from the stage's schema)
    pub fn add_process<N: ProcessNode + 'static>(
        &mut self,
        name: impl Into<String>,
        node: N,
    ) -> Result<(), Box<ConnectionError>> {
        let name = name.into();

        if self.node_names.contains_key(&name) {
            return Err(Box::new(ConnectionError::DuplicateNode(name)));
        }

        let id = self.next_id;
        self.next_id += 1;

        self.node_schemas
            .insert(id, (node.input_schema(), node.output_schema()));
        self.node_names.insert(name, id);
        self.nodes.push((id, Box::new(node)));

        Ok(())
    }

    /// Connect two stages by name and port name using the default capacity
    pub fn connect(
        &mut self,
        from_node: &str,
        from_port: &str,
        to_node: &str,
        to_port: &str,
    ) -> Result<(), Box<ConnectionError>> {
        self.connect_with_capacity(from_node, from_port, to_node, to_port, self.default_capacity)
    }

    /// Connect with an explicit queue capacity and overflow policy
    pub fn connect_with_capacity(
        &mut self,
        from_node: &str,
        from_port: &str,
        to_node: &str,
        to_port: &str,
        capacity: QueueCapacity,
    ) -> Result<(), Box<ConnectionError>> {
        let (from_id, from_schema) = self.find_port(from_node, from_port, PortDirection::Output)?;
        let (to_id, to_schema) = self.find_port(to_node, to_port, PortDirection::Input)?;

        if from_schema.type_id != to_schema.type_id {
            return Err(Box::new(ConnectionError::TypeMismatch {
                from_node: from_node.to_string(),
                from_port: from_port.to_string(),
                from_type: from_schema.type_id,
                to_node: to_node.to_string(),
                to_port: to_port.to_string(),
                to_type: to_schema.type_id,
            }));
        }

        self.ensure_input_free(to_id, to_schema.index, to_node, to_port)?;

        self.connections.push(PendingConnection {
            from_node: from_id,
            from_port: from_schema.index,
            to_node: to_id,
            to_port: to_schema.index,
            type_id: from_schema.type_id,
            capacity,
        });

        Ok(())
    }

    /// Attach an external consumer to a stage output.
    ///
    /// The tap joins the output's fan-out like any other destination.
    pub fn tap<T: Send + Clone + 'static>(
        &mut self,
        node: &str,
        port: &str,
    ) -> Result<Tap<T>, Box<ConnectionError>> {
        let (id, schema) = self.find_port(node, port, PortDirection::Output)?;
        self.check_type::<T>(node, port, &schema)?;

        let (tx, rx) = unbounded::<ChannelMessage<T>>();
        self.taps.push(((id, schema.index), Box::new(tx)));
        Ok(Tap::new(rx))
    }

    /// Attach an external producer to a stage input
    pub fn feed<T: Send + Clone + 'static>(
        &mut self,
        node: &str,
        port: &str,
    ) -> Result<Feed<T>, Box<ConnectionError>> {
        let (id, schema) = self.find_port(node, port, PortDirection::Input)?;
        self.check_type::<T>(node, port, &schema)?;
        self.ensure_input_free(id, schema.index, node, port)?;

        let (tx, rx) = unbounded::<ChannelMessage<T>>();
        self.feeds.push(((id, schema.index), Box::new(rx)));
        Ok(Feed::new(Sender::new(vec![tx])))
    }

    /// List all input ports for a stage by name
    pub fn list_node_inputs(&self, name: &str) -> Result<&[PortSchema], Box<ConnectionError>> {
        let id = self.node_id(name)?;
        Ok(self.node_schemas.get(&id).map(|(i, _)| i.as_slice()).unwrap_or(&[]))
    }

    /// List all output ports for a stage by name
    pub fn list_node_outputs(&self, name: &str) -> Result<&[PortSchema], Box<ConnectionError>> {
        let id = self.node_id(name)?;
        Ok(self.node_schemas.get(&id).map(|(_, o)| o.as_slice()).unwrap_or(&[]))
    }

    /// List all stage names
    pub fn list_nodes(&self) -> Vec<&str> {
        self.node_names.keys().map(|s| s.as_str()).collect()
    }

    fn node_id(&self, name: &str) -> Result<usize, Box<ConnectionError>> {
        self.node_names
            .get(name)
            .copied()
            .ok_or_else(|| Box::new(ConnectionError::NodeNotFound(name.to_string())))
    }

    fn find_port(
        &self,
        node: &str,
        port: &str,
        direction: PortDirection,
    ) -> Result<(usize, PortSchema), Box<ConnectionError>> {
        let id = self.node_id(node)?;
        let (inputs, outputs) = self
            .node_schemas
            .get(&id)
            .ok_or_else(|| Box::new(ConnectionError::NodeNotFound(node.to_string())))?;
        let schemas = match direction {
            PortDirection::Input => inputs,
            PortDirection::Output => outputs,
        };
        schemas
            .iter()
            .find(|s| s.name == port)
            .map(|s| (id, s.clone()))
            .ok_or_else(|| {
                Box::new(ConnectionError::PortNotFound {
                    node: node.to_string(),
                    port: port.to_string(),
                })
            })
    }

    fn check_type<T: 'static>(
        &self,
        node: &str,
        port: &str,
        schema: &PortSchema,
    ) -> Result<(), Box<ConnectionError>> {
        if schema.type_id == TypeId::of::<T>() {
            return Ok(());
        }
        let external = "<external>".to_string();
        let (from_node, from_port, to_node, to_port, from_type, to_type) = match schema.direction {
            PortDirection::Output => (
                node.to_string(),
                port.to_string(),
                external.clone(),
                external,
                schema.type_id,
                TypeId::of::<T>(),
            ),
            PortDirection::Input => (
                external.clone(),
                external,
                node.to_string(),
                port.to_string(),
                TypeId::of::<T>(),
                schema.type_id,
            ),
        };
        Err(Box::new(ConnectionError::TypeMismatch {
            from_node,
            from_port,
            from_type,
            to_node,
            to_port,
            to_type,
        }))
    }

    fn ensure_input_free(
        &self,
        node_id: usize,
        port_index: usize,
        node: &str,
        port: &str,
    ) -> Result<(), Box<ConnectionError>> {
        let taken = self
            .connections
            .iter()
            .any(|c| c.to_node == node_id && c.to_port == port_index)
            || self.feeds.iter().any(|(key, _)| *key == (node_id, port_index));
        if taken {
            return Err(Box::new(ConnectionError::DuplicateConnection(format!(
                "Input port '{}' on stage '{}' is already connected",
                port, node
            ))));
        }
        Ok(())
    }

    /// Build the pipeline and return a running scheduler.
    ///
    /// Stages are started in the order they were added.
    pub fn build(mut self) -> Result<Scheduler, PipelineError> {
        info!(
            "Building pipeline with {} stages and {} connections",
            self.nodes.len(),
            self.connections.len()
        );

        // Phase 1: create all queues, accumulating receivers and senders
        let mut receivers: HashMap<PortKey, Box<dyn Any + Send>> = HashMap::new();
        let mut senders: HashMap<PortKey, Vec<(Box<dyn Any + Send>, OverflowPolicy)>> =
            HashMap::new();

        {
            let registry = TYPE_REGISTRY
                .lock()
                .map_err(|_| PipelineError::Runtime("type registry poisoned".to_string()))?;

            for conn in &self.connections {
                let (tx, rx) = registry
                    .create_channel(conn.type_id, conn.capacity)
                    .ok_or(PipelineError::UnregisteredType(conn.type_id))?;

                receivers.insert((conn.to_node, conn.to_port), rx);
                senders
                    .entry((conn.from_node, conn.from_port))
                    .or_default()
                    .push((tx, conn.capacity.overflow()));
            }
        }

        for (key, tx) in self.taps.drain(..) {
            senders.entry(key).or_default().push((tx, OverflowPolicy::Block));
        }
        for (key, rx) in self.feeds.drain(..) {
            receivers.insert(key, rx);
        }

        // Phase 2: bind every port before any stage runs
        let mut names_by_id: HashMap<usize, String> =
            self.node_names.drain().map(|(name, id)| (id, name)).collect();
        let mut bound = Vec::with_capacity(self.nodes.len());

        for (node_id, node) in self.nodes.drain(..) {
            let node_name = names_by_id
                .remove(&node_id)
                .unwrap_or_else(|| node.name().to_string());
            let (input_schemas, output_schemas) =
                self.node_schemas.remove(&node_id).unwrap_or_default();

            debug!("Binding stage {}: {}", node_id, node_name);

            // Unconnected inputs are allowed - stages may have optional inputs
            let input_ports: Vec<_> = (0..node.num_inputs())
                .map(|i| {
                    let port = receivers
                        .remove(&(node_id, i))
                        .map(InputPort::from_type_erased)
                        .unwrap_or_else(InputPort::unconnected);
                    let port_name = input_schemas
                        .get(i)
                        .map(|s| s.name.clone())
                        .unwrap_or_else(|| format!("in{}", i));
                    port.with_watchdog(&self.watchdog, &node_name, &port_name)
                })
                .collect();

            // Every declared output gets a broadcast sender, possibly with no destinations
            let output_ports = (0..node.num_outputs())
                .map(|i| {
                    let schema = output_schemas.get(i).ok_or_else(|| {
                        PipelineError::Runtime(format!(
                            "Stage '{}' declares output {} without a schema",
                            node_name, i
                        ))
                    })?;
                    let sender_list = senders.remove(&(node_id, i)).unwrap_or_default();
                    let registry = TYPE_REGISTRY
                        .lock()
                        .map_err(|_| PipelineError::Runtime("type registry poisoned".to_string()))?;
                    let wrapped = registry
                        .wrap_output(schema.type_id, sender_list)
                        .ok_or(PipelineError::UnregisteredType(schema.type_id))?
                        .map_err(PipelineError::Runtime)?;
                    Ok(OutputPort::from_type_erased(wrapped).with_watchdog(
                        &self.watchdog,
                        &node_name,
                        &schema.name,
                    ))
                })
                .collect::<Result<Vec<_>, PipelineError>>()?;

            bound.push((node_name, node, input_ports, output_ports));
        }

        // Phase 3: start every stage in insertion order
        let mut scheduler = Scheduler::with_watchdog(self.watchdog.clone());
        for (name, node, input_ports, output_ports) in bound {
            if let Err(e) = scheduler.start_process(name, node, input_ports, output_ports) {
                error!("Pipeline start failed, stopping started stages: {}", e);
                scheduler.stop();
                let _ = scheduler.wait();
                return Err(e);
            }
        }

        info!(
            "Pipeline built successfully with {} threads",
            scheduler.num_threads()
        );
        Ok(scheduler)
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::node::StageContext;
    use crate::runtime::errors::WorkResult;

    struct TestSource;
    impl ProcessNode for TestSource {
        fn name(&self) -> &str { "test_source" }
        fn num_inputs(&self) -> usize { 0 }
        fn num_outputs(&self) -> usize { 1 }
        fn output_schema(&self) -> Vec<PortSchema> {
            vec![PortSchema::new::<String>("out", 0, PortDirection::Output)]
        }
        fn work(&mut self, ctx: &StageContext<'_>) -> WorkResult<usize> {
            ctx.sleep(std::time::Duration::from_millis(10))?;
            Ok(0)
        }
    }

    struct TestSink;
    impl ProcessNode for TestSink {
        fn name(&self) -> &str { "test_sink" }
        fn num_inputs(&self) -> usize { 1 }
        fn num_outputs(&self) -> usize { 0 }
        fn input_schema(&self) -> Vec<PortSchema> {
            vec![PortSchema::new::<String>("in", 0, PortDirection::Input)]
        }
        fn work(&mut self, ctx: &StageContext<'_>) -> WorkResult<usize> {
            ctx.input::<String>(0)?.recv()?;
            Ok(1)
        }
    }

    struct BytesSink;
    impl ProcessNode for BytesSink {
        fn name(&self) -> &str { "bytes_sink" }
        fn num_inputs(&self) -> usize { 1 }
        fn num_outputs(&self) -> usize { 0 }
        fn input_schema(&self) -> Vec<PortSchema> {
            vec![PortSchema::new::<Vec<u8>>("in", 0, PortDirection::Input)]
        }
        fn work(&mut self, ctx: &StageContext<'_>) -> WorkResult<usize> {
            ctx.input::<Vec<u8>>(0)?.recv()?;
            Ok(1)
        }
    }

    /// Forwards each line upper-cased
    struct Upper;
    impl ProcessNode for Upper {
        fn name(&self) -> &str { "upper" }
        fn num_inputs(&self) -> usize { 1 }
        fn num_outputs(&self) -> usize { 1 }
        fn input_schema(&self) -> Vec<PortSchema> {
            vec![PortSchema::new::<String>("in", 0, PortDirection::Input)]
        }
        fn output_schema(&self) -> Vec<PortSchema> {
            vec![PortSchema::new::<String>("out", 0, PortDirection::Output)]
        }
        fn work(&mut self, ctx: &StageContext<'_>) -> WorkResult<usize> {
            let line = ctx.input::<String>(0)?.recv()?;
            ctx.output::<String>(0)?.send(line.to_uppercase())?;
            Ok(1)
        }
    }

    #[derive(Clone)]
    struct Opaque;

    /// Declares an output whose payload type is never registered
    struct OpaqueSource;
    impl ProcessNode for OpaqueSource {
        fn name(&self) -> &str { "opaque_source" }
        fn num_inputs(&self) -> usize { 0 }
        fn num_outputs(&self) -> usize { 1 }
        fn output_schema(&self) -> Vec<PortSchema> {
            vec![PortSchema::new::<Opaque>("out", 0, PortDirection::Output)]
        }
        fn work(&mut self, _ctx: &StageContext<'_>) -> WorkResult<usize> {
            Ok(0)
        }
    }

    #[test]
    fn test_single_connection() {
        let mut pipeline = Pipeline::new();
        pipeline.add_process("source", TestSource).unwrap();
        pipeline.add_process("sink", TestSink).unwrap();

        assert!(pipeline.connect("source", "out", "sink", "in").is_ok());
    }

    #[test]
    fn test_duplicate_input_connection_rejected() {
        let mut pipeline = Pipeline::new();
        pipeline.add_process("source1", TestSource).unwrap();
        pipeline.add_process("source2", TestSource).unwrap();
        pipeline.add_process("sink", TestSink).unwrap();

        pipeline.connect("source1", "out", "sink", "in").unwrap();

        let result = pipeline.connect("source2", "out", "sink", "in");
        assert!(result.unwrap_err().to_string().contains("already connected"));
    }

    #[test]
    fn test_feed_counts_as_producer() {
        let mut pipeline = Pipeline::new();
        pipeline.add_process("source", TestSource).unwrap();
        pipeline.add_process("sink", TestSink).unwrap();

        let _feed = pipeline.feed::<String>("sink", "in").unwrap();
        assert!(pipeline.connect("source", "out", "sink", "in").is_err());
    }

    #[test]
    fn test_multiple_output_connections_allowed() {
        let mut pipeline = Pipeline::new();
        pipeline.add_process("source", TestSource).unwrap();
        pipeline.add_process("sink1", TestSink).unwrap();
        pipeline.add_process("sink2", TestSink).unwrap();

        assert!(pipeline.connect("source", "out", "sink1", "in").is_ok());
        assert!(pipeline.connect("source", "out", "sink2", "in").is_ok());
    }

    #[test]
    fn test_type_mismatch_rejected() {
        let mut pipeline = Pipeline::new();
        pipeline.add_process("source", TestSource).unwrap();
        pipeline.add_process("sink", BytesSink).unwrap();

        let err = pipeline.connect("source", "out", "sink", "in").unwrap_err();
        assert!(matches!(*err, ConnectionError::TypeMismatch { .. }));
        assert!(pipeline.tap::<Vec<u8>>("source", "out").is_err());
    }

    #[test]
    fn test_connection_to_nonexistent_node_or_port() {
        let mut pipeline = Pipeline::new();
        pipeline.add_process("source", TestSource).unwrap();
        pipeline.add_process("sink", TestSink).unwrap();

        assert!(pipeline.connect("source", "out", "nonexistent", "in").is_err());
        assert!(pipeline.connect("source", "wrong_port", "sink", "in").is_err());
    }

    #[test]
    fn test_duplicate_node_name_rejected() {
        let mut pipeline = Pipeline::new();
        assert!(pipeline.add_process("node1", TestSource).is_ok());
        let err = pipeline.add_process("node1", TestSource).unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn test_list_nodes_and_ports() {
        let mut pipeline = Pipeline::new();
        pipeline.add_process("source", TestSource).unwrap();
        pipeline.add_process("sink", TestSink).unwrap();

        let nodes = pipeline.list_nodes();
        assert_eq!(nodes.len(), 2);
        assert!(nodes.contains(&"source"));
        assert_eq!(pipeline.list_node_outputs("source").unwrap()[0].name, "out");
        assert_eq!(pipeline.list_node_inputs("sink").unwrap()[0].name, "in");
    }

    #[test]
    fn test_feed_through_stage_to_tap() {
        let mut pipeline = Pipeline::new();
        pipeline.add_process("upper", Upper).unwrap();
        let feed = pipeline.feed::<String>("upper", "in").unwrap();
        let tap = pipeline.tap::<String>("upper", "out").unwrap();

        let scheduler = pipeline.build().unwrap();
        feed.send("a,b".to_string()).unwrap();
        feed.send("c".to_string()).unwrap();
        feed.close();

        assert_eq!(tap.collect::<Vec<_>>(), vec!["A,B".to_string(), "C".to_string()]);
        let report = scheduler.wait().unwrap();
        assert_eq!(report.stage("upper").unwrap().items, 2);
    }

    #[test]
    fn test_stages_are_reported_under_pipeline_names() {
        let mut pipeline = Pipeline::new();
        pipeline.add_process("shout", Upper).unwrap();
        let feed = pipeline.feed::<String>("shout", "in").unwrap();

        let scheduler = pipeline.build().unwrap();
        assert_eq!(scheduler.thread_names(), vec!["shout".to_string()]);
        feed.send("x".to_string()).unwrap();

        assert!(!scheduler.stop_stage("upper"));
        assert!(scheduler.stop_stage("shout"));
        let report = scheduler.wait().unwrap();
        assert!(report.stage("shout").is_some());
        assert!(report.stage("upper").is_none());
    }

    #[test]
    fn test_failed_build_starts_no_stage() {
        use crate::nodes::SerialSource;
        use crate::transport::MockTransport;

        let (transport, handle) = MockTransport::with_data("1,2\n");
        let mut pipeline = Pipeline::new();
        pipeline.add_process("source", SerialSource::new(transport, 16)).unwrap();
        pipeline.add_process("opaque", OpaqueSource).unwrap();

        let err = pipeline.build().err().unwrap();
        assert!(matches!(err, PipelineError::UnregisteredType(_)));

        std::thread::sleep(std::time::Duration::from_millis(100));
        assert_eq!(handle.reads(), 0);
        assert!(!handle.is_drained());
    }

    #[test]
    fn test_bounded_drop_connection_builds() {
        let mut pipeline = Pipeline::new();
        pipeline.add_process("source", TestSource).unwrap();
        pipeline.add_process("sink", TestSink).unwrap();
        pipeline
            .connect_with_capacity(
                "source",
                "out",
                "sink",
                "in",
                QueueCapacity::Bounded(8, OverflowPolicy::DropNewest),
            )
            .unwrap();

        let scheduler = pipeline.build().unwrap();
        scheduler.stop();
        assert!(scheduler.wait().is_ok());
    }
}
