//! Type registry for dynamic queue creation
//!
//! `Pipeline::build` only knows connections by `TypeId`. The registry maps a
//! payload type to the closures that create its queue and wrap its senders.

use super::sender::{ChannelMessage, ErasedSender, OverflowPolicy, QueueCapacity, Sender};
use crossbeam_channel::{Sender as CrossbeamSender, bounded, unbounded};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

type ChannelCreatorFn =
    Box<dyn Fn(QueueCapacity) -> (Box<dyn Any + Send>, Box<dyn Any + Send>) + Send + Sync>;
type OutputWrapperFn = Box<
    dyn Fn(Vec<(Box<dyn Any + Send>, OverflowPolicy)>) -> Result<Box<dyn ErasedSender>, String>
        + Send
        + Sync,
>;

pub(crate) struct TypeRegistry {
    channel_creators: HashMap<TypeId, ChannelCreatorFn>,
    output_wrappers: HashMap<TypeId, OutputWrapperFn>,
}

impl TypeRegistry {
    fn new() -> Self {
        Self {
            channel_creators: HashMap::new(),
            output_wrappers: HashMap::new(),
        }
    }

    /// Register a payload type for use in queues
    fn register<T: 'static + Send + Clone>(&mut self) {
        let type_id = TypeId::of::<T>();

        // Queues carry ChannelMessage<T> internally
        self.channel_creators.insert(
            type_id,
            Box::new(|capacity: QueueCapacity| {
                let (tx, rx) = match capacity {
                    QueueCapacity::Unbounded => unbounded::<ChannelMessage<T>>(),
                    QueueCapacity::Bounded(size, _) => bounded::<ChannelMessage<T>>(size),
                };
                (
                    Box::new(tx) as Box<dyn Any + Send>,
                    Box::new(rx) as Box<dyn Any + Send>,
                )
            }),
        );

        // An output with no destinations still gets an (empty) broadcast sender
        self.output_wrappers.insert(
            type_id,
            Box::new(|senders: Vec<(Box<dyn Any + Send>, OverflowPolicy)>| {
                let mut typed_senders = Vec::with_capacity(senders.len());
                for (sender, policy) in senders {
                    match sender.downcast::<CrossbeamSender<ChannelMessage<T>>>() {
                        Ok(tx) => typed_senders.push((*tx, policy)),
                        Err(_) => return Err("Type mismatch in sender".to_string()),
                    }
                }

                Ok(Box::new(Sender::with_policies(typed_senders)) as Box<dyn ErasedSender>)
            }),
        );
    }

    pub(crate) fn create_channel(
        &self,
        type_id: TypeId,
        capacity: QueueCapacity,
    ) -> Option<(Box<dyn Any + Send>, Box<dyn Any + Send>)> {
        self.channel_creators.get(&type_id).map(|creator| creator(capacity))
    }

    pub(crate) fn wrap_output(
        &self,
        type_id: TypeId,
        senders: Vec<(Box<dyn Any + Send>, OverflowPolicy)>,
    ) -> Option<Result<Box<dyn ErasedSender>, String>> {
        self.output_wrappers.get(&type_id).map(|wrap| wrap(senders))
    }
}

// Global type registry
lazy_static::lazy_static! {
    pub(crate) static ref TYPE_REGISTRY: Arc<Mutex<TypeRegistry>> = {
        let mut registry = TypeRegistry::new();

        // Payloads of the serial pipeline: raw chunks, lines, field lists
        registry.register::<Vec<u8>>();
        registry.register::<String>();
        registry.register::<Vec<String>>();

        Arc::new(Mutex::new(registry))
    };
}

/// Register a custom payload type for use in pipelines.
/// Call this before building pipelines that use custom types.
pub fn register_type<T: 'static + Send + Clone>() {
    let mut registry = TYPE_REGISTRY.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    registry.register::<T>();
}
