//! Runtime support for thread-per-stage streaming pipelines

pub mod errors;
pub mod external;
pub mod node;
pub mod pipeline;
pub mod ports;
pub mod receiver;
pub mod scheduler;
pub mod sender;
pub mod stop;
pub mod type_registry;
pub mod watchdog;

pub use errors::{ConnectionError, PipelineError, WorkError, WorkResult};
pub use external::{Feed, Tap};
pub use node::{ProcessNode, StageContext};
pub use ports::{InputPort, OutputPort, Pipeline, PortDirection, PortSchema, register_type};
pub use receiver::Receiver;
pub use scheduler::{PipelineReport, Scheduler, StageOutcome, StageReport};
pub use sender::{OverflowPolicy, QueueCapacity, Sender};
pub use stop::{StageStop, StopHandle};
pub use watchdog::Watchdog;
