pub mod flow;
pub mod limiter;
pub mod producer;
pub mod retry;
pub mod scheduler;
pub mod worker;

pub use flow::{FlowNode, FlowProducer, FlowResult};
pub use producer::Producer;
pub use retry::{RetryDecision, RetryPolicy};
pub use scheduler::QueueScheduler;
pub use worker::{Processor, Worker};
