// Flow / Dependencies (spec.md 4.6)

use serde_json::Value;
use std::sync::Arc;

use crate::domain::{JobId, JobOptions};
use crate::error::Result;
use crate::port::IdProvider;

use super::producer::Producer;

/// A node in a flow tree: a job plus its children, added via
/// `FlowProducer::add_flow`.
pub struct FlowNode {
    pub name: String,
    pub data: Value,
    pub opts: JobOptions,
    pub children: Vec<FlowNode>,
}

impl FlowNode {
    pub fn new(name: impl Into<String>, data: Value, opts: JobOptions) -> Self {
        Self {
            name: name.into(),
            data,
            opts,
            children: Vec::new(),
        }
    }

    pub fn with_children(mut self, children: Vec<FlowNode>) -> Self {
        self.children = children;
        self
    }
}

/// Result of adding a flow: the root job id plus every descendant's id,
/// in the order they were enqueued (children before the parent).
#[derive(Debug, Clone)]
pub struct FlowResult {
    pub job_id: JobId,
    pub children: Vec<FlowResult>,
}

/// Wraps a `Producer` to perform the post-order walk `addFlow` requires
/// (spec.md 4.6): a parent's id is allocated up front so its children
/// can reference it via `parentKey`, the children are enqueued first
/// (each wiring itself into `{parent}:dependencies`), and only then is
/// the parent itself enqueued - already carrying an initialized
/// dependency set, so the `addJob` script gates it straight into
/// `waiting-children` (I4) rather than `wait`.
pub struct FlowProducer {
    producer: Producer,
    id_provider: Arc<dyn IdProvider>,
}

impl FlowProducer {
    pub fn new(producer: Producer, id_provider: Arc<dyn IdProvider>) -> Self {
        Self {
            producer,
            id_provider,
        }
    }

    pub async fn add_flow(&self, root: FlowNode) -> Result<FlowResult> {
        Box::pin(self.add_node(root, None)).await
    }

    async fn add_node(&self, node: FlowNode, parent_key: Option<JobId>) -> Result<FlowResult> {
        let FlowNode {
            name,
            data,
            mut opts,
            children,
        } = node;

        opts.parent_key = parent_key;

        if children.is_empty() {
            let job_id = self.producer.add(&name, data, opts).await?;
            return Ok(FlowResult {
                job_id,
                children: Vec::new(),
            });
        }

        // Pre-allocate this node's id so children can reference it
        // before it exists in the store.
        let reserved_id = opts.job_id.clone().unwrap_or_else(|| self.id_provider.generate_id());

        let mut children_results = Vec::with_capacity(children.len());
        for child in children {
            let result = Box::pin(self.add_node(child, Some(reserved_id.clone()))).await?;
            children_results.push(result);
        }

        opts.job_id = Some(reserved_id);
        let job_id = self.producer.add(&name, data, opts).await?;

        Ok(FlowResult {
            job_id,
            children: children_results,
        })
    }
}
