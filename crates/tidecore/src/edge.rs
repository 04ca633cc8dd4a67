use serde::{Deserialize, Serialize};

/// A directed dependency between two tasks.
///
/// Endpoints are task names rather than task references, which keeps the
/// edge set serialization-friendly and decoupled from task lifetime. When
/// `key` is present the downstream task receives the upstream result bound
/// to that keyword input; at most one edge into a given downstream task
/// may carry a given key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    pub upstream_task: String,
    pub downstream_task: String,
    pub key: Option<String>,
}

impl Edge {
    pub fn new(
        upstream_task: impl Into<String>,
        downstream_task: impl Into<String>,
        key: Option<String>,
    ) -> Edge {
        Edge {
            upstream_task: upstream_task.into(),
            downstream_task: downstream_task.into(),
            key,
        }
    }
}
