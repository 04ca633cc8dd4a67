use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::edge::Edge;
use crate::error::{DocumentError, GraphError};
use crate::flow::{Flow, ParameterSpec};
use crate::schedule::{self, Schedule};
use crate::task::Task;

/// One task entry in a persisted flow document. `sort_order` is the
/// 1-based topological position of the task at serialization time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub name: String,
    pub slug: String,
    pub kind: String,
    pub sort_order: usize,
}

/// Backend-specific execution arguments carried alongside a flow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutorArgs {
    pub cluster: Option<String>,
}

/// The persisted representation of a flow.
///
/// The metadata records (`tasks`, `edges`, `parameters`, `schedule`) fully
/// describe the graph shape and are safe to hand to anyone. `serialized`
/// is the full-fidelity payload: it carries the operation configurations
/// that drive executable behavior and must only be fed back through
/// [`Flow::deserialize`] when the document comes from a trusted source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowDocument {
    pub project: String,
    pub name: String,
    pub slug: String,
    pub version: Option<String>,
    pub serialized: Option<serde_json::Value>,
    pub tasks: Vec<TaskRecord>,
    pub edges: Vec<Edge>,
    pub parameters: BTreeMap<String, ParameterSpec>,
    pub description: Option<String>,
    pub schedule: serde_json::Value,
    pub executor_args: ExecutorArgs,
}

impl FlowDocument {
    /// A copy with the full-fidelity payload stripped, suitable for
    /// crossing a trust boundary. Only safe reconstruction is possible
    /// from the result.
    pub fn redacted(&self) -> FlowDocument {
        FlowDocument {
            serialized: None,
            ..self.clone()
        }
    }
}

/// Full-fidelity payload stored inside [`FlowDocument::serialized`].
#[derive(Serialize, Deserialize)]
struct FlowBlob {
    name: String,
    version: Option<String>,
    project: String,
    description: Option<String>,
    cluster: Option<String>,
    schedule: Schedule,
    tasks: Vec<Task>,
    edges: Vec<Edge>,
}

impl Flow {
    /// Persist the flow as a [`FlowDocument`].
    pub fn serialize(&self) -> Result<FlowDocument, DocumentError> {
        let ordered = self.sorted_tasks(None)?;
        let records = ordered
            .iter()
            .enumerate()
            .map(|(position, task)| TaskRecord {
                name: task.name().to_string(),
                slug: task.slug().to_string(),
                kind: task.kind().to_string(),
                sort_order: position + 1,
            })
            .collect();
        let blob = FlowBlob {
            name: self.name.clone(),
            version: self.version.clone(),
            project: self.project.clone(),
            description: self.description.clone(),
            cluster: self.cluster.clone(),
            schedule: self.schedule.clone(),
            tasks: ordered.into_iter().cloned().collect(),
            edges: self.edges(),
        };
        tracing::debug!(flow = %self.slug(), "serializing flow document");
        Ok(FlowDocument {
            project: self.project.clone(),
            name: self.name.clone(),
            slug: self.slug(),
            version: self.version.clone(),
            serialized: Some(serde_json::to_value(&blob)?),
            tasks: records,
            edges: self.edges(),
            parameters: self.parameters(false),
            description: self.description.clone(),
            schedule: schedule::serialize(&self.schedule)?,
            executor_args: ExecutorArgs {
                cluster: self.cluster.clone(),
            },
        })
    }

    /// Rebuild the complete, runnable flow from a document's
    /// full-fidelity payload.
    ///
    /// The payload alone is authoritative: it is replayed through the
    /// construction API, so every graph invariant is re-validated. The
    /// reconstructed operation configurations drive registry-created
    /// behavior at execution time — only apply this to documents from a
    /// trusted source. For anything else use
    /// [`FlowOutline::safe_deserialize`].
    pub fn deserialize(document: &FlowDocument) -> Result<Flow, DocumentError> {
        let payload = document
            .serialized
            .as_ref()
            .ok_or(DocumentError::TrustBoundary)?;
        let blob: FlowBlob = serde_json::from_value(payload.clone())?;

        let mut flow = Flow::new(blob.name)?
            .with_project(blob.project)
            .with_schedule(blob.schedule);
        if let Some(version) = blob.version {
            flow = flow.with_version(version);
        }
        if let Some(description) = blob.description {
            flow = flow.with_description(description);
        }
        if let Some(cluster) = blob.cluster {
            flow = flow.with_cluster(cluster);
        }
        for task in blob.tasks {
            flow.add_task(task)?;
        }
        for edge in blob.edges {
            let upstream = flow.get_task(&edge.upstream_task)?.clone();
            let downstream = flow.get_task(&edge.downstream_task)?.clone();
            flow.add_edge(&upstream, &downstream, edge.key.as_deref())?;
        }
        tracing::debug!(flow = %flow.slug(), "rebuilt flow from document");
        Ok(flow)
    }
}

/// A task placeholder inside a [`FlowOutline`]: name, slug and record
/// kind, no executable surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutlineTask {
    pub name: String,
    pub slug: String,
    pub kind: String,
}

/// Graph shape reconstructed from a flow document without touching its
/// full-fidelity payload.
///
/// An outline answers structural queries — dependency order, roots,
/// terminals, parameter metadata — but its tasks cannot run: the type has
/// no execution surface at all, which is what makes it safe to build from
/// documents received across a trust boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowOutline {
    pub name: String,
    pub version: Option<String>,
    pub project: String,
    pub description: Option<String>,
    pub schedule: Schedule,
    tasks: Vec<OutlineTask>,
    edges: Vec<Edge>,
    parameters: BTreeMap<String, ParameterSpec>,
}

impl FlowOutline {
    /// Rebuild the graph shape from a document's metadata records.
    ///
    /// Never reads `serialized` and shares no reconstruction code with
    /// [`Flow::deserialize`]. The records are validated structurally:
    /// unique names and slugs, known edge endpoints, unique
    /// `(downstream, key)` pairs, and edge direction consistent with the
    /// recorded sort order.
    pub fn safe_deserialize(document: &FlowDocument) -> Result<FlowOutline, DocumentError> {
        let schedule = schedule::deserialize(&document.schedule)?;

        let mut records: Vec<&TaskRecord> = document.tasks.iter().collect();
        records.sort_by_key(|record| record.sort_order);

        let mut position: HashMap<&str, usize> = HashMap::new();
        let mut tasks = Vec::with_capacity(records.len());
        for record in records {
            if position.contains_key(record.name.as_str()) {
                return Err(DocumentError::Invalid(format!(
                    "duplicate task name \"{}\"",
                    record.name
                )));
            }
            if tasks.iter().any(|t: &OutlineTask| t.slug == record.slug) {
                return Err(DocumentError::Graph(GraphError::DuplicateSlug {
                    task: record.name.clone(),
                    slug: record.slug.clone(),
                }));
            }
            position.insert(record.name.as_str(), tasks.len());
            tasks.push(OutlineTask {
                name: record.name.clone(),
                slug: record.slug.clone(),
                kind: record.kind.clone(),
            });
        }

        let mut edges: Vec<Edge> = Vec::with_capacity(document.edges.len());
        for edge in &document.edges {
            let up = *position
                .get(edge.upstream_task.as_str())
                .ok_or_else(|| DocumentError::Graph(GraphError::NotFound(edge.upstream_task.clone())))?;
            let down = *position
                .get(edge.downstream_task.as_str())
                .ok_or_else(|| {
                    DocumentError::Graph(GraphError::NotFound(edge.downstream_task.clone()))
                })?;
            if let Some(key) = &edge.key {
                let clash = edges
                    .iter()
                    .any(|e| e.downstream_task == edge.downstream_task && e.key.as_ref() == Some(key));
                if clash {
                    return Err(DocumentError::Graph(GraphError::DuplicateKey {
                        task: edge.downstream_task.clone(),
                        key: key.clone(),
                    }));
                }
            }
            if up >= down {
                return Err(DocumentError::Invalid(format!(
                    "edge \"{}\" -> \"{}\" contradicts the recorded sort order",
                    edge.upstream_task, edge.downstream_task
                )));
            }
            if !edges.contains(edge) {
                edges.push(edge.clone());
            }
        }

        Ok(FlowOutline {
            name: document.name.clone(),
            version: document.version.clone(),
            project: document.project.clone(),
            description: document.description.clone(),
            schedule,
            tasks,
            edges,
            parameters: document.parameters.clone(),
        })
    }

    /// Slugified `"name:version"`, or just the name when unversioned.
    pub fn slug(&self) -> String {
        match &self.version {
            Some(version) => slug::slugify(format!("{}:{}", self.name, version)),
            None => slug::slugify(&self.name),
        }
    }

    /// Task placeholders in dependency order.
    pub fn tasks(&self) -> &[OutlineTask] {
        &self.tasks
    }

    pub fn get_task(&self, name: &str) -> Result<&OutlineTask, GraphError> {
        self.tasks
            .iter()
            .find(|task| task.name == name)
            .ok_or_else(|| GraphError::NotFound(name.to_string()))
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Placeholders with no incoming edges.
    pub fn root_tasks(&self) -> Vec<&OutlineTask> {
        self.tasks
            .iter()
            .filter(|task| !self.edges.iter().any(|e| e.downstream_task == task.name))
            .collect()
    }

    /// Placeholders with no outgoing edges.
    pub fn terminal_tasks(&self) -> Vec<&OutlineTask> {
        self.tasks
            .iter()
            .filter(|task| !self.edges.iter().any(|e| e.upstream_task == task.name))
            .collect()
    }

    /// Placeholders immediately upstream of the given name.
    pub fn upstream_tasks(&self, name: &str) -> Vec<&OutlineTask> {
        self.edges
            .iter()
            .filter(|e| e.downstream_task == name)
            .filter_map(|e| self.tasks.iter().find(|t| t.name == e.upstream_task))
            .collect()
    }

    /// Placeholders immediately downstream of the given name.
    pub fn downstream_tasks(&self, name: &str) -> Vec<&OutlineTask> {
        self.edges
            .iter()
            .filter(|e| e.upstream_task == name)
            .filter_map(|e| self.tasks.iter().find(|t| t.name == e.downstream_task))
            .collect()
    }

    /// Parameter metadata, optionally restricted to required parameters.
    pub fn parameters(&self, only_required: bool) -> BTreeMap<String, ParameterSpec> {
        self.parameters
            .iter()
            .filter(|(_, spec)| spec.required || !only_required)
            .map(|(name, spec)| (name.clone(), spec.clone()))
            .collect()
    }
}
