use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::edge::Edge;
use crate::error::GraphError;
use crate::schedule::Schedule;
use crate::task::{Task, TaskInput, TaskPayload};
use crate::value::Value;

pub type FlowId = Uuid;

pub(crate) type TaskId = usize;

/// Internal edge record; endpoints are arena indices, the public API
/// speaks task names.
#[derive(Debug, Clone, PartialEq, Eq)]
struct EdgeData {
    upstream: TaskId,
    downstream: TaskId,
    key: Option<String>,
}

/// Parameter metadata as reported by [`Flow::parameters`] and persisted in
/// flow documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub required: bool,
    pub default: Option<Value>,
}

/// A named, versioned directed graph of tasks and dependency edges.
///
/// Tasks live in an indexed arena keyed by name; edges store arena
/// indices. Construction is single-threaded by contract: flows are
/// assembled once, before execution begins, so mutation is not
/// synchronized. Every mutating operation re-checks the graph invariants
/// eagerly and fails at the offending call.
///
/// Two flows compare equal when they share project, name, version and
/// graph contents; identity is the separate [`FlowId`], and `Flow`
/// deliberately does not implement `Hash`.
#[derive(Debug, Clone)]
pub struct Flow {
    id: FlowId,
    pub name: String,
    pub version: Option<String>,
    pub project: String,
    pub description: Option<String>,
    pub schedule: Schedule,
    pub cluster: Option<String>,
    tasks: Vec<Task>,
    index: HashMap<String, TaskId>,
    edges: Vec<EdgeData>,
}

impl Flow {
    pub fn new(name: impl Into<String>) -> Result<Flow, GraphError> {
        let name = name.into();
        if name.is_empty() {
            return Err(GraphError::Construction("flows must have a name".into()));
        }
        Ok(Flow {
            id: Uuid::new_v4(),
            name,
            version: None,
            project: "default".to_string(),
            description: None,
            schedule: Schedule::default(),
            cluster: None,
            tasks: Vec::new(),
            index: HashMap::new(),
            edges: Vec::new(),
        })
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = project.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_schedule(mut self, schedule: Schedule) -> Self {
        self.schedule = schedule;
        self
    }

    /// Address of the cluster this flow should execute against, forwarded
    /// to the backend through the flow document's executor arguments.
    pub fn with_cluster(mut self, cluster: impl Into<String>) -> Self {
        self.cluster = Some(cluster.into());
        self
    }

    pub fn id(&self) -> FlowId {
        self.id
    }

    /// Slugified `"name:version"`, or just the name when unversioned.
    pub fn slug(&self) -> String {
        match &self.version {
            Some(version) => slug::slugify(format!("{}:{}", self.name, version)),
            None => slug::slugify(&self.name),
        }
    }

    // Graph construction ---------------------------------------------------

    /// Insert a task keyed by name.
    ///
    /// A task whose slug collides with any task already in the flow is
    /// rejected — including re-adding an identical task. Inserting under
    /// an existing name otherwise silently replaces that entry, keeping
    /// its arena position.
    pub fn add_task(&mut self, task: Task) -> Result<(), GraphError> {
        if self.tasks.iter().any(|t| t.slug() == task.slug()) {
            return Err(GraphError::DuplicateSlug {
                task: task.name().to_string(),
                slug: task.slug().to_string(),
            });
        }
        match self.index.get(task.name()) {
            Some(&id) => self.tasks[id] = task,
            None => {
                self.index.insert(task.name().to_string(), self.tasks.len());
                self.tasks.push(task);
            }
        }
        Ok(())
    }

    pub fn get_task(&self, name: &str) -> Result<&Task, GraphError> {
        self.index
            .get(name)
            .map(|&id| &self.tasks[id])
            .ok_or_else(|| GraphError::NotFound(name.to_string()))
    }

    pub fn contains_task(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter()
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Add a dependency edge from `upstream` to `downstream`.
    ///
    /// Endpoints not yet in the flow are added automatically. A non-null
    /// `key` additionally binds the upstream result to that keyword input
    /// of the downstream task; a second edge into the same task with the
    /// same key is rejected. The full topological sort runs after every
    /// insertion, so an edge that would close a cycle is removed again
    /// before the error returns — the flow is never observably cyclic.
    pub fn add_edge(
        &mut self,
        upstream: &Task,
        downstream: &Task,
        key: Option<&str>,
    ) -> Result<(), GraphError> {
        self.ensure_task(upstream)?;
        self.ensure_task(downstream)?;
        let up = self.index[upstream.name()];
        let down = self.index[downstream.name()];

        if let Some(key) = key {
            let clash = self
                .edges
                .iter()
                .any(|e| e.downstream == down && e.key.as_deref() == Some(key));
            if clash {
                return Err(GraphError::DuplicateKey {
                    task: downstream.name().to_string(),
                    key: key.to_string(),
                });
            }
        }

        let edge = EdgeData {
            upstream: up,
            downstream: down,
            key: key.map(str::to_string),
        };
        if self.edges.contains(&edge) {
            return Ok(());
        }
        self.edges.push(edge);

        if self.topo_ids(None).is_err() {
            self.edges.pop();
            tracing::debug!(
                upstream = upstream.name(),
                downstream = downstream.name(),
                "edge rejected: would close a cycle"
            );
            return Err(GraphError::Cycle);
        }
        Ok(())
    }

    /// Batch convenience: wire `task` to upstream and downstream tasks,
    /// plus keyed edges from `upstream_results`, coercing bare values into
    /// constant tasks.
    pub fn set_dependencies(
        &mut self,
        task: &Task,
        upstream_tasks: &[&Task],
        downstream_tasks: &[&Task],
        upstream_results: Vec<(String, TaskInput)>,
    ) -> Result<(), GraphError> {
        self.ensure_task(task)?;
        for upstream in upstream_tasks {
            self.add_edge(upstream, task, None)?;
        }
        for downstream in downstream_tasks {
            self.add_edge(task, downstream, None)?;
        }
        for (key, input) in upstream_results {
            let upstream = input.into_task();
            self.add_edge(&upstream, task, Some(&key))?;
        }
        Ok(())
    }

    /// Add the task unless an equal task is already present under its
    /// name.
    fn ensure_task(&mut self, task: &Task) -> Result<(), GraphError> {
        match self.index.get(task.name()) {
            Some(&id) if self.tasks[id] == *task => Ok(()),
            _ => self.add_task(task.clone()),
        }
    }

    // Graph queries --------------------------------------------------------

    /// Tasks immediately upstream of the given task or name. Unknown names
    /// have no edges and yield an empty set.
    pub fn upstream_tasks<N: TaskName + ?Sized>(&self, task: &N) -> Vec<&Task> {
        self.neighbors(task.task_name(), Direction::Upstream)
    }

    /// Tasks immediately downstream of the given task or name.
    pub fn downstream_tasks<N: TaskName + ?Sized>(&self, task: &N) -> Vec<&Task> {
        self.neighbors(task.task_name(), Direction::Downstream)
    }

    fn neighbors(&self, name: &str, direction: Direction) -> Vec<&Task> {
        let Some(&id) = self.index.get(name) else {
            return Vec::new();
        };
        let mut seen = Vec::new();
        for edge in &self.edges {
            let neighbor = match direction {
                Direction::Upstream if edge.downstream == id => edge.upstream,
                Direction::Downstream if edge.upstream == id => edge.downstream,
                _ => continue,
            };
            if !seen.contains(&neighbor) {
                seen.push(neighbor);
            }
        }
        seen.into_iter().map(|id| &self.tasks[id]).collect()
    }

    /// All edges leading into the given task.
    pub fn edges_to<N: TaskName + ?Sized>(&self, task: &N) -> Vec<Edge> {
        let name = task.task_name();
        match self.index.get(name) {
            Some(&id) => self
                .edges
                .iter()
                .filter(|e| e.downstream == id)
                .map(|e| self.to_edge(e))
                .collect(),
            None => Vec::new(),
        }
    }

    /// All edges leading out of the given task.
    pub fn edges_from<N: TaskName + ?Sized>(&self, task: &N) -> Vec<Edge> {
        let name = task.task_name();
        match self.index.get(name) {
            Some(&id) => self
                .edges
                .iter()
                .filter(|e| e.upstream == id)
                .map(|e| self.to_edge(e))
                .collect(),
            None => Vec::new(),
        }
    }

    /// The full edge set as name-based records.
    pub fn edges(&self) -> Vec<Edge> {
        self.edges.iter().map(|e| self.to_edge(e)).collect()
    }

    fn to_edge(&self, edge: &EdgeData) -> Edge {
        Edge {
            upstream_task: self.tasks[edge.upstream].name().to_string(),
            downstream_task: self.tasks[edge.downstream].name().to_string(),
            key: edge.key.clone(),
        }
    }

    /// Tasks with no incoming edges, in arena order.
    pub fn root_tasks(&self) -> Vec<&Task> {
        let targets: HashSet<TaskId> = self.edges.iter().map(|e| e.downstream).collect();
        self.tasks
            .iter()
            .enumerate()
            .filter(|(id, _)| !targets.contains(id))
            .map(|(_, task)| task)
            .collect()
    }

    /// Tasks with no outgoing edges, in arena order.
    pub fn terminal_tasks(&self) -> Vec<&Task> {
        let sources: HashSet<TaskId> = self.edges.iter().map(|e| e.upstream).collect();
        self.tasks
            .iter()
            .enumerate()
            .filter(|(id, _)| !sources.contains(id))
            .map(|(_, task)| task)
            .collect()
    }

    /// Parameter tasks and their metadata, optionally restricted to
    /// required parameters.
    pub fn parameters(&self, only_required: bool) -> BTreeMap<String, ParameterSpec> {
        self.tasks
            .iter()
            .filter_map(|task| match task.payload() {
                TaskPayload::Parameter { required, default } => Some((task, required, default)),
                TaskPayload::Operation { .. } => None,
            })
            .filter(|(_, required, _)| **required || !only_required)
            .map(|(task, required, default)| {
                (
                    task.name().to_string(),
                    ParameterSpec {
                        required: *required,
                        default: default.clone(),
                    },
                )
            })
            .collect()
    }

    // Ordering -------------------------------------------------------------

    /// A topological order of the flow's tasks.
    ///
    /// When `root_tasks` is given the order covers only the transitive
    /// downstream closure of those roots. Ties between independent tasks
    /// break by task insertion order; only the dependency order itself is
    /// part of the contract.
    pub fn sorted_tasks(&self, root_tasks: Option<&[&str]>) -> Result<Vec<&Task>, GraphError> {
        Ok(self
            .topo_ids(root_tasks)?
            .into_iter()
            .map(|id| &self.tasks[id])
            .collect())
    }

    fn topo_ids(&self, root_tasks: Option<&[&str]>) -> Result<Vec<TaskId>, GraphError> {
        let mut in_set = vec![false; self.tasks.len()];
        match root_tasks {
            Some(roots) => {
                // fixed point over downstream neighbors
                let mut frontier = Vec::with_capacity(roots.len());
                for root in roots {
                    let &id = self
                        .index
                        .get(*root)
                        .ok_or_else(|| GraphError::NotFound(root.to_string()))?;
                    frontier.push(id);
                }
                while let Some(id) = frontier.pop() {
                    if in_set[id] {
                        continue;
                    }
                    in_set[id] = true;
                    for edge in &self.edges {
                        if edge.upstream == id && !in_set[edge.downstream] {
                            frontier.push(edge.downstream);
                        }
                    }
                }
            }
            None => in_set.fill(true),
        }

        let mut remaining = in_set.iter().filter(|member| **member).count();
        let mut done = vec![false; self.tasks.len()];
        let mut sorted = Vec::with_capacity(remaining);
        while remaining > 0 {
            let mut progressed = false;
            for id in 0..self.tasks.len() {
                if !in_set[id] || done[id] {
                    continue;
                }
                // removable once every upstream is sorted or outside the
                // working set
                let ready = self
                    .edges
                    .iter()
                    .filter(|e| e.downstream == id)
                    .all(|e| !in_set[e.upstream] || done[e.upstream]);
                if ready {
                    done[id] = true;
                    sorted.push(id);
                    remaining -= 1;
                    progressed = true;
                }
            }
            if !progressed {
                return Err(GraphError::Cycle);
            }
        }
        Ok(sorted)
    }

    /// A new flow containing only the tasks reachable downstream from
    /// `root_tasks` (or all tasks) and the edges whose endpoints both
    /// survive. Task contents are shared clones; the task collections are
    /// fresh.
    pub fn sub_flow(&self, root_tasks: Option<&[&str]>) -> Result<Flow, GraphError> {
        let mut sub = Flow {
            id: Uuid::new_v4(),
            name: self.name.clone(),
            version: self.version.clone(),
            project: self.project.clone(),
            description: self.description.clone(),
            schedule: self.schedule.clone(),
            cluster: self.cluster.clone(),
            tasks: Vec::new(),
            index: HashMap::new(),
            edges: Vec::new(),
        };
        for task in self.sorted_tasks(root_tasks)? {
            sub.add_task(task.clone())?;
        }
        for edge in &self.edges {
            let upstream = self.tasks[edge.upstream].name();
            let downstream = self.tasks[edge.downstream].name();
            if let (Some(&up), Some(&down)) = (sub.index.get(upstream), sub.index.get(downstream)) {
                sub.edges.push(EdgeData {
                    upstream: up,
                    downstream: down,
                    key: edge.key.clone(),
                });
            }
        }
        tracing::debug!(
            flow = %self.slug(),
            tasks = sub.tasks.len(),
            edges = sub.edges.len(),
            "extracted sub-flow"
        );
        Ok(sub)
    }

    fn task_map(&self) -> BTreeMap<&str, &Task> {
        self.tasks.iter().map(|task| (task.name(), task)).collect()
    }

    fn edge_set(&self) -> HashSet<Edge> {
        self.edges().into_iter().collect()
    }
}

impl PartialEq for Flow {
    fn eq(&self, other: &Self) -> bool {
        self.project == other.project
            && self.name == other.name
            && self.version == other.version
            && self.task_map() == other.task_map()
            && self.edge_set() == other.edge_set()
    }
}

enum Direction {
    Upstream,
    Downstream,
}

/// Accepted wherever an operation takes "a task or its name".
pub trait TaskName {
    fn task_name(&self) -> &str;
}

impl TaskName for str {
    fn task_name(&self) -> &str {
        self
    }
}

impl TaskName for String {
    fn task_name(&self) -> &str {
        self
    }
}

impl TaskName for Task {
    fn task_name(&self) -> &str {
        self.name()
    }
}
