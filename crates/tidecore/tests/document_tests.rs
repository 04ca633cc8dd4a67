use std::collections::HashSet;

use tidecore::{
    DocumentError, Edge, Flow, FlowOutline, GraphError, Schedule, Task, Value,
};

fn sample_flow() -> Flow {
    let mut flow = Flow::new("nightly etl")
        .unwrap()
        .with_version("2")
        .with_project("analytics")
        .with_description("loads and aggregates the nightly batch")
        .with_schedule(Schedule::Cron {
            expression: "0 3 * * *".to_string(),
        })
        .with_cluster("tcp://10.0.0.7:8786");

    let batch_size = Task::parameter("batch_size")
        .unwrap()
        .with_default(Value::from(100i64));
    let extract = Task::operation("extract", "io.read").unwrap();
    let transform = Task::operation("transform", "map.records")
        .unwrap()
        .with_config("mode", "strict");
    let load = Task::operation("load", "io.write").unwrap();

    flow.add_edge(&batch_size, &extract, Some("batch_size")).unwrap();
    flow.add_edge(&extract, &transform, Some("records")).unwrap();
    flow.add_edge(&transform, &load, Some("records")).unwrap();
    flow.add_edge(&extract, &load, None).unwrap();
    flow
}

#[test]
fn test_document_shape() {
    let flow = sample_flow();
    let document = flow.serialize().unwrap();

    assert_eq!(document.name, "nightly etl");
    assert_eq!(document.slug, "nightly-etl-2");
    assert_eq!(document.project, "analytics");
    assert_eq!(document.version.as_deref(), Some("2"));
    assert_eq!(document.executor_args.cluster.as_deref(), Some("tcp://10.0.0.7:8786"));
    assert!(document.serialized.is_some());
    assert_eq!(document.tasks.len(), 4);
    assert_eq!(document.edges.len(), 4);
    assert_eq!(document.parameters.len(), 1);
    assert!(!document.parameters["batch_size"].required);

    // sort_order is 1-based and consistent with edge direction
    let orders: HashSet<usize> = document.tasks.iter().map(|t| t.sort_order).collect();
    assert_eq!(orders, (1..=4).collect());
    let position = |name: &str| {
        document
            .tasks
            .iter()
            .find(|t| t.name == name)
            .map(|t| t.sort_order)
            .unwrap()
    };
    for edge in &document.edges {
        assert!(position(&edge.upstream_task) < position(&edge.downstream_task));
    }
}

#[test]
fn test_full_round_trip() {
    let flow = sample_flow();
    let document = flow.serialize().unwrap();
    let rebuilt = Flow::deserialize(&document).unwrap();

    assert_eq!(rebuilt, flow);
    assert_eq!(rebuilt.slug(), flow.slug());
    assert_eq!(rebuilt.schedule, flow.schedule);
    assert_eq!(rebuilt.cluster, flow.cluster);
    assert_eq!(rebuilt.parameters(false), flow.parameters(false));
    // the rebuilt flow carries operation config, not just shape
    assert_eq!(
        rebuilt
            .get_task("transform")
            .unwrap()
            .config()
            .and_then(|c| c.get("mode"))
            .and_then(Value::as_str),
        Some("strict")
    );
}

#[test]
fn test_safe_round_trip_reproduces_shape() {
    let flow = sample_flow();
    let document = flow.serialize().unwrap();
    let outline = FlowOutline::safe_deserialize(&document).unwrap();

    assert_eq!(outline.name, flow.name);
    assert_eq!(outline.slug(), flow.slug());
    assert_eq!(outline.schedule, flow.schedule);

    let names: Vec<&str> = outline.tasks().iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names.len(), 4);
    // tasks come back in dependency order
    let pos = |name: &str| names.iter().position(|n| *n == name).unwrap();
    for edge in outline.edges() {
        assert!(pos(&edge.upstream_task) < pos(&edge.downstream_task));
    }

    let slugs: HashSet<&str> = outline.tasks().iter().map(|t| t.slug.as_str()).collect();
    let expected: HashSet<String> =
        flow.tasks().map(|t| t.slug().to_string()).collect();
    let expected: HashSet<&str> = expected.iter().map(String::as_str).collect();
    assert_eq!(slugs, expected);

    // edges including keys survive
    let edge_set: HashSet<&Edge> = outline.edges().iter().collect();
    let original = flow.edges();
    let original_set: HashSet<&Edge> = original.iter().collect();
    assert_eq!(edge_set, original_set);

    // parameter metadata survives without any runnable surface
    assert_eq!(outline.parameters(false), flow.parameters(false));
    assert!(outline.parameters(true).is_empty());

    assert_eq!(outline.get_task("extract").unwrap().kind, "operation");
    assert_eq!(outline.get_task("batch_size").unwrap().kind, "parameter");

    let roots: Vec<&str> = outline.root_tasks().iter().map(|t| t.name.as_str()).collect();
    assert_eq!(roots, vec!["batch_size"]);
    let terminals: Vec<&str> = outline
        .terminal_tasks()
        .iter()
        .map(|t| t.name.as_str())
        .collect();
    assert_eq!(terminals, vec!["load"]);

    let upstream: HashSet<&str> = outline
        .upstream_tasks("load")
        .iter()
        .map(|t| t.name.as_str())
        .collect();
    assert_eq!(upstream, HashSet::from(["transform", "extract"]));
}

#[test]
fn test_redacted_document_crosses_the_boundary_safely() {
    let document = sample_flow().serialize().unwrap();
    let redacted = document.redacted();
    assert!(redacted.serialized.is_none());

    // the full path refuses a shape-only document
    assert!(matches!(
        Flow::deserialize(&redacted),
        Err(DocumentError::TrustBoundary)
    ));

    // the safe path never needed the payload in the first place
    let outline = FlowOutline::safe_deserialize(&redacted).unwrap();
    assert_eq!(outline.tasks().len(), 4);
}

#[test]
fn test_safe_path_rejects_unknown_edge_endpoints() {
    let mut document = sample_flow().serialize().unwrap();
    document.edges.push(Edge::new("ghost", "load", None));
    assert!(matches!(
        FlowOutline::safe_deserialize(&document),
        Err(DocumentError::Graph(GraphError::NotFound(name))) if name == "ghost"
    ));
}

#[test]
fn test_safe_path_rejects_duplicate_keys() {
    let mut document = sample_flow().serialize().unwrap();
    document
        .edges
        .push(Edge::new("batch_size", "load", Some("records".to_string())));
    assert!(matches!(
        FlowOutline::safe_deserialize(&document),
        Err(DocumentError::Graph(GraphError::DuplicateKey { .. }))
    ));
}

#[test]
fn test_safe_path_rejects_contradictory_sort_order() {
    let mut document = sample_flow().serialize().unwrap();
    // an edge running against the recorded order cannot describe a DAG
    document.edges.push(Edge::new("load", "extract", None));
    assert!(matches!(
        FlowOutline::safe_deserialize(&document),
        Err(DocumentError::Invalid(_))
    ));
}

#[test]
fn test_schedule_round_trip() {
    let cron = Schedule::Cron {
        expression: "*/5 * * * *".to_string(),
    };
    let wire = tidecore::schedules::serialize(&cron).unwrap();
    assert_eq!(tidecore::schedules::deserialize(&wire).unwrap(), cron);

    let wire = tidecore::schedules::serialize(&Schedule::Never).unwrap();
    assert_eq!(
        tidecore::schedules::deserialize(&wire).unwrap(),
        Schedule::Never
    );
}

#[test]
fn test_full_path_trusts_only_the_payload() {
    let flow = sample_flow();
    let mut document = flow.serialize().unwrap();
    // tampering with the metadata records does not affect the full path,
    // which trusts only the payload
    document.tasks.clear();
    document.edges.clear();
    let rebuilt = Flow::deserialize(&document).unwrap();
    assert_eq!(rebuilt, flow);
}
