//! Compilation of graph text into a [`Pipeline`].

use super::dot::{self, DotGraph};
use crate::errors::{CycleDetectedError, PipelineError, PipelineResult};
use crate::params::variable_references;
use crate::tasks::{Task, TaskDependency};
use crate::vars::INPUT_VAR;
use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashSet, VecDeque};
use std::fmt;
use std::str::FromStr;

/// A compiled, acyclic task graph.
///
/// Tasks are stored in topological order and a task's id is its position, so
/// every producer has a smaller id than each of its consumers. The source text
/// is kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    tasks: Vec<Task>,
    source: String,
}

impl Pipeline {
    /// Compiles graph text.
    ///
    /// # Errors
    ///
    /// Returns a [`PipelineError`] if the text is malformed, contains a cycle,
    /// uses the reserved `input` name, or declares an unknown task type or
    /// attribute. No partial pipeline is ever returned.
    pub fn parse(text: &str) -> PipelineResult<Self> {
        let graph = dot::parse(text)?;
        let edges = collect_edges(&graph);

        check_acyclic(&graph, &edges)?;
        let order = stable_topological_order(graph.nodes.len(), &edges);

        if graph.position(INPUT_VAR).is_some() {
            return Err(PipelineError::ReservedName(INPUT_VAR.to_string()));
        }

        let mut id_of = vec![0; order.len()];
        for (id, &pos) in order.iter().enumerate() {
            id_of[pos] = id;
        }

        let mut tasks = order
            .iter()
            .enumerate()
            .map(|(id, &pos)| {
                let node = &graph.nodes[pos];
                Task::from_attributes(id, &node.id, &node.attrs)
            })
            .collect::<PipelineResult<Vec<_>>>()?;

        for (&(from, to), &propagate_result) in &edges {
            let (producer, consumer) = (id_of[from], id_of[to]);
            tasks[producer].base_mut().outputs.push(consumer);
            tasks[consumer].base_mut().inputs.push(TaskDependency {
                propagate_result,
                input_task: producer,
            });
        }
        for task in &mut tasks {
            let base = task.base_mut();
            base.outputs.sort_unstable();
            base.inputs.sort_by_key(|dep| dep.input_task);
        }

        tracing::debug!(tasks = tasks.len(), edges = edges.len(), "compiled pipeline");

        Ok(Self {
            tasks,
            source: text.to_string(),
        })
    }

    /// The text this pipeline was compiled from, unchanged.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Tasks in id order.
    #[must_use]
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// Returns a task by id.
    #[must_use]
    pub fn task(&self, id: usize) -> Option<&Task> {
        self.tasks.get(id)
    }

    /// Returns a task by node name.
    #[must_use]
    pub fn task_by_dot_id(&self, dot_id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.dot_id() == dot_id)
    }

    /// Number of tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Returns true if the graph has no tasks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Tasks without consumers; their results form the run's final result.
    pub fn terminal_tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter().filter(|t| t.outputs().is_empty())
    }
}

/// Explicit edges propagate results; `$(name)` references in attributes add
/// ordering-only edges unless an explicit edge already links the two nodes.
fn collect_edges(graph: &DotGraph) -> BTreeMap<(usize, usize), bool> {
    let mut edges: BTreeMap<(usize, usize), bool> =
        graph.edges.iter().map(|&edge| (edge, true)).collect();

    for (to, node) in graph.nodes.iter().enumerate() {
        for value in node.attrs.values() {
            for keypath in variable_references(value) {
                let name = keypath.split('.').next().unwrap_or_default();
                if let Some(from) = graph.position(name) {
                    if from != to {
                        edges.entry((from, to)).or_insert(false);
                    }
                }
            }
        }
    }

    edges
}

fn check_acyclic(
    graph: &DotGraph,
    edges: &BTreeMap<(usize, usize), bool>,
) -> Result<(), CycleDetectedError> {
    let mut g: DiGraph<usize, ()> = DiGraph::with_capacity(graph.nodes.len(), edges.len());
    for pos in 0..graph.nodes.len() {
        g.add_node(pos);
    }
    for &(from, to) in edges.keys() {
        g.add_edge(NodeIndex::new(from), NodeIndex::new(to), ());
    }

    match toposort(&g, None) {
        Ok(_) => Ok(()),
        Err(cycle) => {
            let start = cycle.node_id();
            let component: HashSet<NodeIndex> = tarjan_scc(&g)
                .into_iter()
                .find(|scc| scc.contains(&start))
                .unwrap_or_default()
                .into_iter()
                .collect();
            let path = cycle_path(&g, start, &component)
                .into_iter()
                .map(|ix| graph.nodes[g[ix]].id.clone())
                .collect();
            Err(CycleDetectedError::new(path))
        }
    }
}

/// Shortest walk from `start` back to itself inside its component.
fn cycle_path(
    g: &DiGraph<usize, ()>,
    start: NodeIndex,
    component: &HashSet<NodeIndex>,
) -> Vec<NodeIndex> {
    let mut parent: BTreeMap<NodeIndex, NodeIndex> = BTreeMap::new();
    let mut queue = VecDeque::from([start]);

    while let Some(node) = queue.pop_front() {
        for next in g.neighbors(node) {
            if next == start {
                let mut path = vec![start, node];
                let mut cur = node;
                while let Some(&p) = parent.get(&cur) {
                    path.push(p);
                    cur = p;
                }
                path.reverse();
                return path;
            }
            if component.contains(&next) && next != start && !parent.contains_key(&next) {
                parent.insert(next, node);
                queue.push_back(next);
            }
        }
    }

    vec![start]
}

/// Kahn's algorithm; among ready nodes the earliest declared goes first.
fn stable_topological_order(len: usize, edges: &BTreeMap<(usize, usize), bool>) -> Vec<usize> {
    let mut in_degree = vec![0usize; len];
    let mut successors = vec![Vec::new(); len];
    for &(from, to) in edges.keys() {
        in_degree[to] += 1;
        successors[from].push(to);
    }

    let mut ready: BinaryHeap<Reverse<usize>> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, &d)| d == 0)
        .map(|(pos, _)| Reverse(pos))
        .collect();

    let mut order = Vec::with_capacity(len);
    while let Some(Reverse(pos)) = ready.pop() {
        order.push(pos);
        for &next in &successors[pos] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                ready.push(Reverse(next));
            }
        }
    }
    order
}

impl FromStr for Pipeline {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl Serialize for Pipeline {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.source)
    }
}

impl<'de> Deserialize<'de> for Pipeline {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let source = String::deserialize(deserializer)?;
        Self::parse(&source).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::TaskType;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn dot_ids(p: &Pipeline) -> Vec<&str> {
        p.tasks().iter().map(Task::dot_id).collect()
    }

    #[test]
    fn test_compile_links_tasks() {
        let p = Pipeline::parse(
            r#"
            // fetch then scale
            a [type=memo value="1.5"];
            b [type=multiply times=2];
            a -> b;
            "#,
        )
        .unwrap();

        assert_eq!(dot_ids(&p), vec!["a", "b"]);
        let b = p.task_by_dot_id("b").unwrap();
        assert_eq!(b.task_type(), TaskType::Multiply);
        assert_eq!(
            b.inputs(),
            &[TaskDependency {
                propagate_result: true,
                input_task: 0
            }]
        );
        assert_eq!(p.task(0).unwrap().outputs(), &[1]);
        assert_eq!(p.terminal_tasks().map(Task::id).collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn test_ordering_is_topological_then_declaration() {
        let p = Pipeline::parse(
            "c [type=sum]; b [type=sum]; a [type=sum]; x [type=sum]; a -> c; b -> c",
        )
        .unwrap();
        assert_eq!(dot_ids(&p), vec!["b", "a", "c", "x"]);
        assert_eq!(
            p.task_by_dot_id("c").unwrap().inputs().iter().map(|d| d.input_task).collect::<Vec<_>>(),
            vec![0, 1]
        );
    }

    #[test]
    fn test_cycle_is_rejected() {
        let err = Pipeline::parse("a [type=sum]; b [type=sum]; c [type=sum]; a -> b -> c -> a")
            .unwrap_err();
        let PipelineError::CycleDetected(CycleDetectedError { cycle_path }) = err else {
            panic!("expected cycle error, got {err:?}");
        };
        assert_eq!(cycle_path.len(), 4);
        assert_eq!(cycle_path.first(), cycle_path.last());
        for name in ["a", "b", "c"] {
            assert!(cycle_path.iter().any(|n| n == name));
        }
    }

    #[test]
    fn test_self_loop_is_a_cycle() {
        let err = Pipeline::parse("a [type=sum]; a -> a").unwrap_err();
        assert_eq!(
            err,
            PipelineError::CycleDetected(CycleDetectedError::new(vec![
                "a".to_string(),
                "a".to_string()
            ]))
        );
    }

    #[test]
    fn test_cycle_through_variable_reference() {
        let err = Pipeline::parse(
            r#"a [type=memo value="$(b)"]; b [type=sum]; a -> b"#,
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::CycleDetected(_)));
    }

    #[test]
    fn test_input_is_reserved() {
        let err = Pipeline::parse("input [type=sum]").unwrap_err();
        assert_eq!(err, PipelineError::ReservedName("input".to_string()));

        let err = Pipeline::parse("a [type=sum]; a -> input").unwrap_err();
        assert_eq!(err, PipelineError::ReservedName("input".to_string()));
    }

    #[test]
    fn test_variable_references_add_ordering_edges() {
        let p = Pipeline::parse(
            r#"
            b [type=multiply input="$(a)" times="$(input.scale)"];
            a [type=memo value="2"];
            c [type=memo value=<{"x": $(a.y), "self": $(c)}>];
            a -> c;
            "#,
        )
        .unwrap();

        assert_eq!(dot_ids(&p), vec!["a", "b", "c"]);
        assert_eq!(
            p.task_by_dot_id("b").unwrap().inputs(),
            &[TaskDependency {
                propagate_result: false,
                input_task: 0
            }]
        );
        assert_eq!(
            p.task_by_dot_id("c").unwrap().inputs(),
            &[TaskDependency {
                propagate_result: true,
                input_task: 0
            }]
        );
        assert_eq!(p.task(0).unwrap().outputs(), &[1, 2]);
    }

    #[test]
    fn test_compile_errors_are_whole() {
        let err = Pipeline::parse("a [type=sum]; b [type=teleport]; a -> b").unwrap_err();
        assert_eq!(err, PipelineError::unknown_task_type("b", "teleport"));

        let err = Pipeline::parse("a [type=sum retries=lots]").unwrap_err();
        assert!(matches!(err, PipelineError::InvalidAttribute { .. }));

        let err = Pipeline::parse("a [type=sum").unwrap_err();
        assert!(matches!(err, PipelineError::Parse(_)));
    }

    #[test]
    fn test_empty_graph() {
        assert!(Pipeline::parse("").unwrap().is_empty());
        assert!(Pipeline::parse("digraph {}").unwrap().is_empty());
    }

    #[test]
    fn test_source_is_kept_verbatim() {
        let text = "\n  a [type=memo value=<{\"k\": 1}>]  // note\n\tb [type=sum]\n a->b\n";
        let p: Pipeline = text.parse().unwrap();
        assert_eq!(p.source(), text);
        assert_eq!(p.to_string(), text);

        let json = serde_json::to_string(&p).unwrap();
        let back: Pipeline = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
        assert_eq!(back.source(), text);

        assert!(serde_json::from_str::<Pipeline>(r#""a -> a""#).is_err());
    }

    fn dag() -> impl Strategy<Value = (usize, Vec<bool>, Vec<usize>)> {
        (1usize..10).prop_flat_map(|n| {
            (
                Just(n),
                proptest::collection::vec(any::<bool>(), n * n),
                Just((0..n).collect::<Vec<_>>()).prop_shuffle(),
            )
        })
    }

    proptest! {
        #[test]
        fn prop_producers_precede_consumers((n, mask, declared) in dag()) {
            let mut text = String::new();
            for i in &declared {
                text.push_str(&format!("n{i} [type=sum];\n"));
            }
            for i in 0..n {
                for j in (i + 1)..n {
                    if mask[i * n + j] {
                        text.push_str(&format!("n{i} -> n{j};\n"));
                    }
                }
            }

            let p = Pipeline::parse(&text).unwrap();
            prop_assert_eq!(p.len(), n);
            for task in p.tasks() {
                for dep in task.inputs() {
                    prop_assert!(dep.input_task < task.id());
                }
                for &out in task.outputs() {
                    prop_assert!(out > task.id());
                }
            }
        }
    }
}
