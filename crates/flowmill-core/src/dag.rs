// DAG construction and validation
//
// A workflow spec is a JSON document with a `nodes` array. Construction
// ingests nodes (rejecting duplicates), builds forward and reverse adjacency,
// verifies every dependency target exists, then runs Kahn's algorithm over
// in-degrees to reject cycles. The zero-in-degree frontier is drained in id
// order, which makes `topological_sort` deterministic.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{Result, WorkflowError};

/// Immutable node definition used during validation and traversal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDefinition {
    pub id: String,
    pub handler: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default = "empty_config")]
    pub config: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

fn empty_config() -> Value {
    Value::Object(serde_json::Map::new())
}

#[derive(Debug, Deserialize)]
struct DagSpec {
    #[serde(default)]
    nodes: Vec<NodeDefinition>,
}

/// Validated DAG structure with adjacency in both directions
#[derive(Debug, Clone, Default)]
pub struct Dag {
    nodes: BTreeMap<String, NodeDefinition>,
    adjacency: BTreeMap<String, BTreeSet<String>>,
    reverse_adjacency: BTreeMap<String, BTreeSet<String>>,
}

impl Dag {
    /// Parse, build, and validate a DAG from a raw JSON spec
    pub fn from_value(data: &Value) -> Result<Dag> {
        let spec: DagSpec = serde_json::from_value(data.clone())
            .map_err(|e| WorkflowError::InvalidWorkflow(format!("malformed dag spec: {e}")))?;

        if spec.nodes.is_empty() {
            return Err(WorkflowError::EmptyWorkflow);
        }

        let mut dag = Dag::default();
        for node in spec.nodes {
            if dag.nodes.contains_key(&node.id) {
                return Err(WorkflowError::DuplicateNodeId(node.id));
            }
            dag.nodes.insert(node.id.clone(), node);
        }

        dag.build_adjacency();
        dag.validate_references()?;
        dag.detect_cycles()?;

        Ok(dag)
    }

    fn build_adjacency(&mut self) {
        for (node_id, node) in &self.nodes {
            for dep in &node.dependencies {
                self.adjacency
                    .entry(dep.clone())
                    .or_default()
                    .insert(node_id.clone());
                self.reverse_adjacency
                    .entry(node_id.clone())
                    .or_default()
                    .insert(dep.clone());
            }
        }
    }

    fn validate_references(&self) -> Result<()> {
        for (node_id, node) in &self.nodes {
            for dep in &node.dependencies {
                if !self.nodes.contains_key(dep) {
                    return Err(WorkflowError::InvalidNodeReference {
                        node_id: node_id.clone(),
                        missing_dependency: dep.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Kahn's algorithm: iteratively remove zero in-degree nodes; any residue
    /// with positive in-degree names the cycle.
    fn detect_cycles(&self) -> Result<()> {
        let mut in_degree = self.in_degrees();

        let mut frontier: BTreeSet<String> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(n, _)| n.clone())
            .collect();
        let mut visited = 0usize;

        while let Some(current) = frontier.pop_first() {
            visited += 1;
            if let Some(dependents) = self.adjacency.get(&current) {
                for neighbor in dependents {
                    let degree = in_degree.get_mut(neighbor).expect("neighbor in dag");
                    *degree -= 1;
                    if *degree == 0 {
                        frontier.insert(neighbor.clone());
                    }
                }
            }
        }

        if visited != self.nodes.len() {
            let cycle: Vec<String> = self
                .nodes
                .keys()
                .filter(|n| in_degree.get(*n).copied().unwrap_or(0) > 0)
                .cloned()
                .collect();
            return Err(WorkflowError::CyclicDependency(cycle));
        }
        Ok(())
    }

    fn in_degrees(&self) -> BTreeMap<String, usize> {
        self.nodes
            .keys()
            .map(|n| {
                let deg = self.reverse_adjacency.get(n).map(|d| d.len()).unwrap_or(0);
                (n.clone(), deg)
            })
            .collect()
    }

    /// Node lookup by id
    pub fn node(&self, node_id: &str) -> Option<&NodeDefinition> {
        self.nodes.get(node_id)
    }

    /// All nodes, keyed by id
    pub fn nodes(&self) -> &BTreeMap<String, NodeDefinition> {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes with no dependencies, in id order
    pub fn root_nodes(&self) -> Vec<String> {
        self.nodes
            .iter()
            .filter(|(_, node)| node.dependencies.is_empty())
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Direct downstream nodes of `node_id`
    pub fn dependents(&self, node_id: &str) -> BTreeSet<String> {
        self.adjacency.get(node_id).cloned().unwrap_or_default()
    }

    /// Declared dependencies of `node_id` (declaration order)
    pub fn dependencies(&self, node_id: &str) -> &[String] {
        self.nodes
            .get(node_id)
            .map(|n| n.dependencies.as_slice())
            .unwrap_or(&[])
    }

    /// Deterministic topological order: drain the zero-in-degree frontier,
    /// siblings ordered by id.
    pub fn topological_sort(&self) -> Vec<String> {
        let mut in_degree = self.in_degrees();
        let mut frontier: BTreeSet<String> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(n, _)| n.clone())
            .collect();
        let mut result = Vec::with_capacity(self.nodes.len());

        while let Some(current) = frontier.pop_first() {
            if let Some(dependents) = self.adjacency.get(&current) {
                for neighbor in dependents {
                    let degree = in_degree.get_mut(neighbor).expect("neighbor in dag");
                    *degree -= 1;
                    if *degree == 0 {
                        frontier.insert(neighbor.clone());
                    }
                }
            }
            result.push(current);
        }

        result
    }
}
