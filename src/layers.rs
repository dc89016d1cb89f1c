use std::collections::HashMap;

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use tracing::{debug, warn};

use crate::error::{OrchestratorError, Result};
use crate::token::Token;

/// One node of the dependency graph handed to [`compute`].
#[derive(Debug, Clone)]
pub struct LayerNode {
    pub token: Token,
    pub dependencies: Vec<Token>,
}

impl LayerNode {
    pub fn new(token: Token, dependencies: Vec<Token>) -> Self {
        Self {
            token,
            dependencies,
        }
    }
}

/// Layer the dependency graph with Kahn's algorithm.
///
/// Each returned layer only depends on earlier layers, so its members are
/// safe to process concurrently. Ordering is deterministic: within a layer,
/// tokens appear in the same relative order as in `nodes`, never in
/// traversal or hash order.
///
/// Fails with `unknown-dependency` when an edge points at a token missing
/// from `nodes`, and with `cycle-detected` when nodes remain after the
/// graph is exhausted. O(V+E) time and space.
pub fn compute(nodes: &[LayerNode]) -> Result<Vec<Vec<Token>>> {
    let mut position: HashMap<&Token, usize> = HashMap::with_capacity(nodes.len());
    for (index, node) in nodes.iter().enumerate() {
        position.insert(&node.token, index);
    }

    // Node weights are input positions; edges run dependency -> dependent.
    let mut graph: DiGraph<usize, ()> = DiGraph::with_capacity(nodes.len(), nodes.len());
    let indices: Vec<NodeIndex> = (0..nodes.len()).map(|i| graph.add_node(i)).collect();

    for (index, node) in nodes.iter().enumerate() {
        for dependency in &node.dependencies {
            let dep_position = position.get(dependency).ok_or_else(|| {
                OrchestratorError::UnknownDependency {
                    dependent: node.token.description().to_string(),
                    dependency: dependency.description().to_string(),
                }
            })?;
            graph.add_edge(indices[*dep_position], indices[index], ());
        }
    }

    let mut in_degree: Vec<usize> = indices
        .iter()
        .map(|idx| graph.neighbors_directed(*idx, Direction::Incoming).count())
        .collect();

    // Seed the frontier in input order; node weights equal input positions,
    // so sorting by weight restores input order on every later frontier.
    let mut frontier: Vec<usize> = (0..nodes.len()).filter(|i| in_degree[*i] == 0).collect();
    let mut layers: Vec<Vec<Token>> = Vec::new();
    let mut resolved = 0usize;

    while !frontier.is_empty() {
        let mut next: Vec<usize> = Vec::new();
        for &node_position in &frontier {
            for neighbor in graph.neighbors_directed(indices[node_position], Direction::Outgoing) {
                let dependent = graph[neighbor];
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    next.push(dependent);
                }
            }
        }
        next.sort_unstable();

        resolved += frontier.len();
        layers.push(
            frontier
                .iter()
                .map(|&i| nodes[i].token.clone())
                .collect(),
        );
        frontier = next;
    }

    if resolved < nodes.len() {
        let blocked: Vec<String> = (0..nodes.len())
            .filter(|i| in_degree[*i] > 0)
            .map(|i| nodes[i].token.description().to_string())
            .collect();
        return Err(OrchestratorError::CycleDetected { tokens: blocked });
    }

    debug!(layers = layers.len(), nodes = nodes.len(), "computed dependency layers");
    Ok(layers)
}

/// Bucket an arbitrary token subset by the layer each token belongs to and
/// return the buckets in descending layer order.
///
/// Inside each bucket the subset's original relative order is preserved.
/// This yields safe reverse-teardown batches for any subset of a layering,
/// e.g. "everything currently started". Tokens absent from `layers` are
/// skipped.
pub fn group(tokens: &[Token], layers: &[Vec<Token>]) -> Vec<Vec<Token>> {
    let mut layer_of: HashMap<&Token, usize> = HashMap::new();
    for (layer_index, layer) in layers.iter().enumerate() {
        for token in layer {
            layer_of.insert(token, layer_index);
        }
    }

    let mut buckets: Vec<Vec<Token>> = vec![Vec::new(); layers.len()];
    for token in tokens {
        match layer_of.get(token) {
            Some(layer_index) => buckets[*layer_index].push(token.clone()),
            None => warn!(token = %token, "token not present in layering, skipping"),
        }
    }

    buckets
        .into_iter()
        .rev()
        .filter(|bucket| !bucket.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn node(token: &Token, deps: &[&Token]) -> LayerNode {
        LayerNode::new(token.clone(), deps.iter().map(|t| (*t).clone()).collect())
    }

    #[test]
    fn empty_graph() {
        assert_eq!(compute(&[]).unwrap(), Vec::<Vec<Token>>::new());
    }

    #[test]
    fn diamond_layers() {
        let a = Token::new("a");
        let b = Token::new("b");
        let c = Token::new("c");
        let d = Token::new("d");
        let layers = compute(&[
            node(&a, &[]),
            node(&b, &[&a]),
            node(&c, &[&a]),
            node(&d, &[&b, &c]),
        ])
        .unwrap();

        assert_eq!(
            layers,
            vec![vec![a], vec![b, c], vec![d]]
        );
    }

    #[test]
    fn every_token_layered_after_its_dependencies() {
        let tokens: Vec<Token> = (0..6).map(|i| Token::new(format!("t{i}"))).collect();
        let nodes = vec![
            node(&tokens[0], &[]),
            node(&tokens[1], &[&tokens[0]]),
            node(&tokens[2], &[&tokens[0], &tokens[1]]),
            node(&tokens[3], &[]),
            node(&tokens[4], &[&tokens[2], &tokens[3]]),
            node(&tokens[5], &[&tokens[4]]),
        ];
        let layers = compute(&nodes).unwrap();

        let layer_of = |t: &Token| layers.iter().position(|l| l.contains(t)).unwrap();
        for n in &nodes {
            for dep in &n.dependencies {
                assert!(layer_of(&n.token) > layer_of(dep));
            }
        }
    }

    #[test]
    fn intra_layer_order_follows_input_order() {
        let root = Token::new("root");
        let z = Token::new("z");
        let m = Token::new("m");
        let a = Token::new("a");
        // z, m, a all become ready at the same step; input order must win.
        let layers = compute(&[
            node(&z, &[&root]),
            node(&m, &[&root]),
            node(&root, &[]),
            node(&a, &[&root]),
        ])
        .unwrap();

        assert_eq!(layers, vec![vec![root], vec![z, m, a]]);
    }

    #[test]
    fn deterministic_across_runs() {
        let tokens: Vec<Token> = (0..8).map(|i| Token::new(format!("t{i}"))).collect();
        let nodes: Vec<LayerNode> = tokens
            .iter()
            .enumerate()
            .map(|(i, t)| {
                let deps = if i >= 2 { vec![tokens[i - 2].clone()] } else { vec![] };
                LayerNode::new(t.clone(), deps)
            })
            .collect();

        assert_eq!(compute(&nodes).unwrap(), compute(&nodes).unwrap());
    }

    #[test]
    fn unknown_dependency_names_both_sides() {
        let a = Token::new("server");
        let missing = Token::new("db");
        let err = compute(&[node(&a, &[&missing])]).unwrap_err();
        assert_eq!(err.code(), "unknown-dependency");
        let msg = err.to_string();
        assert!(msg.contains("server") && msg.contains("db"));
    }

    #[test]
    fn cycle_detected() {
        let a = Token::new("a");
        let b = Token::new("b");
        let err = compute(&[node(&a, &[&b]), node(&b, &[&a])]).unwrap_err();
        assert_eq!(err.code(), "cycle-detected");
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let a = Token::new("a");
        let err = compute(&[node(&a, &[&a])]).unwrap_err();
        assert_eq!(err.code(), "cycle-detected");
    }

    #[test]
    fn group_reverses_layers_and_keeps_subset_order() {
        let a = Token::new("a");
        let b = Token::new("b");
        let c = Token::new("c");
        let d = Token::new("d");
        let layers = vec![vec![a.clone()], vec![b.clone(), c.clone()], vec![d.clone()]];

        let batches = group(&[a.clone(), b.clone(), c.clone(), d.clone()], &layers);
        assert_eq!(
            batches,
            vec![vec![d], vec![b, c], vec![a]]
        );
    }

    #[test]
    fn group_skips_unknown_and_empty_buckets() {
        let a = Token::new("a");
        let b = Token::new("b");
        let stranger = Token::new("stranger");
        let layers = vec![vec![a.clone()], vec![b.clone()]];

        let batches = group(&[a.clone(), stranger], &layers);
        assert_eq!(batches, vec![vec![a]]);
    }
}
