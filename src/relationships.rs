//! Relationship graph: direct FK edges and BFS multi-hop join paths.
//!
//! Direct edges come from the parsed artifacts (`hop_count = 1`). Multi-hop
//! paths are computed by BFS over a bidirectional adjacency map, capped at a
//! configurable hop count, and stored as `computed` relationships with a
//! generated multi-join expression and decaying confidence.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use crate::parse::FkEdge;

/// A relationship row as stored in the index.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationshipRow {
    pub database: String,
    pub source_schema: String,
    pub source_table: String,
    pub source_column: String,
    pub target_schema: String,
    pub target_table: String,
    pub target_column: String,
    pub relationship_type: String,
    pub hop_count: u32,
    pub join_expression: String,
    pub confidence: f64,
}

/// `max(0.1, 1.0 − 0.15·(hop_count−1))`
pub fn multi_hop_confidence(hop_count: u32) -> f64 {
    (1.0 - 0.15 * (hop_count.saturating_sub(1)) as f64).max(0.1)
}

/// Single-hop join expression for a direct edge.
pub fn single_hop_join(edge: &FkEdge) -> String {
    format!(
        "JOIN {}.{} ON {}.{}.{} = {}.{}.{}",
        edge.target_schema,
        edge.target_table,
        edge.source_schema,
        edge.source_table,
        edge.source_column,
        edge.target_schema,
        edge.target_table,
        edge.target_column
    )
}

/// Build all relationship rows for one database: deduplicated direct edges
/// plus BFS multi-hop paths between every ordered pair of distinct tables.
pub fn build_relationships(edges: &[FkEdge], max_hops: u32) -> Vec<RelationshipRow> {
    let mut rows = Vec::new();
    let mut seen_direct: HashSet<(String, String, String, String, String, String)> = HashSet::new();

    for edge in edges {
        let key = (
            edge.source_schema.clone(),
            edge.source_table.clone(),
            edge.source_column.clone(),
            edge.target_schema.clone(),
            edge.target_table.clone(),
            edge.target_column.clone(),
        );
        if !seen_direct.insert(key) {
            continue;
        }
        rows.push(RelationshipRow {
            database: edge.database.clone(),
            source_schema: edge.source_schema.clone(),
            source_table: edge.source_table.clone(),
            source_column: edge.source_column.clone(),
            target_schema: edge.target_schema.clone(),
            target_table: edge.target_table.clone(),
            target_column: edge.target_column.clone(),
            relationship_type: if (edge.confidence - 1.0).abs() < f64::EPSILON {
                "foreign_key".to_string()
            } else {
                "documented".to_string()
            },
            hop_count: 1,
            join_expression: single_hop_join(edge),
            confidence: edge.confidence,
        });
    }

    rows.extend(compute_multi_hop(edges, max_hops));
    rows
}

/// Qualified table name used as a graph node.
fn node(schema: &str, table: &str) -> String {
    format!("{}.{}", schema, table)
}

/// BFS multi-hop paths of length 2..=max_hops between every ordered pair of
/// distinct tables. Only the shortest path per pair is stored.
pub fn compute_multi_hop(edges: &[FkEdge], max_hops: u32) -> Vec<RelationshipRow> {
    // Bidirectional adjacency: traversing an edge backwards still joins the
    // same pair of columns.
    let mut adjacency: BTreeMap<String, Vec<&FkEdge>> = BTreeMap::new();
    let mut reverse: HashMap<String, Vec<&FkEdge>> = HashMap::new();
    let mut tables: HashSet<String> = HashSet::new();
    for edge in edges {
        let source = node(&edge.source_schema, &edge.source_table);
        let target = node(&edge.target_schema, &edge.target_table);
        tables.insert(source.clone());
        tables.insert(target.clone());
        adjacency.entry(source).or_default().push(edge);
        reverse.entry(target).or_default().push(edge);
    }

    let mut sorted_tables: Vec<&String> = tables.iter().collect();
    sorted_tables.sort();

    let mut rows = Vec::new();
    for source in &sorted_tables {
        for target in &sorted_tables {
            if source == target {
                continue;
            }
            if let Some(path) = bfs_path(source, target, &adjacency, &reverse, max_hops) {
                if path.len() > 1 {
                    rows.push(path_to_row(&path));
                }
            }
        }
    }
    rows
}

/// One traversed step: the edge plus the direction it was walked in.
#[derive(Clone, Copy)]
struct Step<'a> {
    edge: &'a FkEdge,
    forward: bool,
}

impl Step<'_> {
    fn from_node(&self) -> String {
        if self.forward {
            node(&self.edge.source_schema, &self.edge.source_table)
        } else {
            node(&self.edge.target_schema, &self.edge.target_table)
        }
    }

    fn to_node(&self) -> String {
        if self.forward {
            node(&self.edge.target_schema, &self.edge.target_table)
        } else {
            node(&self.edge.source_schema, &self.edge.source_table)
        }
    }
}

fn bfs_path<'a>(
    source: &str,
    target: &str,
    adjacency: &BTreeMap<String, Vec<&'a FkEdge>>,
    reverse: &HashMap<String, Vec<&'a FkEdge>>,
    max_hops: u32,
) -> Option<Vec<Step<'a>>> {
    let mut queue: VecDeque<(String, Vec<Step<'a>>)> = VecDeque::new();
    let mut visited: HashSet<String> = HashSet::new();
    queue.push_back((source.to_string(), Vec::new()));
    visited.insert(source.to_string());

    while let Some((current, path)) = queue.pop_front() {
        if path.len() as u32 >= max_hops {
            continue;
        }
        let mut steps: Vec<Step<'a>> = Vec::new();
        for edge in adjacency.get(&current).into_iter().flatten() {
            steps.push(Step { edge, forward: true });
        }
        for edge in reverse.get(&current).into_iter().flatten() {
            steps.push(Step { edge, forward: false });
        }

        for step in steps {
            let next = step.to_node();
            debug_assert_eq!(step.from_node(), current);
            if next == target {
                let mut full = path.clone();
                full.push(step);
                return Some(full);
            }
            if visited.insert(next.clone()) {
                let mut full = path.clone();
                full.push(step);
                queue.push_back((next, full));
            }
        }
    }
    None
}

/// Convert a BFS path into a stored `computed` relationship row with a
/// generated multi-join expression.
fn path_to_row(path: &[Step<'_>]) -> RelationshipRow {
    let first = path.first().expect("path has at least two steps");
    let last = path.last().expect("path has at least two steps");

    let (source_schema, source_table, source_column) = if first.forward {
        (
            first.edge.source_schema.clone(),
            first.edge.source_table.clone(),
            first.edge.source_column.clone(),
        )
    } else {
        (
            first.edge.target_schema.clone(),
            first.edge.target_table.clone(),
            first.edge.target_column.clone(),
        )
    };
    let (target_schema, target_table, target_column) = if last.forward {
        (
            last.edge.target_schema.clone(),
            last.edge.target_table.clone(),
            last.edge.target_column.clone(),
        )
    } else {
        (
            last.edge.source_schema.clone(),
            last.edge.source_table.clone(),
            last.edge.source_column.clone(),
        )
    };

    let mut join = String::new();
    for step in path {
        let clause = format!(
            "JOIN {} ON {}.{}.{} = {}.{}.{}",
            step.to_node(),
            step.edge.source_schema,
            step.edge.source_table,
            step.edge.source_column,
            step.edge.target_schema,
            step.edge.target_table,
            step.edge.target_column
        );
        if !join.is_empty() {
            join.push(' ');
        }
        join.push_str(&clause);
    }

    let hop_count = path.len() as u32;
    RelationshipRow {
        database: first.edge.database.clone(),
        source_schema,
        source_table,
        source_column,
        target_schema,
        target_table,
        target_column,
        relationship_type: "computed".to_string(),
        hop_count,
        join_expression: join,
        confidence: multi_hop_confidence(hop_count),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge(source: &str, column: &str, target: &str) -> FkEdge {
        FkEdge {
            database: "demo".into(),
            source_schema: "main".into(),
            source_table: source.into(),
            source_column: column.into(),
            target_schema: "main".into(),
            target_table: target.into(),
            target_column: "id".into(),
            confidence: 1.0,
        }
    }

    #[test]
    fn confidence_decays_with_hops_and_floors() {
        assert!((multi_hop_confidence(2) - 0.85).abs() < 1e-9);
        assert!((multi_hop_confidence(3) - 0.70).abs() < 1e-9);
        assert!((multi_hop_confidence(10) - 0.1).abs() < 1e-9);
    }

    #[test]
    fn direct_edges_become_single_hop_rows() {
        let edges = vec![edge("orders", "user_id", "users")];
        let rows = build_relationships(&edges, 3);
        let direct: Vec<_> = rows.iter().filter(|r| r.hop_count == 1).collect();
        assert_eq!(direct.len(), 1);
        assert_eq!(direct[0].relationship_type, "foreign_key");
        assert!(direct[0].join_expression.contains("main.orders.user_id = main.users.id"));
    }

    #[test]
    fn documented_edges_keep_their_confidence() {
        let mut e = edge("orders", "user_id", "users");
        e.confidence = 0.9;
        let rows = build_relationships(&[e], 3);
        let direct = rows.iter().find(|r| r.hop_count == 1).unwrap();
        assert_eq!(direct.relationship_type, "documented");
        assert!((direct.confidence - 0.9).abs() < 1e-9);
    }

    #[test]
    fn two_hop_path_through_join_table() {
        // order_items -> orders -> users
        let edges = vec![
            edge("order_items", "order_id", "orders"),
            edge("orders", "user_id", "users"),
        ];
        let rows = compute_multi_hop(&edges, 3);
        let path = rows
            .iter()
            .find(|r| r.source_table == "order_items" && r.target_table == "users")
            .unwrap();
        assert_eq!(path.hop_count, 2);
        assert_eq!(path.relationship_type, "computed");
        assert!((path.confidence - 0.85).abs() < 1e-9);
        assert!(path.join_expression.contains("JOIN main.orders"));
        assert!(path.join_expression.contains("JOIN main.users"));
    }

    #[test]
    fn multi_hop_works_against_edge_direction() {
        // users <- orders <- order_items: path users -> order_items exists
        // because adjacency is bidirectional.
        let edges = vec![
            edge("order_items", "order_id", "orders"),
            edge("orders", "user_id", "users"),
        ];
        let rows = compute_multi_hop(&edges, 3);
        assert!(rows
            .iter()
            .any(|r| r.source_table == "users" && r.target_table == "order_items"));
    }

    #[test]
    fn hop_cap_is_enforced() {
        // a -> b -> c -> d -> e: a..e is 4 hops, beyond the cap of 3.
        let edges = vec![
            edge("a", "b_id", "b"),
            edge("b", "c_id", "c"),
            edge("c", "d_id", "d"),
            edge("d", "e_id", "e"),
        ];
        let rows = compute_multi_hop(&edges, 3);
        assert!(rows.iter().all(|r| r.hop_count >= 2 && r.hop_count <= 3));
        assert!(!rows.iter().any(|r| r.source_table == "a" && r.target_table == "e"));
        assert!(rows.iter().any(|r| r.source_table == "a" && r.target_table == "d"));
    }

    #[test]
    fn no_path_between_disconnected_components() {
        let edges = vec![edge("a", "b_id", "b"), edge("x", "y_id", "y")];
        let rows = compute_multi_hop(&edges, 3);
        assert!(!rows.iter().any(|r| r.source_table == "a" && r.target_table == "y"));
    }

    #[test]
    fn duplicate_direct_edges_deduplicated() {
        let edges = vec![edge("orders", "user_id", "users"), edge("orders", "user_id", "users")];
        let rows = build_relationships(&edges, 3);
        assert_eq!(rows.iter().filter(|r| r.hop_count == 1).count(), 1);
    }
}
