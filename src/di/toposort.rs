//! Stable topological ordering over indexed nodes.
//!
//! Shared by the initializer orderer and the interceptor chain. Nodes are
//! identified by their registration index; among the nodes that are ready at
//! any point, the lowest index goes first, so the output only depends on the
//! registration order and the declared edges.

use std::collections::BTreeSet;

/// Sorts `node_count` nodes so that for every edge `(from, to)`, `from` comes first.
///
/// On failure returns the nodes of one cycle, closed (first == last).
pub(crate) fn toposort(node_count: usize, edges: &[(usize, usize)]) -> Result<Vec<usize>, Vec<usize>> {
    let mut successors: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); node_count];
    for &(from, to) in edges {
        successors[from].insert(to);
    }

    let mut in_degree = vec![0usize; node_count];
    for targets in &successors {
        for &to in targets {
            in_degree[to] += 1;
        }
    }

    let mut ready: BTreeSet<usize> = (0..node_count).filter(|&n| in_degree[n] == 0).collect();
    let mut order = Vec::with_capacity(node_count);

    while let Some(node) = ready.pop_first() {
        order.push(node);
        for &next in &successors[node] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                ready.insert(next);
            }
        }
    }

    if order.len() == node_count {
        return Ok(order);
    }

    Err(find_cycle(&successors, &in_degree))
}

fn find_cycle(successors: &[BTreeSet<usize>], in_degree: &[usize]) -> Vec<usize> {
    let remaining: Vec<usize> = (0..in_degree.len()).filter(|&n| in_degree[n] > 0).collect();

    // Every remaining node still has a remaining predecessor, so walking
    // predecessors must eventually revisit a node.
    let predecessor = |node: usize| {
        remaining
            .iter()
            .copied()
            .find(|&candidate| successors[candidate].contains(&node))
    };

    let mut walk = Vec::new();
    let mut cursor = remaining[0];
    loop {
        if let Some(pos) = walk.iter().position(|&n| n == cursor) {
            let mut cycle: Vec<usize> = walk[pos..].to_vec();
            cycle.reverse();
            cycle.push(cycle[0]);
            return cycle;
        }
        walk.push(cursor);
        match predecessor(cursor) {
            Some(prev) => cursor = prev,
            None => return remaining,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(order: &[usize], node: usize) -> usize {
        order.iter().position(|&n| n == node).unwrap()
    }

    #[test]
    fn test_no_edges_keeps_registration_order() {
        assert_eq!(toposort(4, &[]).unwrap(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_edges_are_respected() {
        let edges = [(3, 1), (1, 0), (4, 2)];
        let order = toposort(5, &edges).unwrap();
        for (from, to) in edges {
            assert!(position(&order, from) < position(&order, to));
        }
    }

    #[test]
    fn test_duplicate_edges_do_not_block() {
        assert_eq!(toposort(2, &[(1, 0), (1, 0)]).unwrap(), vec![1, 0]);
    }

    #[test]
    fn test_cycle_is_reported_closed() {
        let cycle = toposort(3, &[(0, 1), (1, 2), (2, 1)]).unwrap_err();
        assert_eq!(cycle.first(), cycle.last());
        assert!(cycle.contains(&1) && cycle.contains(&2));
        assert!(!cycle.contains(&0));
    }

    #[test]
    fn test_self_loop_is_a_cycle() {
        assert_eq!(toposort(1, &[(0, 0)]).unwrap_err(), vec![0, 0]);
    }
}
