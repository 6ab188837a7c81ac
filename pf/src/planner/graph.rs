//! Step dependency graph helpers
//!
//! Cycle detection and ordering over `PlanStep::depends_on`.

use std::collections::{HashMap, HashSet};
use tracing::debug;

use crate::domain::PlanStep;

/// Validate a dependency graph for cycles
///
/// Uses DFS to detect cycles. Returns Ok(()) if no cycles, Err with the cycle
/// path if one is found.
pub fn validate_dependency_graph<'a>(steps: impl IntoIterator<Item = &'a PlanStep>) -> Result<(), Vec<String>> {
    debug!("validate_dependency_graph: called");
    let step_map: HashMap<&str, &PlanStep> = steps.into_iter().map(|s| (s.id.as_str(), s)).collect();

    let mut ids: Vec<&str> = step_map.keys().copied().collect();
    ids.sort();

    let mut visited = HashSet::new();
    let mut rec_stack = HashSet::new();
    let mut cycle_path = Vec::new();

    for step_id in ids {
        if !visited.contains(step_id) && has_cycle_dfs(step_id, &step_map, &mut visited, &mut rec_stack, &mut cycle_path)
        {
            debug!(?cycle_path, "validate_dependency_graph: cycle detected");
            return Err(cycle_path);
        }
    }

    debug!("validate_dependency_graph: no cycles found");
    Ok(())
}

fn has_cycle_dfs<'a>(
    node: &'a str,
    graph: &HashMap<&'a str, &'a PlanStep>,
    visited: &mut HashSet<&'a str>,
    rec_stack: &mut HashSet<&'a str>,
    cycle_path: &mut Vec<String>,
) -> bool {
    visited.insert(node);
    rec_stack.insert(node);
    cycle_path.push(node.to_string());

    if let Some(step) = graph.get(node) {
        for dep_id in &step.depends_on {
            if !visited.contains(dep_id.as_str()) {
                if let Some((&dep_key, _)) = graph.get_key_value(dep_id.as_str())
                    && has_cycle_dfs(dep_key, graph, visited, rec_stack, cycle_path)
                {
                    return true;
                }
            } else if rec_stack.contains(dep_id.as_str()) {
                debug!(%node, %dep_id, "has_cycle_dfs: back edge found");
                cycle_path.push(dep_id.clone());
                return true;
            }
        }
    }

    rec_stack.remove(node);
    cycle_path.pop();
    false
}

/// Topologically sort steps by dependencies
///
/// Returns indices into `steps`, dependencies first. Ties keep input order.
pub fn topological_sort(steps: &[PlanStep]) -> Result<Vec<usize>, Vec<String>> {
    debug!(step_count = steps.len(), "topological_sort: called");
    validate_dependency_graph(steps)?;

    let index_map: HashMap<&str, usize> = steps.iter().enumerate().map(|(i, s)| (s.id.as_str(), i)).collect();
    let mut visited = HashSet::new();
    let mut result = Vec::with_capacity(steps.len());

    for idx in 0..steps.len() {
        topo_dfs_idx(idx, steps, &index_map, &mut visited, &mut result);
    }

    debug!(result_len = result.len(), "topological_sort: complete");
    Ok(result)
}

fn topo_dfs_idx(
    idx: usize,
    steps: &[PlanStep],
    index_map: &HashMap<&str, usize>,
    visited: &mut HashSet<usize>,
    result: &mut Vec<usize>,
) {
    if !visited.insert(idx) {
        return;
    }
    for dep_id in &steps[idx].depends_on {
        if let Some(&dep_idx) = index_map.get(dep_id.as_str()) {
            topo_dfs_idx(dep_idx, steps, index_map, visited, result);
        }
    }
    result.push(idx);
}

/// Steps whose dependencies have all resolved and which are not yet started
///
/// Dependencies outside `steps` (e.g. an earlier stage) count as resolved
/// only if they appear in `resolved`.
pub fn ready_steps<'a>(
    steps: impl IntoIterator<Item = &'a PlanStep>,
    resolved: &HashSet<String>,
    started: &HashSet<String>,
) -> Vec<&'a PlanStep> {
    steps
        .into_iter()
        .filter(|s| !resolved.contains(&s.id) && !started.contains(&s.id))
        .filter(|s| s.depends_on.iter().all(|d| resolved.contains(d)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::AgentKind;

    fn step(id: &str, deps: &[&str]) -> PlanStep {
        let mut s = PlanStep::new(id, AgentKind::CodeGenerator, "", id);
        for d in deps {
            s.depends_on.insert(d.to_string());
        }
        s
    }

    #[test]
    fn test_no_cycle() {
        let steps = vec![step("a", &[]), step("b", &["a"]), step("c", &["a", "b"])];
        assert!(validate_dependency_graph(&steps).is_ok());
    }

    #[test]
    fn test_cycle_reports_path() {
        let steps = vec![step("a", &["c"]), step("b", &["a"]), step("c", &["b"])];
        let path = validate_dependency_graph(&steps).unwrap_err();
        assert!(path.len() >= 3);
        assert_eq!(path.first(), path.last());
    }

    #[test]
    fn test_self_cycle() {
        let steps = vec![step("a", &["a"])];
        assert_eq!(validate_dependency_graph(&steps).unwrap_err(), vec!["a", "a"]);
    }

    #[test]
    fn test_topological_sort_puts_dependencies_first() {
        let steps = vec![step("c", &["b"]), step("b", &["a"]), step("a", &[])];
        let order: Vec<&str> = topological_sort(&steps)
            .unwrap()
            .into_iter()
            .map(|i| steps[i].id.as_str())
            .collect();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_ready_steps_respects_resolution_and_started() {
        let steps = vec![step("a", &[]), step("b", &["a"]), step("c", &["a"]), step("d", &["b", "c"])];
        let mut resolved = HashSet::new();
        let mut started = HashSet::new();

        let ready: Vec<&str> = ready_steps(&steps, &resolved, &started).iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ready, vec!["a"]);

        resolved.insert("a".to_string());
        started.insert("b".to_string());
        let ready: Vec<&str> = ready_steps(&steps, &resolved, &started).iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ready, vec!["c"]);
    }
}
