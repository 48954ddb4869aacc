//! Graph validation: pipe/worker classification, warnings, and the 2-D layout matrix
//! (§4.5). Operates purely on identifiers so it is independent of any pipe's payload type.

use crate::node::{NodeKind, PipeId, WorkerId};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// One of the non-fatal conditions the validator can detect; the caller pre-declares which
/// of these it tolerates (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Warning {
    /// Some pipe has a producer but no consumer, or vice versa.
    Completeness,
    /// A worker cannot be reached from the root.
    Discovery,
    /// Two producers share a `SupplyPipe`.
    MultipleInputs,
    /// A fork's outputs have different base capacities.
    UnbalancedFork,
    /// The graph contains a cycle (breadth traversal exceeded `2 * worker_count`).
    Cycle,
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Warning::Completeness => "COMPLETENESS",
            Warning::Discovery => "DISCOVERY",
            Warning::MultipleInputs => "MULTIPLE_INPUTS",
            Warning::UnbalancedFork => "UNBALANCED_FORK",
            Warning::Cycle => "CYCLE",
        };
        f.write_str(label)
    }
}

/// A pipe's static shape as seen by the validator.
#[derive(Debug, Clone)]
pub struct PipeDescriptor {
    pub id: PipeId,
    pub base_capacity: usize,
    pub is_supply: bool,
}

/// A worker's static shape as seen by the validator.
#[derive(Debug, Clone)]
pub struct WorkerDescriptor {
    pub id: WorkerId,
    pub name: String,
    pub kind: NodeKind,
    pub inputs: Vec<PipeId>,
    pub outputs: Vec<PipeId>,
}

/// The 2-D chart the validator lays out: `columns[depth]` lists the workers reachable at
/// that breadth-first depth from the root, with workers reachable via a longer path pulled
/// right so the chart stays acyclic left-to-right (§4.5, step 3).
#[derive(Debug, Clone, Default)]
pub struct Layout {
    pub columns: Vec<Vec<WorkerId>>,
}

/// Outcome of validating one pipeline graph.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub warnings: Vec<Warning>,
    pub layout: Layout,
    /// Non-`SupplyPipe` pipes with more than one producer — a hard build error, not a
    /// suppressible warning (§4.5, step 1).
    pub multiple_producer_conflicts: Vec<PipeId>,
}

/// Validates a pipeline graph described purely by descriptors, returning every warning
/// observed and (unless a cycle was found) a layout matrix.
///
/// `root` is the pipe that feeds the pipeline from the outside; workers reachable by
/// following `inputs -> outputs` edges from whatever worker produces into `root` are
/// discovered breadth-first.
#[must_use]
pub fn validate(
    root: PipeId,
    workers: &[WorkerDescriptor],
    pipes: &[PipeDescriptor],
) -> ValidationResult {
    let mut warnings = HashSet::new();

    let mut producers: HashMap<PipeId, Vec<WorkerId>> = HashMap::new();
    let mut consumers: HashMap<PipeId, Vec<WorkerId>> = HashMap::new();
    for w in workers {
        for &out in &w.outputs {
            producers.entry(out).or_default().push(w.id);
        }
        for &inp in &w.inputs {
            consumers.entry(inp).or_default().push(w.id);
        }
    }

    let pipes_by_id: HashMap<PipeId, &PipeDescriptor> = pipes.iter().map(|p| (p.id, p)).collect();

    // COMPLETENESS: a pipe with a producer but no consumer, or vice versa (the root pipe
    // is exempt from "no producer" since it is fed externally).
    for pipe in pipes {
        let has_producer = pipe.id == root || producers.get(&pipe.id).is_some_and(|v| !v.is_empty());
        let has_consumer = consumers.get(&pipe.id).is_some_and(|v| !v.is_empty());
        if has_producer != has_consumer {
            warnings.insert(Warning::Completeness);
        }
    }

    // MULTIPLE_INPUTS: two producers sharing the same pipe is only legal for a SupplyPipe
    // (different-scope pushes rebased into the pipe's own scope); still flagged as a
    // warning for visibility even in that legal case. Two producers sharing a non-SupplyPipe
    // pipe is never legal and is collected as a hard error instead (§4.5, step 1).
    let mut multiple_producer_conflicts = Vec::new();
    for (pipe_id, producing) in &producers {
        if producing.len() > 1 {
            let is_supply = pipes_by_id.get(pipe_id).is_some_and(|p| p.is_supply);
            if is_supply {
                warnings.insert(Warning::MultipleInputs);
            } else {
                multiple_producer_conflicts.push(*pipe_id);
            }
        }
    }
    multiple_producer_conflicts.sort_by_key(|p| p.0);

    // UNBALANCED_FORK: a worker's output pipes don't all share one base capacity.
    for w in workers {
        if w.kind == NodeKind::Fork {
            let mut capacities = w
                .outputs
                .iter()
                .filter_map(|id| pipes_by_id.get(id).map(|p| p.base_capacity));
            if let Some(first) = capacities.next() {
                if capacities.any(|c| c != first) {
                    warnings.insert(Warning::UnbalancedFork);
                }
            }
        }
    }

    let worker_count = workers.len();
    let by_id: HashMap<WorkerId, &WorkerDescriptor> = workers.iter().map(|w| (w.id, w)).collect();

    // Downstream adjacency: worker -> workers consuming one of its outputs.
    let mut downstream: HashMap<WorkerId, Vec<WorkerId>> = HashMap::new();
    for w in workers {
        for &out in &w.outputs {
            downstream
                .entry(w.id)
                .or_default()
                .extend(consumers.get(&out).cloned().unwrap_or_default());
        }
    }

    if has_cycle(workers, &downstream) {
        warnings.insert(Warning::Cycle);
        return ValidationResult {
            warnings: warnings.into_iter().collect(),
            layout: Layout::default(),
            multiple_producer_conflicts,
        };
    }

    // Layout: breadth-first from the graph's sources — workers fed directly by `root`, plus
    // any worker with no inputs at all (a `Supplier` producing into the pipeline from
    // nothing, rather than from the externally-pushed root). A worker reached again via a
    // longer path is "pulled right": its recorded depth is raised and its neighbors are
    // re-queued so the pull propagates downstream too (§4.5, step 3).
    let mut depth_of: HashMap<WorkerId, usize> = HashMap::new();
    let mut queue: std::collections::VecDeque<(WorkerId, usize)> = workers
        .iter()
        .filter(|w| w.inputs.is_empty() || w.inputs.contains(&root))
        .map(|w| (w.id, 0))
        .collect();

    while let Some((id, depth)) = queue.pop_front() {
        let improved = match depth_of.get(&id) {
            Some(&existing) if depth <= existing => false,
            _ => true,
        };
        if !improved {
            continue;
        }
        depth_of.insert(id, depth);
        for &next in downstream.get(&id).into_iter().flatten() {
            queue.push_back((next, depth + 1));
        }
    }

    if depth_of.len() < worker_count {
        warnings.insert(Warning::Discovery);
    }

    let max_depth = depth_of.values().copied().max().unwrap_or(0);
    let mut columns: Vec<Vec<WorkerId>> = vec![Vec::new(); max_depth + 1];
    let mut ordered: Vec<(&WorkerId, &usize)> = depth_of.iter().collect();
    ordered.sort_by_key(|(id, _)| id.0);
    for (id, depth) in ordered {
        columns[*depth].push(*id);
    }
    if depth_of.is_empty() {
        columns.clear();
    }

    let mut warnings: Vec<Warning> = warnings.into_iter().collect();
    warnings.sort_by_key(|w| format!("{w}"));
    ValidationResult {
        warnings,
        layout: Layout { columns },
        multiple_producer_conflicts,
    }
}

/// Standard white/gray/black DFS cycle detection over the worker adjacency graph.
fn has_cycle(workers: &[WorkerDescriptor], downstream: &HashMap<WorkerId, Vec<WorkerId>>) -> bool {
    #[derive(Clone, Copy, PartialEq)]
    enum Color {
        White,
        Gray,
        Black,
    }
    let mut color: HashMap<WorkerId, Color> = workers.iter().map(|w| (w.id, Color::White)).collect();

    fn visit(
        id: WorkerId,
        downstream: &HashMap<WorkerId, Vec<WorkerId>>,
        color: &mut HashMap<WorkerId, Color>,
    ) -> bool {
        color.insert(id, Color::Gray);
        for &next in downstream.get(&id).into_iter().flatten() {
            match color.get(&next).copied().unwrap_or(Color::White) {
                Color::Gray => return true,
                Color::White => {
                    if visit(next, downstream, color) {
                        return true;
                    }
                }
                Color::Black => {}
            }
        }
        color.insert(id, Color::Black);
        false
    }

    for w in workers {
        if color.get(&w.id).copied() == Some(Color::White) && visit(w.id, downstream, &mut color) {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipe(id: usize, base_capacity: usize, is_supply: bool) -> PipeDescriptor {
        PipeDescriptor {
            id: PipeId(id),
            base_capacity,
            is_supply,
        }
    }

    fn worker(id: usize, kind: NodeKind, inputs: &[usize], outputs: &[usize]) -> WorkerDescriptor {
        WorkerDescriptor {
            id: WorkerId(id),
            name: format!("w{id}"),
            kind,
            inputs: inputs.iter().copied().map(PipeId).collect(),
            outputs: outputs.iter().copied().map(PipeId).collect(),
        }
    }

    #[test]
    fn linear_pipeline_has_no_warnings() {
        let pipes = vec![pipe(0, 1, true), pipe(1, 1, false)];
        let workers = vec![
            worker(0, NodeKind::Function, &[0], &[1]),
            worker(1, NodeKind::Consumer, &[1], &[]),
        ];
        let result = validate(PipeId(0), &workers, &pipes);
        assert!(result.warnings.is_empty(), "{:?}", result.warnings);
        assert_eq!(result.layout.columns.len(), 2);
    }

    #[test]
    fn unreachable_worker_is_flagged_as_discovery() {
        let pipes = vec![pipe(0, 1, true), pipe(1, 1, false), pipe(2, 1, true)];
        let workers = vec![
            worker(0, NodeKind::Consumer, &[0], &[]),
            // worker 1 consumes an orphan pipe nothing feeds from the root.
            worker(1, NodeKind::Consumer, &[2], &[]),
        ];
        let result = validate(PipeId(0), &workers, &pipes);
        assert!(result.warnings.contains(&Warning::Discovery));
    }

    #[test]
    fn unbalanced_fork_outputs_are_flagged() {
        let pipes = vec![pipe(0, 1, true), pipe(1, 4, false), pipe(2, 8, false)];
        let workers = vec![worker(0, NodeKind::Fork, &[0], &[1, 2])];
        let result = validate(PipeId(0), &workers, &pipes);
        assert!(result.warnings.contains(&Warning::UnbalancedFork));
    }

    #[test]
    fn multiple_producers_on_a_plain_pipe_is_a_hard_conflict_not_a_warning() {
        let pipes = vec![pipe(0, 1, true), pipe(1, 1, false)];
        let workers = vec![
            worker(0, NodeKind::Function, &[0], &[1]),
            worker(1, NodeKind::Function, &[0], &[1]),
            worker(2, NodeKind::Consumer, &[1], &[]),
        ];
        let result = validate(PipeId(0), &workers, &pipes);
        assert_eq!(result.multiple_producer_conflicts, vec![PipeId(1)]);
        assert!(!result.warnings.contains(&Warning::MultipleInputs));
    }

    #[test]
    fn multiple_producers_on_a_supply_pipe_is_only_a_warning() {
        let pipes = vec![pipe(0, 1, true)];
        let workers = vec![
            worker(0, NodeKind::Function, &[], &[0]),
            worker(1, NodeKind::Function, &[], &[0]),
        ];
        let result = validate(PipeId(0), &workers, &pipes);
        assert!(result.multiple_producer_conflicts.is_empty());
        assert!(result.warnings.contains(&Warning::MultipleInputs));
    }

    #[test]
    fn cycle_is_detected_and_layout_discarded() {
        let pipes = vec![pipe(0, 1, true), pipe(1, 1, false), pipe(2, 1, false)];
        let workers = vec![
            worker(0, NodeKind::Function, &[0], &[1]),
            worker(1, NodeKind::Function, &[1], &[2]),
            worker(2, NodeKind::Function, &[2], &[1]),
        ];
        let result = validate(PipeId(0), &workers, &pipes);
        assert!(result.warnings.contains(&Warning::Cycle));
        assert!(result.layout.columns.is_empty());
    }
}
