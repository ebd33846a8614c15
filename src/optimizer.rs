//! Constraint-programming optimizer.
//!
//! Maps a `Start`-rooted [`Graph`] to a concrete timeline: one interval per
//! unfrozen `Protocol`, a global no-overlap constraint across all intervals,
//! precedence edges derived from graph topology, and slack-penalty
//! objectives derived from `Delay` nodes. Modeled as a MILP and solved with
//! `good_lp`'s CBC backend, since no CP-SAT-equivalent solver exists in the
//! Rust ecosystem this crate draws its dependency stack from.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use good_lp::{Expression, ResolutionError, Solution, SolverModel, Variable, constraint, variable, variables};
use miette::Diagnostic;
use thiserror::Error;

use crate::graph::{FromType, Graph, Node, NodeId};

/// Errors raised while building or solving the scheduling model.
#[derive(Debug, Error, Diagnostic)]
pub enum OptimizerError {
    /// No feasible schedule was found within the solver's time budget.
    #[error("no feasible schedule within the solver time budget")]
    #[diagnostic(
        code(labsched::optimizer::infeasible),
        help("increase the solver time limit, the buffer, or relax the Delay targets")
    )]
    Infeasible,

    /// The solver itself failed (not merely "no solution found").
    #[error("solver error: {0}")]
    #[diagnostic(code(labsched::optimizer::solver))]
    Solver(String),
}

impl From<ResolutionError> for OptimizerError {
    fn from(e: ResolutionError) -> Self {
        match e {
            ResolutionError::Infeasible | ResolutionError::Unbounded => OptimizerError::Infeasible,
            other => OptimizerError::Solver(other.to_string()),
        }
    }
}

/// Tunables for a single optimizer instance, carried for the lifetime of an
/// [`crate::executor::Executor`].
#[derive(Debug, Clone, Copy)]
pub struct OptimizerConfig {
    /// Integer seconds of headroom added to every `Protocol`'s effective
    /// duration before modeling.
    pub buffer_seconds: i64,
    /// Wall-clock budget handed to the CBC solver.
    pub solver_time_limit_seconds: u32,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            buffer_seconds: 0,
            solver_time_limit_seconds: 5,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Anchor {
    T0,
    Protocol(NodeId),
}

struct PrecedenceEdge {
    parent: NodeId,
    child: NodeId,
}

struct DelayEdge {
    anchor: Anchor,
    from_type: FromType,
    duration_seconds: i64,
    offset_seconds: i64,
    child: NodeId,
}

fn walk(node: &Node, edges: &mut Vec<PrecedenceEdge>, delays: &mut Vec<DelayEdge>) {
    for child in node.post_node() {
        match child {
            Node::Protocol(cp) => {
                if let Node::Protocol(pp) = node {
                    edges.push(PrecedenceEdge {
                        parent: pp.id,
                        child: cp.id,
                    });
                }
                walk(child, edges, delays);
            }
            Node::Delay(d) => {
                let anchor = match node {
                    Node::Protocol(pp) => Anchor::Protocol(pp.id),
                    Node::Start(_) => Anchor::T0,
                    Node::Delay(_) => unreachable!("a Delay cannot be another Delay's parent"),
                };
                if let Some(Node::Protocol(gc)) = d.post_node.first() {
                    delays.push(DelayEdge {
                        anchor,
                        from_type: d.from_type,
                        duration_seconds: d.duration_seconds,
                        offset_seconds: d.offset_seconds,
                        child: gc.id,
                    });
                }
                walk(child, edges, delays);
            }
            Node::Start(_) => unreachable!("a Start cannot be a successor"),
        }
    }
}

/// Translates graphs into MILP schedules and writes solved times back.
pub struct Optimizer {
    config: OptimizerConfig,
}

impl Optimizer {
    #[must_use]
    pub fn new(config: OptimizerConfig) -> Self {
        Self { config }
    }

    /// Assign a `scheduled_time` to every unfinished `Protocol` in `graph`.
    /// Leaves the graph untouched if no feasible schedule exists.
    #[tracing::instrument(skip(self, graph), fields(buffer = self.config.buffer_seconds))]
    pub fn optimize(&self, graph: &mut Graph, now: DateTime<Utc>) -> Result<(), OptimizerError> {
        let mut edges = Vec::new();
        let mut delays = Vec::new();
        walk(graph.root(), &mut edges, &mut delays);

        let protocols: Vec<NodeId> = graph
            .flatten()
            .into_iter()
            .filter_map(|n| n.as_protocol())
            .map(|p| p.id)
            .collect();

        if protocols.is_empty() {
            tracing::info!("empty graph, nothing to schedule");
            return Ok(());
        }

        let t0 = protocols
            .iter()
            .filter_map(|id| {
                graph
                    .find(*id)
                    .and_then(Node::as_protocol)
                    .and_then(|p| p.started_time)
            })
            .min()
            .unwrap_or(now);

        let effective_duration = |p_id: NodeId, graph: &Graph| -> i64 {
            let p = graph
                .find(p_id)
                .and_then(Node::as_protocol)
                .expect("protocol exists");
            p.duration_seconds + self.config.buffer_seconds
        };

        let unfinished: Vec<NodeId> = protocols
            .iter()
            .copied()
            .filter(|id| {
                let p = graph
                    .find(*id)
                    .and_then(Node::as_protocol)
                    .expect("protocol exists");
                p.finished_time.is_none()
            })
            .collect();

        if unfinished.is_empty() {
            tracing::info!("all protocols finished, nothing to schedule");
            return Ok(());
        }

        let horizon_i: i64 = protocols
            .iter()
            .map(|id| effective_duration(*id, graph))
            .sum::<i64>()
            + delays
                .iter()
                .map(|d| d.duration_seconds.abs() + d.offset_seconds.abs())
                .sum::<i64>()
            + 1;
        let horizon = horizon_i as f64;

        let mut vars = variables!();
        let mut start_vars: HashMap<NodeId, Variable> = HashMap::new();
        let mut finish_vars: HashMap<NodeId, Variable> = HashMap::new();

        for id in &unfinished {
            let p = graph
                .find(*id)
                .and_then(Node::as_protocol)
                .expect("protocol exists");
            let start = if let Some(started) = p.started_time {
                let observed = (started - t0).num_seconds() as f64;
                vars.add(variable().integer().min(observed).max(observed))
            } else {
                vars.add(variable().integer().min(0.0).max(horizon))
            };
            let finish = vars.add(variable().integer().min(0.0).max(horizon));
            start_vars.insert(*id, start);
            finish_vars.insert(*id, finish);
        }

        let makespan = vars.add(variable().integer().min(0.0).max(horizon));
        let mut objective = Expression::from(makespan);
        let mut model_constraints = Vec::new();

        // Every distinct assignment of integer-valued vars changes makespan
        // and slack by at least 1, so an epsilon below 1/(vars * horizon)
        // only ever breaks ties among otherwise-equal solutions, favoring
        // the one with the earliest start for every protocol.
        let epsilon = 1.0 / (horizon * (unfinished.len() as f64 + 1.0) * 4.0);

        for id in &unfinished {
            let duration = effective_duration(*id, graph) as f64;
            let start = start_vars[id];
            let finish = finish_vars[id];
            model_constraints.push(constraint!(finish == start + duration));
            model_constraints.push(constraint!(makespan >= finish));
            objective += epsilon * start;
        }

        // No-overlap: every unordered pair of unfrozen intervals is ordered by a
        // binary "before" variable and a big-M disjunction.
        for i in 0..unfinished.len() {
            for j in (i + 1)..unfinished.len() {
                let a = unfinished[i];
                let b = unfinished[j];
                let (a_start, a_finish) = (start_vars[&a], finish_vars[&a]);
                let (b_start, b_finish) = (start_vars[&b], finish_vars[&b]);
                let before = vars.add(variable().integer().min(0.0).max(1.0));
                model_constraints.push(constraint!(
                    a_finish <= b_start + horizon * (1.0 - before)
                ));
                model_constraints.push(constraint!(b_finish <= a_start + horizon * before));
            }
        }

        // Precedence: parent.finish <= child.start for direct Protocol->Protocol
        // edges. A parent already marked finished has no variable of its own
        // (it was excluded from `unfinished`); anchor the child to its
        // recorded finish time as a constant lower bound instead of dropping
        // the edge.
        for edge in &edges {
            let Some(&cs) = start_vars.get(&edge.child) else {
                continue;
            };
            match finish_vars.get(&edge.parent) {
                Some(&pf) => model_constraints.push(constraint!(pf <= cs)),
                None => {
                    if let Some(finished) = graph
                        .find(edge.parent)
                        .and_then(Node::as_protocol)
                        .and_then(|p| p.finished_time)
                    {
                        let offset = (finished - t0).num_seconds() as f64;
                        model_constraints.push(constraint!(cs >= offset));
                    }
                }
            }
        }

        // Delay slack: (child.start - anchor - target) decomposed as slack_pos - slack_neg,
        // both penalized in the objective (the |x| = x+ + x- trick for an equality target).
        for delay in &delays {
            let Some(&child_start) = start_vars.get(&delay.child) else {
                continue;
            };
            let anchor_offset: f64 = match delay.anchor {
                Anchor::T0 => 0.0,
                Anchor::Protocol(pid) => {
                    let anchor_node = graph
                        .find(pid)
                        .and_then(Node::as_protocol)
                        .expect("anchor exists");
                    match delay.from_type {
                        FromType::Start => anchor_node
                            .started_time
                            .map(|t| (t - t0).num_seconds() as f64)
                            .unwrap_or(0.0),
                        FromType::Finish => anchor_node
                            .finished_time
                            .map(|t| (t - t0).num_seconds() as f64)
                            .unwrap_or(0.0),
                    }
                }
            };
            let anchor_var = match delay.anchor {
                Anchor::T0 => None,
                Anchor::Protocol(pid) => match delay.from_type {
                    FromType::Start => start_vars.get(&pid).copied(),
                    FromType::Finish => finish_vars.get(&pid).copied(),
                },
            };
            let target = (delay.duration_seconds + delay.offset_seconds) as f64;
            let slack_pos = vars.add(variable().integer().min(0.0).max(horizon));
            let slack_neg = vars.add(variable().integer().min(0.0).max(horizon));
            let diff: Expression = match anchor_var {
                Some(av) => Expression::from(child_start) - av,
                None => Expression::from(child_start) - anchor_offset,
            };
            model_constraints.push(constraint!(diff - target == slack_pos - slack_neg));
            objective += slack_pos;
            objective += slack_neg;
        }

        let mut problem = vars
            .minimise(objective)
            .using(good_lp::solvers::coin_cbc::coin_cbc);
        problem.set_parameter("sec", &self.config.solver_time_limit_seconds.to_string());
        for c in model_constraints {
            problem = problem.with(c);
        }
        let solution = problem.solve()?;

        for (id, start_var) in &start_vars {
            let offset = solution.value(*start_var).round() as i64;
            let node = graph
                .find_mut(*id)
                .and_then(Node::as_protocol_mut)
                .expect("protocol exists");
            node.scheduled_time = Some(t0 + chrono::Duration::seconds(offset));
        }

        tracing::info!(makespan = solution.value(makespan), "optimize complete");
        Ok(())
    }
}
