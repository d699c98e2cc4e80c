use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use tracing::{Level, event};

use crate::call_path::functions::is_skip_function;
use crate::call_path::{Call, CallPath};
use crate::error::SynapseError;
use crate::expr::{ConstraintSet, Expr, SolverToolbox};
use crate::symbol::SymbolFactory;

/// The unconsumed suffix of one call path during construction.
#[derive(Clone, Debug)]
pub struct RawPath {
    pub filename: String,
    pub constraints: ConstraintSet,
    /// Remaining materializable calls; skip functions are filtered out.
    pub calls: Vec<Call>,
    /// Every call of the path as it was read.
    pub original: Rc<Vec<Call>>,
}

impl RawPath {
    pub fn new(cp: &CallPath) -> Self {
        Self {
            filename: cp.filename.clone(),
            constraints: cp.constraints.clone(),
            calls: cp
                .calls
                .iter()
                .filter(|c| !is_skip_function(&c.function_name))
                .cloned()
                .collect(),
            original: Rc::new(cp.calls.clone()),
        }
    }

    pub fn first(&self) -> Option<&Call> {
        self.calls.first()
    }

    pub fn advance(mut self) -> Self {
        if !self.calls.is_empty() {
            self.calls.remove(0);
        }
        self
    }

    pub fn rename_arrays(&mut self, map: &BTreeMap<String, String>) {
        if map.is_empty() {
            return;
        }
        self.constraints = self.constraints.rename_arrays(map);
        self.calls = self.calls.iter().map(|c| c.rename_arrays(map)).collect();
    }

    pub fn arrays(&self) -> BTreeSet<String> {
        self.constraints
            .arrays()
            .into_iter()
            .chain(self.calls.iter().flat_map(|c| c.arrays()))
            .collect()
    }
}

/// A partition of raw paths. Without a discriminating constraint, every path
/// starts with the same call and both sides hold all of them.
#[derive(Debug)]
pub struct CallPathsGroup {
    pub discriminating_constraint: Option<Expr>,
    pub on_true: Vec<RawPath>,
    pub on_false: Vec<RawPath>,
}

impl CallPathsGroup {
    /// Groups `paths`. `available` holds the symbols produced so far; a
    /// discriminating constraint may only mention those.
    pub fn new(
        paths: &[RawPath],
        available: &BTreeSet<String>,
        solver: &SolverToolbox,
    ) -> Result<Self, SynapseError> {
        if paths.is_empty() {
            return Err(SynapseError::EmptyCallPaths);
        }
        for reference in paths {
            let (on_true, on_false): (Vec<&RawPath>, Vec<&RawPath>) = paths
                .iter()
                .partition(|p| first_calls_equal(reference, p, solver));
            if on_false.is_empty() {
                return Ok(Self {
                    discriminating_constraint: None,
                    on_true: paths.to_vec(),
                    on_false: paths.to_vec(),
                });
            }
            if let Some(group) = Self::split(&on_true, &on_false, available, solver) {
                return Ok(group);
            }
        }
        event!(
            Level::ERROR,
            "No constraint separates {} call paths: {:?}",
            paths.len(),
            paths.iter().map(|p| &p.filename).collect::<Vec<_>>()
        );
        Err(SynapseError::NoDiscriminatingConstraint)
    }

    pub fn is_branching(&self) -> bool {
        self.discriminating_constraint.is_some()
    }

    /// Looks for a constraint of `on_true[0]` that every path of `on_true`
    /// implies and that sends each path of `on_false` to a definite side,
    /// leaving at least one on the false side.
    pub fn split(
        on_true: &[&RawPath],
        on_false: &[&RawPath],
        available: &BTreeSet<String>,
        solver: &SolverToolbox,
    ) -> Option<Self> {
        let first = on_true.first()?;
        'candidates: for candidate in first.constraints.iter() {
            if candidate.is_constant() || !candidate.arrays().is_subset(available) {
                continue;
            }
            if !on_true
                .iter()
                .all(|p| solver.is_always_true(&p.constraints, candidate))
            {
                continue;
            }
            let mut t: Vec<RawPath> = on_true.iter().map(|p| (*p).clone()).collect();
            let mut f = vec![];
            for p in on_false {
                if solver.is_always_true(&p.constraints, candidate) {
                    t.push((*p).clone());
                } else if solver.is_always_false(&p.constraints, candidate) {
                    f.push((*p).clone());
                } else {
                    continue 'candidates;
                }
            }
            if f.is_empty() {
                continue;
            }
            return Some(Self {
                discriminating_constraint: Some(candidate.clone()),
                on_true: t,
                on_false: f,
            });
        }
        None
    }
}

fn exprs_equal(a: &Expr, b: &Expr, ca: &ConstraintSet, cb: &ConstraintSet, s: &SolverToolbox) -> bool {
    a == b || a.simplify() == b.simplify() || s.always_equal(a, b, &[ca, cb])
}

/// Same function, same consumed argument values and, where both are known
/// constants, the same return value.
pub fn first_calls_equal(a: &RawPath, b: &RawPath, solver: &SolverToolbox) -> bool {
    let (Some(ca), Some(cb)) = (a.first(), b.first()) else {
        return a.first().is_none() && b.first().is_none();
    };
    calls_equal(ca, &a.constraints, cb, &b.constraints, solver)
}

pub fn calls_equal(
    ca: &Call,
    sa: &ConstraintSet,
    cb: &Call,
    sb: &ConstraintSet,
    solver: &SolverToolbox,
) -> bool {
    if ca.function_name != cb.function_name || ca.args.len() != cb.args.len() {
        return false;
    }
    for (name, arg_a) in &ca.args {
        let Some(arg_b) = cb.args.get(name) else {
            return false;
        };
        let (x, y) = match (&arg_a.input, &arg_b.input) {
            (Some(x), Some(y)) => (x, y),
            (None, None) => match (&arg_a.expr, &arg_b.expr) {
                (Some(x), Some(y)) if arg_a.output.is_none() => (x, y),
                (None, None) => continue,
                _ if arg_a.output.is_some() => continue,
                _ => return false,
            },
            _ => return false,
        };
        if !exprs_equal(x, y, sa, sb, solver) {
            return false;
        }
    }
    match (&ca.ret, &cb.ret) {
        (Some(x), Some(y)) => match (x.as_constant(), y.as_constant()) {
            (Some(vx), Some(vy)) => vx == vy,
            _ => true,
        },
        _ => true,
    }
}

/// Renames the symbols `path`'s first call produces to the labels
/// `representative` uses for the same symbols.
pub fn align_symbols(
    path: &mut RawPath,
    representative: &Call,
    representative_constraints: &ConstraintSet,
    factory: &mut SymbolFactory,
) -> Result<(), SynapseError> {
    let Some(first) = path.first().cloned() else {
        return Ok(());
    };
    let ours = factory.process(&first, false, std::slice::from_ref(&path.constraints))?;
    let theirs = factory.process(
        representative,
        false,
        std::slice::from_ref(representative_constraints),
    )?;
    let present = path.arrays();
    let mut map = BTreeMap::new();
    for o in &ours {
        let Some(t) = theirs.iter().find(|t| t.label_base == o.label_base) else {
            continue;
        };
        if o.label == t.label {
            continue;
        }
        map.insert(o.label.clone(), t.label.clone());
        if present.contains(&t.label) {
            map.insert(t.label.clone(), o.label.clone());
        }
    }
    path.rename_arrays(&map);
    Ok(())
}
