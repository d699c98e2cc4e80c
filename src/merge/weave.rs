//! Interleaving of one path from each diagram into a single merged path.

use crate::bdd::{Bdd, NodeId, NodeKind, ReturnOp};
use crate::call_path::functions::{PACKET_BORROW_NEXT_CHUNK, PACKET_RETURN_CHUNK};
use crate::call_path::{Call, ExtraVar};
use crate::error::SynapseError;
use crate::expr::{BYTE, ConstraintSet, Expr};
use crate::merge::chunks::{Piece, align_chunks};
use crate::merge::path::Path;
use crate::merge::{MergePolicy, Origin, Side};
use crate::symbol::PACKET_CHUNKS;

/// What a merged node does, without its edges.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Item {
    Call(Call),
    Branch { condition: Expr, direction: bool },
    Terminal { value: i64, op: ReturnOp },
}

#[derive(Clone, Debug)]
pub(crate) struct Placed {
    pub item: Item,
    pub origin: Origin,
    /// Node of the input diagram this item was copied from.
    pub source: Option<NodeId>,
}

/// The merged rendition of one compatible pair of paths.
#[derive(Clone, Debug)]
pub(crate) struct Woven {
    pub steps: Vec<Placed>,
    pub constraints: ConstraintSet,
    pub filename: String,
    pub extra: [usize; 2],
    /// Both terminals were valid and one of them was dropped.
    pub overridden: bool,
}

struct Borrow {
    call: Call,
    source: NodeId,
    offset: u32,
    len: u32,
}

impl Borrow {
    fn covers(&self, piece: &Piece) -> bool {
        self.offset <= piece.offset && piece.end() <= self.offset + self.len
    }
}

/// A path taken apart around its packet borrows.
struct Split {
    side: Side,
    borrows: Vec<Borrow>,
    /// `segments[k]` runs between borrow `k - 1` and borrow `k`.
    segments: Vec<Vec<Placed>>,
    returns: Vec<Call>,
    terminal: (i64, ReturnOp, NodeId),
}

fn chunk_len(call: &Call) -> Option<u32> {
    call.extra_out("the_chunk")
        .map(|e| e.width() / BYTE)
        .or_else(|| call.arg_expr("length")?.as_constant().map(|l| l as u32))
}

impl Split {
    fn new(bdd: &Bdd, path: &Path, side: Side) -> Result<Self, SynapseError> {
        let mut split = Split {
            side,
            borrows: vec![],
            segments: vec![vec![]],
            returns: vec![],
            terminal: (0, ReturnOp::Err, 0),
        };
        let mut offset = 0;
        let mut terminal = None;
        for step in &path.steps {
            let node = bdd.node(step.node)?;
            let placed = |item| Placed {
                item,
                origin: side.into(),
                source: Some(step.node),
            };
            match &node.kind {
                NodeKind::Call { call, .. } if call.is(PACKET_BORROW_NEXT_CHUNK) => {
                    let len = chunk_len(call).ok_or_else(|| {
                        SynapseError::invariant(format!(
                            "borrow at node {} has no known length",
                            step.node
                        ))
                    })?;
                    split.borrows.push(Borrow {
                        call: call.clone(),
                        source: step.node,
                        offset,
                        len,
                    });
                    split.segments.push(vec![]);
                    offset += len;
                }
                NodeKind::Call { call, .. } if call.is(PACKET_RETURN_CHUNK) => {
                    split.returns.push(call.clone());
                }
                NodeKind::Call { call, .. } => {
                    if let Some(segment) = split.segments.last_mut() {
                        segment.push(placed(Item::Call(call.clone())));
                    }
                }
                NodeKind::Branch { condition, .. } => {
                    let direction = step.direction.ok_or_else(|| {
                        SynapseError::invariant(format!("branch {} without a side", step.node))
                    })?;
                    if let Some(segment) = split.segments.last_mut() {
                        segment.push(placed(Item::Branch {
                            condition: condition.clone(),
                            direction,
                        }));
                    }
                }
                NodeKind::ReturnProcess { value, op } => {
                    terminal = Some((*value, *op, step.node));
                }
                _ => {
                    return Err(SynapseError::invariant(format!(
                        "node {} cannot end a process path",
                        step.node
                    )));
                }
            }
        }
        split.terminal = terminal.ok_or_else(|| SynapseError::invariant("path without terminal"))?;
        Ok(split)
    }

    fn lengths(&self) -> Vec<u32> {
        self.borrows.iter().map(|b| b.len).collect()
    }

    /// Index of the segment that starts where a borrow ends at `end`.
    fn segment_after(&self, end: u32) -> Option<usize> {
        self.borrows
            .iter()
            .position(|b| b.offset + b.len == end && b.len > 0)
            .map(|k| k + 1)
    }

    /// Bytes this side writes back for `piece`, when it returns the
    /// covering chunk. Returns pair up with borrows in reverse order.
    fn returned(&self, piece: &Piece) -> Option<Expr> {
        let k = self.borrows.iter().position(|b| b.covers(piece))?;
        let borrow = &self.borrows[k];
        let j = self.borrows.len() - 1 - k;
        let content = self.returns.get(j)?.arg_in("the_chunk")?;
        if content.width() != borrow.len * BYTE {
            return None;
        }
        Some(content.slice((piece.offset - borrow.offset) * BYTE, piece.len * BYTE))
    }
}

fn borrow_for(piece: &Piece, sides: &[Split; 2]) -> Result<Placed, SynapseError> {
    let exact: Vec<&Borrow> = sides
        .iter()
        .filter_map(|s| s.borrows.iter().find(|b| b.offset == piece.offset && b.len == piece.len))
        .collect();
    let owners: Vec<Side> = sides
        .iter()
        .filter(|s| s.borrows.iter().any(|b| b.covers(piece)))
        .map(|s| s.side)
        .collect();
    let origin = match owners.as_slice() {
        [only] => (*only).into(),
        _ => Origin::Both,
    };
    if let Some(b) = exact.first() {
        return Ok(Placed {
            item: Item::Call(b.call.clone()),
            origin,
            source: (exact.len() == 1).then_some(b.source),
        });
    }
    let template = sides
        .iter()
        .flat_map(|s| s.borrows.iter())
        .find(|b| b.covers(piece))
        .ok_or(SynapseError::ChunkMisalignment)?;
    let mut call = template.call.clone();
    if let Some(arg) = call.args.get_mut("length") {
        let width = arg.expr.as_ref().map(|e| e.width()).unwrap_or(32);
        arg.expr = Some(Expr::constant(piece.len as u64, width));
    }
    call.extra_vars.insert(
        "the_chunk".to_string(),
        ExtraVar {
            input: None,
            output: Some(Expr::read_lsb(PACKET_CHUNKS, piece.offset, piece.len)),
        },
    );
    Ok(Placed {
        item: Item::Call(call),
        origin,
        source: None,
    })
}

fn return_for(piece: &Piece, sides: &[Split; 2], prior: Side) -> Option<Placed> {
    let template = sides.iter().find_map(|s| s.returns.first())?;
    let unmodified = Expr::read_lsb(PACKET_CHUNKS, piece.offset, piece.len);
    let modified = |s: &Split| s.returned(piece).filter(|c| *c != unmodified);
    let content = match (modified(&sides[0]), modified(&sides[1])) {
        (Some(a), Some(b)) => match prior {
            Side::First => a,
            Side::Second => b,
        },
        (Some(a), None) => a,
        (None, Some(b)) => b,
        (None, None) => unmodified,
    };
    let mut call = template.clone();
    call.args.entry("the_chunk".to_string()).or_default().input = Some(content);
    Some(Placed {
        item: Item::Call(call),
        origin: Origin::Both,
        source: None,
    })
}

/// Interleaves `first` and `second`: each side's nodes keep their relative
/// order, borrows follow the aligned chunk layout, and every node runs after
/// the borrow it followed originally. Chunk returns go last, in reverse.
pub(crate) fn weave(
    first: (&Bdd, &Path),
    second: (&Bdd, &Path),
    policy: &MergePolicy,
) -> Result<Woven, SynapseError> {
    let sides = [
        Split::new(first.0, first.1, Side::First)?,
        Split::new(second.0, second.1, Side::Second)?,
    ];
    let layout = align_chunks(&sides[0].lengths(), &sides[1].lengths())?;
    let mut steps: Vec<Placed> = sides.iter().flat_map(|s| s.segments[0].clone()).collect();
    for piece in &layout.pieces {
        steps.push(borrow_for(piece, &sides)?);
        for s in &sides {
            if let Some(k) = s.segment_after(piece.end()) {
                steps.extend(s.segments[k].iter().cloned());
            }
        }
    }
    for piece in layout.pieces.iter().rev() {
        if let Some(r) = return_for(piece, &sides, policy.prior_changes) {
            steps.push(r);
        }
    }
    let (v1, op1, t1) = sides[0].terminal;
    let (v2, op2, t2) = sides[1].terminal;
    let winner = policy.resolve(op1, op2);
    let (value, op, source) = match winner {
        Side::First => (v1, op1, t1),
        Side::Second => (v2, op2, t2),
    };
    steps.push(Placed {
        item: Item::Terminal { value, op },
        origin: winner.into(),
        source: Some(source),
    });
    let constraints = first.1.conditions(first.0)?.union(&second.1.conditions(second.0)?);
    Ok(Woven {
        steps,
        constraints,
        filename: format!(
            "{}:{}+{}:{}",
            first.0.name, t1, second.0.name, t2
        ),
        extra: layout.extra,
        overridden: (op1, v1) != (op2, v2) && op1 != ReturnOp::Err && op2 != ReturnOp::Err,
    })
}

#[cfg(test)]
mod tests {
    use crate::bdd::builder::tests::borrow;
    use crate::bdd::tests::chain;
    use crate::bdd::ReturnOp;
    use crate::call_path::{Arg, Call};
    use crate::expr::Expr;
    use crate::merge::path::paths;
    use crate::merge::weave::{Item, weave};
    use crate::merge::{MergePolicy, Side};

    fn give_back(offset: u32, content: Expr) -> Call {
        Call::new("packet_return_chunk")
            .with_arg("p", Arg::value(Expr::constant(0x100, 64)))
            .with_arg(
                "the_chunk",
                Arg::pointer(Expr::constant(0x300 + offset as u64, 64), Some(content), None),
            )
    }

    fn names(steps: &[crate::merge::weave::Placed]) -> Vec<String> {
        steps
            .iter()
            .map(|p| match &p.item {
                Item::Call(c) => c.function_name.clone(),
                Item::Branch { .. } => "branch".into(),
                Item::Terminal { op, .. } => op.to_string(),
            })
            .collect()
    }

    #[test]
    fn test_nodes_follow_their_borrow() {
        let now = Call::new("current_time").with_ret(Expr::read_lsb("next_time", 0, 8));
        let a = chain(vec![borrow(14, 0), borrow(20, 14), now.clone()], ReturnOp::Fwd, 1);
        let b = chain(
            vec![borrow(14, 0), borrow(6, 14), Call::new("map_size"), borrow(14, 20)],
            ReturnOp::Drop,
            0,
        );
        let (pa, pb) = (paths(&a, a.process).unwrap(), paths(&b, b.process).unwrap());
        let woven = weave((&a, &pa[0]), (&b, &pb[0]), &MergePolicy::default()).unwrap();
        assert_eq!(
            names(&woven.steps),
            vec![
                "packet_borrow_next_chunk",
                "packet_borrow_next_chunk",
                "map_size",
                "packet_borrow_next_chunk",
                "current_time",
                "FWD",
            ]
        );
        assert_eq!(woven.extra, [1, 0]);
        assert!(woven.overridden);
        let Item::Call(split) = &woven.steps[3].item else {
            panic!("expected a borrow");
        };
        assert_eq!(
            split.extra_out("the_chunk"),
            Some(&Expr::read_lsb("packet_chunks", 20, 14))
        );
    }

    #[test]
    fn test_prior_changes_pick_returned_bytes() {
        let rewritten = |v: u64| Expr::constant(v, 32).concat(&Expr::read_lsb("packet_chunks", 0, 10));
        let a = chain(
            vec![borrow(14, 0), give_back(0, rewritten(1))],
            ReturnOp::Fwd,
            1,
        );
        let b = chain(
            vec![borrow(14, 0), give_back(0, rewritten(2))],
            ReturnOp::Fwd,
            1,
        );
        let (pa, pb) = (paths(&a, a.process).unwrap(), paths(&b, b.process).unwrap());
        let content = |policy: &MergePolicy| {
            let woven = weave((&a, &pa[0]), (&b, &pb[0]), policy).unwrap();
            assert_eq!(woven.steps.len(), 3);
            assert!(!woven.overridden);
            match &woven.steps[1].item {
                Item::Call(c) => c.arg_in("the_chunk").cloned(),
                _ => None,
            }
        };
        let mut policy = MergePolicy::default();
        assert_eq!(content(&policy), Some(rewritten(1)));
        policy.prior_changes = Side::Second;
        assert_eq!(content(&policy), Some(rewritten(2)));

        let untouched = chain(
            vec![borrow(14, 0), give_back(0, Expr::read_lsb("packet_chunks", 0, 14))],
            ReturnOp::Fwd,
            1,
        );
        let pu = paths(&untouched, untouched.process).unwrap();
        let woven = weave((&untouched, &pu[0]), (&b, &pb[0]), &MergePolicy::default()).unwrap();
        let Item::Call(c) = &woven.steps[1].item else {
            panic!("expected a return");
        };
        assert_eq!(c.arg_in("the_chunk"), Some(&rewritten(2)));
    }
}
