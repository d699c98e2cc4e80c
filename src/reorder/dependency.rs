//! Read/write conflicts between pairs of calls.

use crate::call_path::Call;
use crate::call_path::functions::*;
use crate::expr::{ConstraintSet, Expr, SolverToolbox};
use crate::symbol::table::has_side_effects;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Resource {
    Map,
    Vector,
    Dchain,
    Cht,
    Sketch,
    Packet,
}

/// One structure a call touches. A missing `object` is a structure the call
/// cannot name; a missing `key` means the whole structure.
struct Access<'a> {
    resource: Resource,
    object: Option<&'a Expr>,
    key: Option<&'a Expr>,
    writes: bool,
}

fn access<'c>(call: &'c Call, resource: Resource, object: &str, key: Option<&'c Expr>) -> Access<'c> {
    Access {
        resource,
        object: call.arg_expr(object),
        key,
        writes: has_side_effects(&call.function_name),
    }
}

fn accesses(call: &Call) -> Vec<Access<'_>> {
    match call.function_name.as_str() {
        MAP_GET | MAP_PUT | MAP_ERASE => vec![access(call, Resource::Map, "map", call.arg_in("key"))],
        MAP_SIZE | MAP_ALLOCATE => vec![access(call, Resource::Map, "map", None)],
        VECTOR_BORROW | VECTOR_RETURN => {
            vec![access(call, Resource::Vector, "vector", call.arg_expr("index"))]
        }
        VECTOR_ALLOCATE => vec![access(call, Resource::Vector, "vector", None)],
        DCHAIN_ALLOCATE
        | DCHAIN_ALLOCATE_NEW_INDEX
        | DCHAIN_REJUVENATE_INDEX
        | DCHAIN_IS_INDEX_ALLOCATED
        | DCHAIN_FREE_INDEX => vec![access(call, Resource::Dchain, "chain", None)],
        EXPIRE_ITEMS_SINGLE_MAP | EXPIRE_ITEMS_SINGLE_MAP_ITERATIVELY => vec![
            access(call, Resource::Dchain, "chain", None),
            access(call, Resource::Vector, "vector", None),
            access(call, Resource::Map, "map", None),
        ],
        CHT_FILL_CHT | CHT_FIND_PREFERRED_AVAILABLE_BACKEND => {
            vec![access(call, Resource::Cht, "cht", None)]
        }
        SKETCH_ALLOCATE | SKETCH_COMPUTE_HASHES | SKETCH_REFRESH | SKETCH_FETCH
        | SKETCH_TOUCH_BUCKETS | SKETCH_EXPIRE => vec![access(call, Resource::Sketch, "sketch", None)],
        PACKET_BORROW_NEXT_CHUNK | PACKET_RETURN_CHUNK | NF_SET_RTE_IPV4_UDPTCP_CHECKSUM => {
            vec![Access {
                resource: Resource::Packet,
                object: None,
                key: None,
                writes: true,
            }]
        }
        _ => vec![],
    }
}

/// Whether two calls may swap places.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Commutes {
    Always,
    Never,
    /// Only when the expression holds.
    When(Expr),
}

/// Decides whether `earlier` and `later` commute under the path sets flowing
/// through `later`.
pub fn commutes(
    earlier: &Call,
    later: &Call,
    sets: &[ConstraintSet],
    solver: &SolverToolbox,
) -> Commutes {
    let sets: Vec<&ConstraintSet> = sets.iter().collect();
    let mut guards = vec![];
    for a in accesses(earlier) {
        for b in accesses(later) {
            if a.resource != b.resource || !(a.writes || b.writes) {
                continue;
            }
            if let (Some(x), Some(y)) = (a.object, b.object) {
                if x != y {
                    if solver.always_not_equal(x, y, &sets) {
                        continue;
                    }
                    if !solver.always_equal(x, y, &sets) {
                        return Commutes::Never;
                    }
                }
            }
            let (Some(ka), Some(kb)) = (a.key, b.key) else {
                return Commutes::Never;
            };
            if ka.width() != kb.width() || solver.always_equal(ka, kb, &sets) {
                return Commutes::Never;
            }
            if !solver.always_not_equal(ka, kb, &sets) {
                guards.push(ka.ne(kb));
            }
        }
    }
    if guards.is_empty() {
        Commutes::Always
    } else {
        Commutes::When(Expr::and_all(guards.iter()))
    }
}

#[cfg(test)]
mod tests {
    use crate::call_path::{Arg, Call};
    use crate::expr::{ConstraintSet, Expr, SolverToolbox};
    use crate::reorder::dependency::{Commutes, commutes};

    fn map_op(name: &str, map: u64, key: Expr) -> Call {
        Call::new(name)
            .with_arg("map", Arg::value(Expr::constant(map, 64)))
            .with_arg("key", Arg::pointer(Expr::constant(0x10, 64), Some(key), None))
    }

    fn k(offset: u32) -> Expr {
        Expr::read_lsb("packet_chunks", offset, 4)
    }

    #[test]
    fn test_map_rules() {
        let s = SolverToolbox::new();
        let sets = [ConstraintSet::empty()];
        assert_eq!(
            commutes(&map_op("map_get", 1, k(0)), &map_op("map_get", 1, k(0)), &sets, &s),
            Commutes::Always
        );
        assert_eq!(
            commutes(&map_op("map_put", 1, k(0)), &map_op("map_get", 1, k(0)), &sets, &s),
            Commutes::Never
        );
        assert_eq!(
            commutes(&map_op("map_put", 1, k(0)), &map_op("map_get", 2, k(0)), &sets, &s),
            Commutes::Always
        );
        assert_eq!(
            commutes(&map_op("map_put", 1, k(0)), &map_op("map_get", 1, k(4)), &sets, &s),
            Commutes::When(k(0).ne(&k(4)))
        );
        let distinct = [ConstraintSet::new([k(0).ne(&k(4))])];
        assert_eq!(
            commutes(&map_op("map_put", 1, k(0)), &map_op("map_get", 1, k(4)), &distinct, &s),
            Commutes::Always
        );
    }

    #[test]
    fn test_chunks_and_dchains_never_commute() {
        let s = SolverToolbox::new();
        let sets = [ConstraintSet::empty()];
        let borrow = Call::new("packet_borrow_next_chunk");
        assert_eq!(commutes(&borrow, &borrow, &sets, &s), Commutes::Never);
        let chain = |n: &str| Call::new(n).with_arg("chain", Arg::value(Expr::constant(7, 64)));
        assert_eq!(
            commutes(&chain("dchain_rejuvenate_index"), &chain("dchain_is_index_allocated"), &sets, &s),
            Commutes::Never
        );
        assert_eq!(
            commutes(&chain("dchain_is_index_allocated"), &chain("dchain_is_index_allocated"), &sets, &s),
            Commutes::Always
        );
        assert_eq!(commutes(&borrow, &Call::new("current_time"), &sets, &s), Commutes::Always);
    }
}
