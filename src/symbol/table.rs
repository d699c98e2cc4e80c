//! Which symbols each known API call produces.

use crate::call_path::Call;
use crate::call_path::functions::*;
use crate::error::SynapseError;
use crate::expr::{ConstraintSet, Expr, SolverToolbox};

/// A symbol a call produces, before labelling.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Produced {
    pub base: &'static str,
    pub expr: Expr,
    pub addr: Option<Expr>,
}

/// Information a producer may consult beyond the call itself.
pub struct ProductionContext<'a> {
    pub constraints: &'a [ConstraintSet],
    /// Without a solver, conditional symbols are assumed present.
    pub solver: Option<&'a SolverToolbox>,
}

type Producer = fn(&Call, &ProductionContext) -> Vec<Produced>;

fn nothing(_: &Call, _: &ProductionContext) -> Vec<Produced> {
    vec![]
}

fn from_ret(base: &'static str) -> impl Fn(&Call) -> Vec<Produced> {
    move |call| {
        call.ret
            .iter()
            .map(|r| Produced {
                base,
                expr: r.clone(),
                addr: None,
            })
            .collect()
    }
}

fn map_get(call: &Call, ctx: &ProductionContext) -> Vec<Produced> {
    let mut out = from_ret("map_has_this_key")(call);
    let Some(ret) = &call.ret else {
        return out;
    };
    // The builder only keeps `value_out` on hits; here a lookup is a miss
    // only when every path proves it.
    let zero = Expr::constant(0, ret.width());
    let found = match ctx.solver {
        _ if ret.is_constant() => ret.as_constant().is_some_and(|v| v != 0),
        Some(s) if !ctx.constraints.is_empty() => ctx
            .constraints
            .iter()
            .any(|c| !s.is_always_true(c, &ret.eq(&zero))),
        _ => true,
    };
    if found {
        if let Some(v) = call.arg_out("value_out") {
            out.push(Produced {
                base: "allocated_index",
                expr: v.clone(),
                addr: None,
            });
        }
    }
    out
}

fn dchain_allocate_new_index(call: &Call, ctx: &ProductionContext) -> Vec<Produced> {
    let mut out = vec![];
    if let Some(ret) = &call.ret {
        let mentioned = ret
            .single_array()
            .is_some_and(|a| ctx.constraints.iter().any(|c| c.arrays().contains(&a)));
        if mentioned {
            out.push(Produced {
                base: "out_of_space",
                expr: ret.clone(),
                addr: None,
            });
        }
    }
    if let Some(idx) = call.arg_out("index_out") {
        out.push(Produced {
            base: "new_index",
            expr: idx.clone(),
            addr: None,
        });
    }
    out
}

fn packet_borrow_next_chunk(call: &Call, _: &ProductionContext) -> Vec<Produced> {
    call.extra_out("the_chunk")
        .map(|chunk| Produced {
            base: "packet_chunks",
            expr: chunk.clone(),
            addr: call.arg_out("chunk").cloned(),
        })
        .into_iter()
        .collect()
}

fn vector_borrow(call: &Call, _: &ProductionContext) -> Vec<Produced> {
    call.extra_out("borrowed_cell")
        .map(|cell| Produced {
            base: "vector_data_reset",
            expr: cell.clone(),
            addr: call.arg_out("val_out").cloned(),
        })
        .into_iter()
        .collect()
}

fn cht_find_preferred_available_backend(call: &Call, _: &ProductionContext) -> Vec<Produced> {
    let mut out = from_ret("prefered_backend_found")(call);
    if let Some(b) = call.arg_out("chosen_backend") {
        out.push(Produced {
            base: "chosen_backend",
            expr: b.clone(),
            addr: None,
        });
    }
    out
}

macro_rules! ret_producer {
    ($name:ident, $base:literal) => {
        fn $name(call: &Call, _: &ProductionContext) -> Vec<Produced> {
            from_ret($base)(call)
        }
    };
}

ret_producer!(map_size, "map_size");
ret_producer!(map_allocate, "map_allocation_succeeded");
ret_producer!(vector_allocate, "vector_alloc_success");
ret_producer!(dchain_allocate, "is_dchain_allocated");
ret_producer!(dchain_is_index_allocated, "dchain_is_index_allocated");
ret_producer!(expire_items, "number_of_freed_flows");
ret_producer!(cht_fill_cht, "cht_fill_cht_successful");
ret_producer!(time, "next_time");
ret_producer!(lcore_count, "lcores");
ret_producer!(ether_hash, "rte_ether_addr_hash");
ret_producer!(lb_flow_hash, "LoadBalancedFlow_hash");
ret_producer!(hash_obj, "hash");
ret_producer!(checksum, "checksum");
ret_producer!(sketch_allocate, "sketch_allocation_succeeded");
ret_producer!(sketch_fetch, "overflow");

const TABLE: &[(&str, Producer)] = &[
    (MAP_GET, map_get),
    (MAP_PUT, nothing),
    (MAP_ERASE, nothing),
    (MAP_SIZE, map_size),
    (MAP_ALLOCATE, map_allocate),
    (VECTOR_BORROW, vector_borrow),
    (VECTOR_RETURN, nothing),
    (VECTOR_ALLOCATE, vector_allocate),
    (DCHAIN_ALLOCATE, dchain_allocate),
    (DCHAIN_ALLOCATE_NEW_INDEX, dchain_allocate_new_index),
    (DCHAIN_REJUVENATE_INDEX, nothing),
    (DCHAIN_IS_INDEX_ALLOCATED, dchain_is_index_allocated),
    (DCHAIN_FREE_INDEX, nothing),
    (EXPIRE_ITEMS_SINGLE_MAP, expire_items),
    (EXPIRE_ITEMS_SINGLE_MAP_ITERATIVELY, expire_items),
    (CHT_FILL_CHT, cht_fill_cht),
    (
        CHT_FIND_PREFERRED_AVAILABLE_BACKEND,
        cht_find_preferred_available_backend,
    ),
    (SKETCH_ALLOCATE, sketch_allocate),
    (SKETCH_COMPUTE_HASHES, nothing),
    (SKETCH_REFRESH, nothing),
    (SKETCH_FETCH, sketch_fetch),
    (SKETCH_TOUCH_BUCKETS, nothing),
    (SKETCH_EXPIRE, nothing),
    (START_TIME, time),
    (CURRENT_TIME, time),
    (RTE_LCORE_COUNT, lcore_count),
    (PACKET_RECEIVE, nothing),
    (PACKET_BORROW_NEXT_CHUNK, packet_borrow_next_chunk),
    (PACKET_RETURN_CHUNK, nothing),
    (PACKET_GET_UNREAD_LENGTH, nothing),
    (PACKET_STATE_TOTAL_LENGTH, nothing),
    (PACKET_SEND, nothing),
    (PACKET_FREE, nothing),
    (PACKET_CLONE, nothing),
    (LOOP_INVARIANT_CONSUME, nothing),
    (LOOP_INVARIANT_PRODUCE, nothing),
    (RTE_ETHER_ADDR_HASH, ether_hash),
    (LOAD_BALANCED_FLOW_HASH, lb_flow_hash),
    (HASH_OBJ, hash_obj),
    (NF_SET_RTE_IPV4_UDPTCP_CHECKSUM, checksum),
];

/// Symbols `call` produces, in table order.
pub fn produced(call: &Call, ctx: &ProductionContext) -> Result<Vec<Produced>, SynapseError> {
    let (_, producer) = TABLE
        .iter()
        .find(|(n, _)| *n == call.function_name)
        .ok_or_else(|| SynapseError::UnknownFunction(call.function_name.clone()))?;
    Ok(producer(call, ctx))
}

/// Whether `call` changes state observable by later calls.
pub fn has_side_effects(function_name: &str) -> bool {
    matches!(
        function_name,
        MAP_PUT
            | MAP_ERASE
            | MAP_ALLOCATE
            | VECTOR_RETURN
            | VECTOR_ALLOCATE
            | DCHAIN_ALLOCATE
            | DCHAIN_ALLOCATE_NEW_INDEX
            | DCHAIN_REJUVENATE_INDEX
            | DCHAIN_FREE_INDEX
            | EXPIRE_ITEMS_SINGLE_MAP
            | EXPIRE_ITEMS_SINGLE_MAP_ITERATIVELY
            | CHT_FILL_CHT
            | SKETCH_ALLOCATE
            | SKETCH_COMPUTE_HASHES
            | SKETCH_REFRESH
            | SKETCH_TOUCH_BUCKETS
            | SKETCH_EXPIRE
            | PACKET_BORROW_NEXT_CHUNK
            | PACKET_RETURN_CHUNK
            | PACKET_SEND
            | PACKET_FREE
            | PACKET_CLONE
            | NF_SET_RTE_IPV4_UDPTCP_CHECKSUM
    )
}
