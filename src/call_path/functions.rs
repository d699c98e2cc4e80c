//! Names of the libVig-style API functions the toolchain understands.

pub const MAP_GET: &str = "map_get";
pub const MAP_PUT: &str = "map_put";
pub const MAP_ERASE: &str = "map_erase";
pub const MAP_SIZE: &str = "map_size";
pub const MAP_ALLOCATE: &str = "map_allocate";

pub const VECTOR_BORROW: &str = "vector_borrow";
pub const VECTOR_RETURN: &str = "vector_return";
pub const VECTOR_ALLOCATE: &str = "vector_allocate";

pub const DCHAIN_ALLOCATE: &str = "dchain_allocate";
pub const DCHAIN_ALLOCATE_NEW_INDEX: &str = "dchain_allocate_new_index";
pub const DCHAIN_REJUVENATE_INDEX: &str = "dchain_rejuvenate_index";
pub const DCHAIN_IS_INDEX_ALLOCATED: &str = "dchain_is_index_allocated";
pub const DCHAIN_FREE_INDEX: &str = "dchain_free_index";

pub const EXPIRE_ITEMS_SINGLE_MAP: &str = "expire_items_single_map";
pub const EXPIRE_ITEMS_SINGLE_MAP_ITERATIVELY: &str = "expire_items_single_map_iteratively";

pub const CHT_FILL_CHT: &str = "cht_fill_cht";
pub const CHT_FIND_PREFERRED_AVAILABLE_BACKEND: &str = "cht_find_preferred_available_backend";

pub const SKETCH_ALLOCATE: &str = "sketch_allocate";
pub const SKETCH_COMPUTE_HASHES: &str = "sketch_compute_hashes";
pub const SKETCH_REFRESH: &str = "sketch_refresh";
pub const SKETCH_FETCH: &str = "sketch_fetch";
pub const SKETCH_TOUCH_BUCKETS: &str = "sketch_touch_buckets";
pub const SKETCH_EXPIRE: &str = "sketch_expire";

pub const START_TIME: &str = "start_time";
pub const CURRENT_TIME: &str = "current_time";
pub const RTE_LCORE_COUNT: &str = "rte_lcore_count";

pub const PACKET_RECEIVE: &str = "packet_receive";
pub const PACKET_BORROW_NEXT_CHUNK: &str = "packet_borrow_next_chunk";
pub const PACKET_RETURN_CHUNK: &str = "packet_return_chunk";
pub const PACKET_GET_UNREAD_LENGTH: &str = "packet_get_unread_length";
pub const PACKET_STATE_TOTAL_LENGTH: &str = "packet_state_total_length";
pub const PACKET_SEND: &str = "packet_send";
pub const PACKET_FREE: &str = "packet_free";
pub const PACKET_CLONE: &str = "packet_clone";

pub const LOOP_INVARIANT_CONSUME: &str = "loop_invariant_consume";
pub const LOOP_INVARIANT_PRODUCE: &str = "loop_invariant_produce";

pub const RTE_ETHER_ADDR_HASH: &str = "rte_ether_addr_hash";
pub const LOAD_BALANCED_FLOW_HASH: &str = "LoadBalancedFlow_hash";
pub const HASH_OBJ: &str = "hash_obj";
pub const NF_SET_RTE_IPV4_UDPTCP_CHECKSUM: &str = "nf_set_rte_ipv4_udptcp_checksum";

/// Separates `nf_init` calls from `nf_process` calls in a call path.
pub const INIT_CONTEXT_MARKER: &str = START_TIME;

/// Calls that are never materialized as BDD nodes.
pub const SKIP_FUNCTIONS: &[&str] = &[
    LOOP_INVARIANT_CONSUME,
    LOOP_INVARIANT_PRODUCE,
    PACKET_RECEIVE,
    PACKET_STATE_TOTAL_LENGTH,
    PACKET_FREE,
    PACKET_SEND,
    PACKET_GET_UNREAD_LENGTH,
];

/// Branch conditions over these symbols are elided during construction.
pub const SKIP_CONDITION_SYMBOLS: &[&str] = &["received_a_packet", "loop_termination"];

pub fn is_skip_function(name: &str) -> bool {
    SKIP_FUNCTIONS.contains(&name)
}
