/// Rank of a participating process (0-indexed).
pub type Rank = u32;

/// Identifier of a registered remote function.
///
/// Assigned by each process independently; agreement across ranks relies on
/// every rank registering the same functions in the same order.
pub type FunctionId = u32;

/// Per-call identifier binding an outbound request to its response handler.
pub type CorrelationId = u64;

/// Identity of a `RemoteFunction` object, stable for its whole lifetime.
///
/// Used by the registry to reject registering the same function twice.
pub type CallableKey = u64;

/// Function ids `0..=RESERVED_FUNCTION_IDS` are never assigned.
pub const RESERVED_FUNCTION_IDS: FunctionId = 2;

/// First id handed out by a fresh registry.
pub const FIRST_FUNCTION_ID: FunctionId = RESERVED_FUNCTION_IDS + 1;
