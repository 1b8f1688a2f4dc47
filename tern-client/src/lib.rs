//! Client-side request batching runtime for TernDB.
//!
//! One batcher turns a heterogeneous set of per-row operations into the
//! minimum number of per-tablet RPCs while preserving submission order
//! for operations of the same partition key. Data flows linearly:
//! add, flush, resolve tablets, group, prepare the transaction, dispatch,
//! merge responses, complete. Control flow is event driven; every stage
//! is advanced by an external completion callback.
//!
//! The surrounding system stays behind traits: the tablet-location cache
//! ([`meta_cache::MetaCache`]), the transport ([`rpc::RpcMessenger`]),
//! the transaction ([`transaction::BatchTransaction`]), the owning
//! session ([`session::SessionHooks`]), and process-wide client services
//! ([`client::ClientContext`]).

pub mod batcher;
pub mod callback_pool;
pub mod client;
pub mod clock;
pub mod error_collector;
pub mod in_flight_op;
pub mod meta_cache;
pub mod op;
pub mod read_point;
pub mod rpc;
pub mod session;
pub mod table;
pub mod trace;
pub mod transaction;

pub use batcher::{Batcher, BatcherState, FlushCallback};
pub use error_collector::{CollectedErrors, OperationError};
pub use op::{OpGroup, Operation};
pub use session::should_session_retry;
