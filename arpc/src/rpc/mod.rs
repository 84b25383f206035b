pub mod correlation;
pub(crate) mod engine;
pub mod function;
pub mod handler;
pub mod registry;
pub mod response;

pub use correlation::CorrelationTable;
pub use function::RemoteFunction;
pub use handler::{GatherHandler, ResponseHandler, SingleHandler};
pub use registry::{CallableEntry, CallableRegistry, InvokeError, Invoker};
pub use response::Response;
