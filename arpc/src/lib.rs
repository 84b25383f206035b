pub mod codec;
pub mod collective;
pub mod config;
pub mod error;
pub mod pool;
pub mod protocol;
pub mod rpc;
pub mod transport;
pub mod types;

pub use codec::{Decode, Encode};
pub use config::ArpcConfig;
pub use error::{ArpcError, Result};
pub use pool::ExecutionPool;
pub use protocol::{MessageHeader, MessageKind};
pub use rpc::{RemoteFunction, Response};
pub use transport::{Channel, MemoryTransport, TcpTransport, Transport};
pub use types::{CallableKey, CorrelationId, FunctionId, Rank};
