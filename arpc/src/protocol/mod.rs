pub mod header;

pub use header::{HEADER_SIZE, MessageHeader, MessageKind};
