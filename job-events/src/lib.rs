pub mod compression;
pub mod pool;
pub mod sse;

pub use pool::{BusConfig, Connection, ConnectionId, EventBus};
