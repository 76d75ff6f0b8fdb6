//! kvdriver client: transport contract, bounded fan-out and key-value
//! commands on top of `kvdriver-core`.

pub mod command;
pub mod config;
pub mod error;
pub mod fan_out;
pub mod logging;
pub mod multi;
pub mod observer;
pub mod transport;

pub use command::{
    Command, DeleteValue, FetchOutput, FetchReply, FetchValue, ListKeys, ListKeysReply,
    StoreValue,
};
pub use config::{DriverConfig, FanOutConfig, DEFAULT_MAX_IN_FLIGHT};
pub use error::ClientError;
pub use fan_out::{BatchHandle, FanOutCoordinator, ItemHandle};
pub use logging::{init_tracing, LogFormat};
pub use multi::{MultiCommand, MultiDelete, MultiFetch, MultiStore};
pub use observer::{BatchObserver, CompositeObserver, NoopObserver, TracingObserver};
pub use transport::{execute, execute_streaming, Transport};
