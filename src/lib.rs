pub mod codec;
pub mod network;
pub mod protocol;
mod service;

pub use codec::{BinaryReader, BinaryWriter, Primitive, StreamReader, StreamWriter};
pub use network::{Address, Admission, Connection, ConnectionId, Connector, Listener, Socket};
pub use protocol::{Protocol, ProtocolFactory, Prototype, SlotGuard, SlotTable};
pub use service::{
    setup_local_tracing, setup_tracing, AppError, AppResult, ConnectionConfig, Context,
    ContextConfig, IoSource, NetworkConfig, ReactorConfig, Registration, Shutdown, SourceId,
};
