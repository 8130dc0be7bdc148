//! Client side: transport profiles, the KV session and the command language

pub mod command;
pub mod profile;
pub mod session;
pub mod transport;

pub use command::{Command, CommandOutput};
pub use profile::{TransportProfile, TransportSelection, TRANSPORT_ENV, TRANSPORT_MODE_ENV};
pub use session::{ConnectOptions, Session};
pub use transport::{LoopbackTransport, StreamTransport, Transport};
