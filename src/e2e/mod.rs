//! Black-box conformance harness driving the server and client binaries

pub mod discovery;
pub mod guard;
pub mod harness;
pub mod outcome;
pub mod script;

pub use discovery::{discover, find_fabric_device, interface_address, Endpoint};
pub use guard::RunGuard;
pub use harness::{Harness, ProfileReport, CLIENT_BIN, MEMFILE_BIN, SERVER_BIN};
pub use outcome::{parse_outcome, Outcome};
pub use script::{conformance_script, Step};
