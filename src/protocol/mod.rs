//! Request/response protocol shared by the client session and the server

pub mod codec;
pub mod message;
pub mod status;

pub use codec::{decode_frame, encode_frame, read_frame, write_frame, FRAME_MAGIC};
pub use message::{Request, RequestFrame, Response, ResponseBody, ResponseFrame, PROTOCOL_VERSION};
pub use status::Status;
