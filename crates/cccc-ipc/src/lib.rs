pub mod addr;
pub mod error;
pub mod frames;
pub mod handler;
pub mod server;

pub use addr::AddrDescriptor;
pub use error::{IpcError, Result};
pub use frames::{ErrorBody, PushFrame, Request, Response, ENVELOPE_VERSION};
pub use handler::OpHandler;
pub use server::{IpcServer, Listener};
