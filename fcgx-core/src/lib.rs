//! Client side of the FastCGI protocol.
//!
//! A request is turned into PARAMS and STDIN record streams, written to a
//! byte-stream connection, and the application's STDOUT is collected until
//! FCGI_END_REQUEST and parsed back into an HTTP response.

pub mod chunked;
pub mod client;
pub mod context;
pub mod demux;
pub mod error;
pub mod params;
pub mod record;
pub mod response;
pub mod stream;
pub mod transport;

pub use client::FastCgiClient;
pub use context::{FcgiRequest, ServerInfo, DEFAULT_REQUEST_ID};
pub use demux::RawResponse;
pub use error::{Error, Result};
pub use response::{Response, ResponseBody, ResponseFormat};
pub use transport::{Backend, FastCgiStream};
