// ssdb-proto - Frame codec for the length-prefixed SSDB wire protocol
//
// This crate only encodes and decodes bytes; sockets live in ssdb-client.

pub mod error;
pub mod frame;
pub mod value;
pub mod zip;

// Re-export for convenience
pub use error::*;
pub use frame::*;
pub use value::*;
pub use zip::*;
