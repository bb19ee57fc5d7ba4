//! Transport bridges.
//!
//! The pipeline itself is transport-agnostic. A bridge satisfies the parser's
//! precondition on the server side (token placed in the context) and encodes
//! the signer's token on the client side.

pub mod grpc;
