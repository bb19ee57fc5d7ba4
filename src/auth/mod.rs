//! Bearer-token authentication middleware.
//!
//! This module provides:
//! - `SignerLayer` - Mints a signed token per outbound call (client side)
//! - `ParserLayer` - Verifies the inbound token and exposes its claims (server side)
//! - `KeyFunc` - Per-token verification key resolution (`StaticKey`, `KeySet`)
//! - `MethodFamily` - The set of signing methods a parser trusts

pub mod keys;
pub mod method;
pub mod parser;
pub mod signer;
pub mod token;

pub use keys::{KeyError, KeyFunc, KeySet, StaticKey};
pub use method::{MethodFamily, parse_algorithm};
pub use parser::{Parser, ParserLayer, ParserService};
pub use signer::{Signer, SignerLayer, SignerService};
pub use token::{BearerToken, Claims, TokenMetadata};

pub use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey};
