//! Types shared between the doubtroom storage layer and the real-time server:
//! identifiers, the WebSocket wire protocol, message encryption and signed
//! connection tokens.

pub mod constants;
pub mod crypto;
pub mod error;
pub mod protocol;
pub mod token;
pub mod types;
