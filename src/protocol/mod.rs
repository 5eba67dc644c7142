//! Client-side WebSocket wire plumbing (RFC 6455 subset).
//!
//! Only what a load-driving client needs: the upgrade handshake, masked
//! outgoing frames, and decoding of the unmasked frames a server sends
//! back. No extensions, no fragmented sends, no server role.

pub mod frame;
pub mod handshake;
pub mod opcode;

pub use frame::{Frame, MaskSource};
pub use handshake::{UpgradeRequest, UpgradeResponse, WS_GUID, accept_for};
pub use opcode::OpCode;
