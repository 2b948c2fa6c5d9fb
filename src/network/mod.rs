//! Network Layer
//!
//! WebSocket server for real-time client communication.
//! This layer holds no game state - every decision runs through `game/`.

pub mod protocol;
pub mod server;

pub use protocol::{ClientMessage, ErrorCode, ServerError, ServerMessage};
pub use server::{GameServer, GameServerError, ServerConfig};
