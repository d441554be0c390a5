//! Owns everything upstream of the transport: persistence (§4.E), the
//! single current-game runtime (§4.F), session arbitration (§4.H), and the
//! message dispatcher (§4.I) that ties the runtime and the engine driver
//! together. No network code lives here — `shogi-cli` drives this crate
//! through a line-oriented harness instead of a real socket.

pub mod config;
pub mod dispatch;
pub mod message;
pub mod runtime;
pub mod session;
pub mod store;

pub use config::Config;
pub use dispatch::{Channel, Dispatcher};
pub use message::{InboundEnvelope, InboundMessage, OutboundMessage};
pub use runtime::Runtime;
pub use session::SessionArbiter;
pub use store::{GameStore, GameSummary, MemoryStore};
