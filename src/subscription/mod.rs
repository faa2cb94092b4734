// Live change-event feed over WebSocket

pub mod manager;
pub mod protocol;

pub use manager::ConnectionManager;
pub use protocol::{ChangeEventMessage, ClientMessage, ResyncMessage};
