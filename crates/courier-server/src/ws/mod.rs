//! WebSocket command surface.
//!
//! | Module       | Responsibility                                          |
//! |--------------|---------------------------------------------------------|
//! | `connection` | Per-client handle with bounded outbound queue           |
//! | `envelope`   | Inbound command shape and reply payload helpers         |
//! | `handler`    | Action dispatch onto the lifecycle manager              |
//! | `socket`     | Upgrade, reader/writer tasks, heartbeat, idle timeout   |

pub mod connection;
pub mod envelope;
pub mod handler;
pub mod socket;

pub use connection::{ClientConnection, ConnectionRegistry};
pub use socket::ws_handler;
