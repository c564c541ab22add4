// areawatch-api: wire protocol and transports for the country-area sync server

pub mod error;
#[cfg(any(test, feature = "test-util"))]
pub mod memory;
pub mod protocol;
pub mod transport;
pub mod websocket;

pub use error::Error;
pub use protocol::{ClientEvent, Credential, ServerEvent, WireRecord};
pub use transport::{Connector, EventReceiver, EventSender, Link, TransportEvent};
pub use websocket::WebSocketConnector;
