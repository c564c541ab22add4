// areawatch-core: real-time synchronized session between the wire protocol and UI surfaces.

pub mod auth;
pub mod config;
pub mod connection;
pub mod convert;
pub mod error;
pub mod model;
pub mod query;
pub mod session;
pub mod status;
pub mod store;
pub mod stream;

// ── Primary re-exports ──────────────────────────────────────────────
pub use auth::AuthState;
pub use config::{AuthCredential, ReconnectConfig, SessionConfig};
pub use connection::ConnectionState;
pub use error::SessionError;
pub use model::{AreaRecord, AreaUpdate, CountryId, UpdateSource};
pub use session::Session;
pub use status::{QueryActivity, SessionStatus};
pub use store::{AreaReader, AreaSnapshot, ObserverId};
pub use stream::{AreaFilter, AreaStream};
