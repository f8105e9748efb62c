pub mod authenticator;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod guard;
pub mod http_gate;
pub mod logging;
pub mod monitor;
pub mod params;
pub mod registry;
pub mod relay;
pub mod settings;
pub mod validator;

pub use config::Config;
pub use connection::{AuthContext, ConnectExtras, Connection, Protocol, ProtocolTag, Role, SessionState};
pub use dispatch::AuthenticatorDispatch;
pub use error::{Error, Result};
pub use monitor::AppEventMonitor;
pub use registry::ScopeAuthRegistry;
pub use settings::AuthSettings;
pub use validator::{AuthValidator, StreamAuthorizer, ValidatorCatalog};
