mod body;
mod consts;
mod controller;
mod error;
mod model;

pub use controller::{SessionController, SessionTuning};
pub use error::SessionError;
pub use model::{ServerInfo, SessionEvent, SessionIdentity, SessionRecord, SessionState};
