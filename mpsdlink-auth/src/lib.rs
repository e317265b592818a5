mod consts;
mod error;
mod identity;
mod pipeline;
mod presenter;
mod token_store;
mod xsts;

pub use error::AuthError;
pub use identity::{Identity, Title};
pub use pipeline::{AuthPipeline, AuthTuning};
pub use presenter::{DeviceCodePrompt, StdoutPresenter, UserCodePresenter};
pub use token_store::{TokenCacheEntry, TokenStore, TokenStoreError};
