mod dial;
mod extract;
mod inject;
mod session;
mod supervisor;

pub use extract::extract_kv;
pub use inject::{apply_local, apply_refresh};
pub use supervisor::{Subscription, SyncPolicy, start};

pub(crate) use dial::dial;
