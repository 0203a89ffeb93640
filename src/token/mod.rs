mod claims;
mod store;

pub use claims::token_expiry;
pub use store::{MemoryTokenStore, TokenStore};
