mod coordinator;
mod scheduler;
mod transport;

pub use coordinator::{RefreshCoordinator, SessionExpiredHook};
pub use scheduler::{Clock, RefreshScheduler, SystemClock};
pub use transport::{HttpRefresher, RefreshFuture, Refresher};
