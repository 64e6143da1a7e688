mod exchange;
mod try_lock;

pub use exchange::{BoundedExchangeQueue, PopError, PushError};
pub use try_lock::{TryLock, TryLockGuard};
