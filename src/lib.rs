pub mod mpmc;

pub use mpmc::BoundedExchangeQueue;
pub use mpmc::{PopError, PushError};
pub use mpmc::{TryLock, TryLockGuard};

/// Common interface for the queues in this crate.
///
/// Both operations are fail-fast: they complete in a bounded number of
/// steps and report failure instead of waiting. Retry policy belongs to
/// the caller.
pub trait MpmcQueue<T: Send>: Send + 'static {
   /// Error on push when the attempt could not proceed.
   type PushError;
   /// Error on pop when the attempt could not proceed.
   type PopError;

   fn push(&self, item: T) -> Result<(), Self::PushError>;
   fn pop(&self) -> Result<T, Self::PopError>;

   /// Fixed number of slots, set at construction.
   fn capacity(&self) -> usize;
}
