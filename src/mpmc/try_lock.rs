// Fail-fast mutual exclusion: one CAS attempt, never a wait loop.
//
// The guard releases the flag on drop, so a critical section that bails
// out early can never leave the lock stuck closed.

use std::sync::atomic::{AtomicBool, Ordering};

pub struct TryLock {
   locked: AtomicBool,
}

#[must_use = "the critical section ends when the guard is dropped"]
pub struct TryLockGuard<'a> {
   lock: &'a TryLock,
}

impl TryLock {
   pub const fn new() -> Self {
      Self { locked: AtomicBool::new(false) }
   }

   /// Single acquisition attempt. `None` means another thread holds the
   /// lock right now; the caller is expected to give up, not retry.
   #[inline]
   pub fn try_acquire(&self) -> Option<TryLockGuard<'_>> {
      // Plain load first so contended callers bail without a CAS.
      if self.locked.load(Ordering::Acquire) {
         return None;
      }
      self.locked
         .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
         .ok()?;
      Some(TryLockGuard { lock: self })
   }
}

impl Default for TryLock {
   fn default() -> Self {
      Self::new()
   }
}

impl Drop for TryLockGuard<'_> {
   fn drop(&mut self) {
      // Pairs with the Acquire in `try_acquire`: everything done inside
      // the critical section is visible to the next holder.
      self.lock.locked.store(false, Ordering::Release);
   }
}
