// Bounded fail-fast exchange queue
//
// A circular buffer where producers compete for one exclusion flag and
// consumers for the other, so the two sides never wait on each other.
// Each slot carries its own emptiness marker, which doubles as the
// producer/consumer synchronization point: a consumer that observes
// OCCUPIED with Acquire is guaranteed to see the payload written before
// the producer's Release store, and vice versa for EMPTY.
//
// Fullness is detected per slot, not by cursor distance, so all
// `capacity` slots can hold live items at once.

use crate::mpmc::TryLock;
use crate::MpmcQueue;
use core::{cell::UnsafeCell, fmt, mem::MaybeUninit, ptr};
use crossbeam::utils::CachePadded;
use std::sync::atomic::{AtomicU8, Ordering};

const EMPTY: u8 = 0;
const OCCUPIED: u8 = 1;

// One storage cell, padded to a cache line so adjacent slots touched by
// producer and consumer never share one.
#[repr(align(64))]
struct Slot<T> {
   state: AtomicU8,
   payload: UnsafeCell<MaybeUninit<T>>,
}

impl<T> Slot<T> {
   fn vacant() -> Self {
      Slot {
         state: AtomicU8::new(EMPTY),
         payload: UnsafeCell::new(MaybeUninit::uninit()),
      }
   }
}

pub struct BoundedExchangeQueue<T: Send + 'static> {
   capacity: usize,
   buffer: *mut Slot<T>,
   owns_buffer: bool,
   // Cursors are plain memory: only the holder of the matching lock
   // touches them, and the lock's Acquire/Release pair orders the
   // accesses across holders.
   enq_pos: UnsafeCell<usize>,
   deq_pos: UnsafeCell<usize>,
   enq_lock: CachePadded<TryLock>,
   deq_lock: CachePadded<TryLock>,
}

unsafe impl<T: Send + 'static> Send for BoundedExchangeQueue<T> {}
unsafe impl<T: Send + 'static> Sync for BoundedExchangeQueue<T> {}

/// Push failure. The rejected item is handed back; the caller cannot
/// tell a full slot from a lost race on the producer lock, by design.
#[derive(Debug, PartialEq, Eq)]
pub struct PushError<T>(pub T);

/// Pop failure: empty slot at the cursor, or a lost race on the
/// consumer lock.
#[derive(Debug, PartialEq, Eq)]
pub struct PopError;

impl<T> fmt::Display for PushError<T> {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      write!(f, "queue could not accept the item")
   }
}

impl fmt::Display for PopError {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      write!(f, "queue had no item to hand out")
   }
}

impl<T: Send + 'static> BoundedExchangeQueue<T> {
   /// Build a queue in process-local memory.
   ///
   /// `capacity` may be any non-zero value; it does not have to be a
   /// power of two because the cursors wrap by comparison, not masking.
   pub fn with_capacity(capacity: usize) -> Self {
      assert!(capacity > 0, "capacity must be non-zero");

      let mut buf: Vec<Slot<T>> = (0..capacity).map(|_| Slot::vacant()).collect();
      let ptr = buf.as_mut_ptr();
      core::mem::forget(buf); // ownership transferred to struct

      Self {
         capacity,
         buffer: ptr,
         owns_buffer: true,
         enq_pos: UnsafeCell::new(0),
         deq_pos: UnsafeCell::new(0),
         enq_lock: CachePadded::new(TryLock::new()),
         deq_lock: CachePadded::new(TryLock::new()),
      }
   }

   // Bytes required to place this queue in shared memory.
   pub fn shared_size(capacity: usize) -> usize {
      assert!(capacity > 0);
      let self_layout = core::alloc::Layout::new::<Self>();
      let buf_layout = core::alloc::Layout::array::<Slot<T>>(capacity).unwrap();
      self_layout.extend(buf_layout).unwrap().0.size()
   }

   // Construct in user-provided shared memory region (e.g. `mmap`).
   // The caller must guarantee the memory lives for `'static`.
   pub unsafe fn init_in_shared(mem: *mut u8, capacity: usize) -> &'static mut Self {
      assert!(capacity > 0);

      let queue_ptr = mem as *mut Self;
      let buf_ptr = mem.add(core::mem::size_of::<Self>()) as *mut Slot<T>;

      for i in 0..capacity {
         ptr::write(buf_ptr.add(i), Slot::vacant());
      }

      ptr::write(
         queue_ptr,
         Self {
            capacity,
            buffer: buf_ptr,
            owns_buffer: false,
            enq_pos: UnsafeCell::new(0),
            deq_pos: UnsafeCell::new(0),
            enq_lock: CachePadded::new(TryLock::new()),
            deq_lock: CachePadded::new(TryLock::new()),
         },
      );
      &mut *queue_ptr
   }

   #[inline]
   fn slot(&self, index: usize) -> &Slot<T> {
      debug_assert!(index < self.capacity);
      unsafe { &*self.buffer.add(index) }
   }
}

impl<T: Send + 'static> MpmcQueue<T> for BoundedExchangeQueue<T> {
   type PushError = PushError<T>;
   type PopError = PopError;

   #[inline]
   fn push(&self, item: T) -> Result<(), PushError<T>> {
      // One shot at the producer lock; losing the race is a normal
      // outcome, not something to retry here.
      let _guard = match self.enq_lock.try_acquire() {
         Some(guard) => guard,
         None => return Err(PushError(item)),
      };

      // SAFETY: the guard gives exclusive access to the enqueue cursor.
      let pos = unsafe { &mut *self.enq_pos.get() };
      if *pos >= self.capacity {
         *pos = 0; // wrap lazily, on next use
      }

      let slot = self.slot(*pos);
      if slot.state.load(Ordering::Acquire) != EMPTY {
         // Full at the cursor; the guard unlocks on drop.
         return Err(PushError(item));
      }

      // SAFETY: EMPTY plus the enqueue lock means nothing else touches
      // this payload until the Release store below publishes it.
      unsafe { (*slot.payload.get()).write(item) };
      *pos += 1;
      slot.state.store(OCCUPIED, Ordering::Release);
      Ok(())
   }

   #[inline]
   fn pop(&self) -> Result<T, PopError> {
      let _guard = match self.deq_lock.try_acquire() {
         Some(guard) => guard,
         None => return Err(PopError),
      };

      // SAFETY: the guard gives exclusive access to the dequeue cursor.
      let pos = unsafe { &mut *self.deq_pos.get() };
      if *pos >= self.capacity {
         *pos = 0;
      }

      let slot = self.slot(*pos);
      if slot.state.load(Ordering::Acquire) != OCCUPIED {
         return Err(PopError); // empty at the cursor
      }

      // SAFETY: OCCUPIED plus the dequeue lock; the Acquire load above
      // makes the producer's payload write visible here.
      let value = unsafe { (*slot.payload.get()).assume_init_read() };
      *pos += 1;
      // Release hands the slot back to the producer side for reuse.
      slot.state.store(EMPTY, Ordering::Release);
      Ok(value)
   }

   #[inline]
   fn capacity(&self) -> usize {
      self.capacity
   }
}

impl<T: Send + 'static> Drop for BoundedExchangeQueue<T> {
   fn drop(&mut self) {
      if self.owns_buffer {
         // Occupied slots still own live payloads; empty ones never do.
         if core::mem::needs_drop::<T>() {
            for i in 0..self.capacity {
               let slot = self.slot(i);
               if slot.state.load(Ordering::Relaxed) == OCCUPIED {
                  unsafe { ptr::drop_in_place((*slot.payload.get()).as_mut_ptr()) };
               }
            }
         }
         unsafe {
            // Reconstitute the Vec and let it deallocate.
            let slice = core::slice::from_raw_parts_mut(self.buffer, self.capacity);
            drop(Box::from_raw(slice));
         }
      }
   }
}

impl<T: Send + 'static> fmt::Debug for BoundedExchangeQueue<T> {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.debug_struct("BoundedExchangeQueue")
         .field("capacity", &self.capacity)
         .field("enq_pos", unsafe { &*self.enq_pos.get() })
         .field("deq_pos", unsafe { &*self.deq_pos.get() })
         .field("owns_buffer", &self.owns_buffer)
         .finish()
   }
}
