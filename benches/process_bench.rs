#![allow(clippy::cast_possible_truncation)]

use criterion::{criterion_group, criterion_main, Criterion};
use std::time::Duration;
use nix::{
   libc,
   sys::wait::waitpid,
   unistd::{fork, ForkResult},
};

use exchange_queue::{BoundedExchangeQueue, MpmcQueue};
use std::sync::atomic::{AtomicU32, Ordering};

const RING_CAP: usize = 1024;
const ITERS: usize = 1_000_000;

// mmap / munmap helpers
unsafe fn map_shared(bytes: usize) -> *mut u8 {
   let ptr = libc::mmap(
      std::ptr::null_mut(),
      bytes,
      libc::PROT_READ | libc::PROT_WRITE,
      libc::MAP_SHARED | libc::MAP_ANONYMOUS,
      -1,
      0,
   );
   if ptr == libc::MAP_FAILED {
      panic!("mmap failed: {}", std::io::Error::last_os_error());
   }
   ptr.cast()
}

unsafe fn unmap_shared(ptr: *mut u8, len: usize) {
   let ret = libc::munmap(ptr.cast(), len);
   assert_eq!(ret, 0, "munmap failed: {}", std::io::Error::last_os_error());
}

// One producer process, one consumer process, queue in a MAP_SHARED
// region. Both sides run the fail-fast calls in a retry loop, which is
// exactly the caller-side policy the queue pushes outward.
fn fork_and_run(q: &'static BoundedExchangeQueue<usize>) -> std::time::Duration {
   let page_size = 4096;
   let sync_shm = unsafe {
      libc::mmap(
         std::ptr::null_mut(),
         page_size,
         libc::PROT_READ | libc::PROT_WRITE,
         libc::MAP_SHARED | libc::MAP_ANONYMOUS,
         -1,
         0,
      )
   };

   if sync_shm == libc::MAP_FAILED {
      panic!("mmap for sync_shm failed: {}", std::io::Error::last_os_error());
   }

   let sync_atomic_flag = unsafe { &*(sync_shm as *const AtomicU32) };
   sync_atomic_flag.store(0, Ordering::Relaxed);

   match unsafe { fork() }.expect("fork failed") {
      ForkResult::Child => {
         sync_atomic_flag.store(1, Ordering::Release);
         while sync_atomic_flag.load(Ordering::Acquire) < 2 {
            std::hint::spin_loop();
         }

         for i in 0..ITERS {
            while q.push(i).is_err() {
               std::hint::spin_loop();
            }
         }

         sync_atomic_flag.store(3, Ordering::Release);
         unsafe { libc::_exit(0) };
      }
      ForkResult::Parent { child } => {
         while sync_atomic_flag.load(Ordering::Acquire) < 1 {
            std::hint::spin_loop();
         }

         sync_atomic_flag.store(2, Ordering::Release);

         let start_time = std::time::Instant::now();
         let mut consumed_count = 0;

         while consumed_count < ITERS {
            if let Ok(_item) = q.pop() {
               consumed_count += 1;
            } else if sync_atomic_flag.load(Ordering::Acquire) == 3 {
               // Producer is done; one last check for a straggler.
               if q.pop().is_err() {
                  break;
               }
               consumed_count += 1;
            } else {
               std::hint::spin_loop();
            }
         }

         let duration = start_time.elapsed();

         while sync_atomic_flag.load(Ordering::Acquire) != 3 {
            std::hint::spin_loop();
         }
         let _ = waitpid(child, None).expect("waitpid failed");

         unsafe {
            libc::munmap(sync_shm as *mut libc::c_void, page_size);
         }

         if consumed_count < ITERS {
            eprintln!(
               "Warning: Parent consumed {}/{} items.",
               consumed_count, ITERS
            );
         }
         duration
      }
   }
}

fn bench_exchange(c: &mut Criterion) {
   c.bench_function("BoundedExchange (process)", |b| {
      b.iter(|| {
         let bytes = BoundedExchangeQueue::<usize>::shared_size(RING_CAP);
         let shm_ptr = unsafe { map_shared(bytes) };
         let q = unsafe { BoundedExchangeQueue::init_in_shared(shm_ptr, RING_CAP) };
         let dur = fork_and_run(q);
         unsafe { unmap_shared(shm_ptr, bytes) };
         dur
      })
   });
}

// Criterion setup
fn custom_criterion() -> Criterion {
   Criterion::default()
      .warm_up_time(Duration::from_secs(5))
      .measurement_time(Duration::from_secs(20))
      .sample_size(150)
}

criterion_group! {
   name = benches;
   config = custom_criterion();
   targets = bench_exchange
}
criterion_main!(benches);
