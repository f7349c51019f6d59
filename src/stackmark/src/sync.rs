//! Synchronization primitives used by the watermark, swapped for their `loom` counterparts when
//! model checking.
//!
//! The watermark lock must never take part in the safepoint protocol the watermark itself serves:
//! acquiring it cannot poll, block on a safepoint, or re-enter frame processing. Both
//! implementations below are plain mutexes with no such hooks.

cfgenius::cond! {
    if cfg(loom) {
        pub(crate) use loom::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

        mod lock {
            use std::ops::{Deref, DerefMut};

            use loom::sync::atomic::{AtomicUsize, Ordering};

            pub struct NoSafepointLock<T> {
                mutex: loom::sync::Mutex<T>,
                waiters: AtomicUsize,
            }

            impl<T> NoSafepointLock<T> {
                pub fn new(value: T) -> Self {
                    Self {
                        mutex: loom::sync::Mutex::new(value),
                        waiters: AtomicUsize::new(0),
                    }
                }

                pub fn lock(&self) -> NoSafepointGuard<'_, T> {
                    let inner = match self.mutex.try_lock() {
                        Ok(guard) => guard,
                        Err(_) => {
                            self.waiters.fetch_add(1, Ordering::Relaxed);
                            let guard = self.mutex.lock().unwrap();
                            self.waiters.fetch_sub(1, Ordering::Relaxed);
                            guard
                        }
                    };

                    NoSafepointGuard {
                        lock: &self.mutex,
                        inner: Some(inner),
                    }
                }

                pub fn waiters(&self) -> usize {
                    self.waiters.load(Ordering::Relaxed)
                }
            }

            pub struct NoSafepointGuard<'a, T> {
                lock: &'a loom::sync::Mutex<T>,
                inner: Option<loom::sync::MutexGuard<'a, T>>,
            }

            impl<T> NoSafepointGuard<'_, T> {
                pub fn yield_fair(&mut self) {
                    self.inner = None;
                    loom::thread::yield_now();
                    self.inner = Some(self.lock.lock().unwrap());
                }
            }

            impl<T> Deref for NoSafepointGuard<'_, T> {
                type Target = T;

                fn deref(&self) -> &T {
                    self.inner.as_deref().unwrap()
                }
            }

            impl<T> DerefMut for NoSafepointGuard<'_, T> {
                fn deref_mut(&mut self) -> &mut T {
                    self.inner.as_deref_mut().unwrap()
                }
            }
        }
    } else {
        pub(crate) use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

        mod lock {
            use std::ops::{Deref, DerefMut};

            use std::sync::atomic::{AtomicUsize, Ordering};

            use parking_lot::{Mutex, MutexGuard};

            pub struct NoSafepointLock<T> {
                mutex: Mutex<T>,
                waiters: AtomicUsize,
            }

            impl<T> NoSafepointLock<T> {
                pub fn new(value: T) -> Self {
                    Self {
                        mutex: Mutex::new(value),
                        waiters: AtomicUsize::new(0),
                    }
                }

                pub fn lock(&self) -> NoSafepointGuard<'_, T> {
                    if let Some(guard) = self.mutex.try_lock() {
                        return NoSafepointGuard(guard);
                    }

                    self.waiters.fetch_add(1, Ordering::Relaxed);
                    let guard = self.mutex.lock();
                    self.waiters.fetch_sub(1, Ordering::Relaxed);

                    NoSafepointGuard(guard)
                }

                /// Number of threads currently blocked in [`lock`](Self::lock).
                pub fn waiters(&self) -> usize {
                    self.waiters.load(Ordering::Relaxed)
                }
            }

            pub struct NoSafepointGuard<'a, T>(MutexGuard<'a, T>);

            impl<T> NoSafepointGuard<'_, T> {
                /// Releases the lock and immediately reacquires it. If another thread is parked on
                /// the lock, ownership is handed to it first.
                pub fn yield_fair(&mut self) {
                    MutexGuard::unlocked_fair(&mut self.0, || {});
                }
            }

            impl<T> Deref for NoSafepointGuard<'_, T> {
                type Target = T;

                fn deref(&self) -> &T {
                    &self.0
                }
            }

            impl<T> DerefMut for NoSafepointGuard<'_, T> {
                fn deref_mut(&mut self) -> &mut T {
                    &mut self.0
                }
            }
        }
    }
}

pub(crate) use lock::{NoSafepointGuard, NoSafepointLock};
