use std::ops::{Deref, DerefMut};

use parking_lot::{Condvar, Mutex};

struct PoolState<T> {
    idle: Vec<T>,
    created: usize,
}

/// Fixed-capacity pool of expensive helper objects.
///
/// Objects are created lazily by the factory until `capacity` exist; after
/// that, [`acquire`](Self::acquire) blocks until another caller returns one.
/// At most `capacity` objects are ever in use at the same time.
pub struct BoundedPool<T> {
    state: Mutex<PoolState<T>>,
    available: Condvar,
    capacity: usize,
    factory: Box<dyn Fn() -> T + Send + Sync>,
}

impl<T> BoundedPool<T> {
    /// Creates an empty pool. A `capacity` of zero is raised to one.
    pub fn new(capacity: usize, factory: impl Fn() -> T + Send + Sync + 'static) -> Self {
        Self {
            state: Mutex::new(PoolState {
                idle: Vec::new(),
                created: 0,
            }),
            available: Condvar::new(),
            capacity: capacity.max(1),
            factory: Box::new(factory),
        }
    }

    /// Default capacity: twice the available parallelism.
    #[must_use]
    pub fn default_capacity() -> usize {
        std::thread::available_parallelism().map_or(2, |n| n.get() * 2)
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of objects created so far.
    #[must_use]
    pub fn created(&self) -> usize {
        self.state.lock().created
    }

    /// Takes an object, creating one if under capacity, otherwise waiting.
    pub fn acquire(&self) -> PoolGuard<'_, T> {
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.idle.pop() {
                return PoolGuard {
                    pool: self,
                    item: Some(item),
                };
            }
            if state.created < self.capacity {
                state.created += 1;
                drop(state);
                let reservation = Reservation { pool: self };
                let item = (self.factory)();
                std::mem::forget(reservation);
                return PoolGuard {
                    pool: self,
                    item: Some(item),
                };
            }
            self.available.wait(&mut state);
        }
    }

    fn release(&self, item: T) {
        self.state.lock().idle.push(item);
        self.available.notify_one();
    }
}

/// A creation slot taken ahead of calling the factory. Dropped only when the
/// factory unwinds, in which case the slot is given back.
struct Reservation<'a, T> {
    pool: &'a BoundedPool<T>,
}

impl<T> Drop for Reservation<'_, T> {
    fn drop(&mut self) {
        self.pool.state.lock().created -= 1;
        self.pool.available.notify_one();
    }
}

/// RAII handle; returns the object to the pool on drop.
pub struct PoolGuard<'a, T> {
    pool: &'a BoundedPool<T>,
    item: Option<T>,
}

impl<T> Deref for PoolGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // `item` is only `None` after drop.
        self.item.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl<T> DerefMut for PoolGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.item.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl<T> Drop for PoolGuard<'_, T> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            self.pool.release(item);
        }
    }
}
