use core::cell::UnsafeCell;
use core::fmt;
use core::mem;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

const NO_CPU: usize = usize::MAX;

/// Per-CPU interrupt bookkeeping a spin lock needs.
///
/// `push_off`/`pop_off` nest like `intr_off`/`intr_on`: interrupts stay
/// disabled until the outermost `pop_off`, which restores the state seen
/// by the outermost `push_off`.
pub trait CpuLocal: Sync {
    fn cpu_id(&self) -> usize;
    fn push_off(&self);
    fn pop_off(&self);
}

/// A spin-based mutex that records its holder CPU.
///
/// Acquiring disables interrupts on the calling CPU for as long as the
/// guard lives, so an interrupt handler on the same CPU can never spin on
/// a lock its own CPU already holds. Re-acquiring a lock on the holder CPU
/// and releasing a lock the CPU does not hold are kernel bugs and panic.
pub struct SpinLock<T> {
    name: &'static str,
    locked: AtomicBool,
    cpu: AtomicUsize,
    data: UnsafeCell<T>,
}

/// RAII guard for SpinLock
pub struct SpinLockGuard<'a, T> {
    lock: &'a SpinLock<T>,
    cpus: &'a dyn CpuLocal,
}

unsafe impl<T: Send> Sync for SpinLock<T> {}
unsafe impl<T: Send> Send for SpinLock<T> {}

impl<T> SpinLock<T> {
    pub const fn new(name: &'static str, data: T) -> Self {
        Self {
            name,
            locked: AtomicBool::new(false),
            cpu: AtomicUsize::new(NO_CPU),
            data: UnsafeCell::new(data),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Acquire the lock, spinning until it becomes available
    pub fn lock<'a>(&'a self, cpus: &'a dyn CpuLocal) -> SpinLockGuard<'a, T> {
        cpus.push_off();
        if self.holding(cpus) {
            panic!("acquire {}", self.name);
        }
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            while self.locked.load(Ordering::Relaxed) {
                core::hint::spin_loop();
            }
        }
        self.cpu.store(cpus.cpu_id(), Ordering::Relaxed);
        SpinLockGuard { lock: self, cpus }
    }

    /// Try to acquire the lock without blocking
    pub fn try_lock<'a>(&'a self, cpus: &'a dyn CpuLocal) -> Option<SpinLockGuard<'a, T>> {
        cpus.push_off();
        if self
            .locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            self.cpu.store(cpus.cpu_id(), Ordering::Relaxed);
            Some(SpinLockGuard { lock: self, cpus })
        } else {
            cpus.pop_off();
            None
        }
    }

    /// Whether the calling CPU holds the lock. Interrupts must be off.
    pub fn holding(&self, cpus: &dyn CpuLocal) -> bool {
        self.locked.load(Ordering::Relaxed) && self.cpu.load(Ordering::Relaxed) == cpus.cpu_id()
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }

    /// Take over a lock that was acquired earlier and handed off with
    /// [`SpinLockGuard::leak`]. The push_off from the original acquire is
    /// inherited, none is added.
    ///
    /// # Safety
    ///
    /// The calling CPU must hold the lock and no other guard for it may
    /// be alive.
    pub unsafe fn adopt<'a>(&'a self, cpus: &'a dyn CpuLocal) -> SpinLockGuard<'a, T> {
        if !self.holding(cpus) {
            panic!("adopt {}", self.name);
        }
        SpinLockGuard { lock: self, cpus }
    }
}

impl<'a, T> SpinLockGuard<'a, T> {
    /// Give up the guard without releasing the lock. The lock stays held
    /// and the interrupt nesting level is left as is, ready to be adopted
    /// on the other side of a context switch.
    pub fn leak(self) -> &'a SpinLock<T> {
        let lock = self.lock;
        mem::forget(self);
        lock
    }

    pub fn lock_ref(&self) -> &'a SpinLock<T> {
        self.lock
    }
}

impl<T> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        if !self.lock.holding(self.cpus) {
            panic!("release {}", self.lock.name);
        }
        self.lock.cpu.store(NO_CPU, Ordering::Relaxed);
        self.lock.locked.store(false, Ordering::Release);
        self.cpus.pop_off();
    }
}

impl<T> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> fmt::Debug for SpinLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SpinLock")
            .field("name", &self.name)
            .field("locked", &self.is_locked())
            .finish()
    }
}
