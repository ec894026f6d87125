use spin::Mutex;

/// Pid of the first process.
pub const INIT_PID: i32 = 1;

/// Hands out process ids in increasing order. Ids are never reused while
/// the kernel runs.
pub struct PidAllocator {
    next: Mutex<i32>,
}

impl PidAllocator {
    pub const fn new() -> Self {
        Self {
            next: Mutex::new(INIT_PID),
        }
    }

    pub fn alloc(&self) -> i32 {
        let mut next = self.next.lock();
        let pid = *next;
        *next += 1;
        pid
    }
}
