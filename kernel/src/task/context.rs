//! Kernel threads as coroutines.
//!
//! Each process's kernel thread is a pinned future. The only place a
//! thread gives up its CPU is [`Switch`], awaited from `sched()`; the
//! per-CPU scheduler resumes a thread by polling its future once. Register
//! save and restore is left to the compiler's state machine.

use alloc::boxed::Box;
use core::future::Future;
use core::pin::Pin;
use core::task::{Context, Poll, Waker};

/// A process's kernel thread.
pub type Task = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Suspends the current kernel thread exactly once.
pub(crate) struct Switch {
    switched: bool,
}

impl Switch {
    pub(crate) fn new() -> Self {
        Self { switched: false }
    }
}

impl Future for Switch {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
        if self.switched {
            Poll::Ready(())
        } else {
            self.switched = true;
            Poll::Pending
        }
    }
}

/// Run `task` until its next switch point.
///
/// Returns `true` if the thread ran to completion. Kernel threads end in
/// `exit()`, which never returns, so completion is a bug the caller
/// reports.
pub(crate) fn resume(task: &mut Task) -> bool {
    let mut cx = Context::from_waker(Waker::noop());
    task.as_mut().poll(&mut cx).is_ready()
}
