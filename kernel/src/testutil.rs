//! In-memory collaborators for host tests.
//!
//! Each host thread plays one CPU (its id and interrupt flag are thread
//! locals). User programs are async closures picked by `trapframe.epc`:
//! program 0 is a reaping init that forks program 1 and then collects
//! every child it is handed.

use alloc::{
    boxed::Box,
    collections::{BTreeMap, BTreeSet},
    string::{String, ToString},
    sync::Arc,
    vec,
    vec::Vec,
};
use core::cell::Cell;
use core::future::Future;
use core::sync::atomic::{AtomicBool, AtomicIsize, AtomicUsize, Ordering};

use spin::Mutex;

use crate::{
    arch::Arch,
    config::KernelConfig,
    container::ContainerId,
    error::KResult,
    fs::{FileSystem, FileSystemError},
    hal::{Hal, UserTask},
    kernel::Kernel,
    memory::{AddressSpace, MemoryError, PAGE_SIZE, page_round_up, pages_for},
    sync::SpinLock,
    task::ProcState,
    trap::TrapFrame,
};

std::thread_local! {
    static CPU: Cell<usize> = const { Cell::new(0) };
    static INTR: Cell<bool> = const { Cell::new(false) };
    static TIMER_ARMS: Cell<usize> = const { Cell::new(0) };
}

/// Make the calling host thread CPU `id`.
pub(crate) fn set_cpu(id: usize) {
    CPU.with(|c| c.set(id));
}

/// Timer interrupts requested on the calling host thread.
pub(crate) fn timer_arms() -> usize {
    TIMER_ARMS.with(Cell::get)
}

pub(crate) type Program = Arc<dyn Fn(&'static Kernel<MockHal>) -> UserTask + Send + Sync>;

pub(crate) fn program<F, Fut>(f: F) -> Program
where
    F: Fn(&'static Kernel<MockHal>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = i32> + Send + 'static,
{
    Arc::new(move |k: &'static Kernel<MockHal>| -> UserTask { Box::pin(f(k)) })
}

#[derive(Default)]
pub(crate) struct MockPageTable {
    pages: BTreeMap<usize, Box<[u8; PAGE_SIZE]>>,
    guards: BTreeSet<usize>,
    trapframe: bool,
}

impl MockPageTable {
    fn page_mut(&mut self, va: usize) -> Result<&mut [u8; PAGE_SIZE], MemoryError> {
        let idx = va / PAGE_SIZE;
        if self.guards.contains(&idx) {
            return Err(MemoryError::PermissionDenied(va));
        }
        self.pages
            .get_mut(&idx)
            .map(|p| &mut **p)
            .ok_or(MemoryError::NotMapped(va))
    }

    fn page(&self, va: usize) -> Result<&[u8; PAGE_SIZE], MemoryError> {
        let idx = va / PAGE_SIZE;
        if self.guards.contains(&idx) {
            return Err(MemoryError::PermissionDenied(va));
        }
        self.pages
            .get(&idx)
            .map(|p| &**p)
            .ok_or(MemoryError::NotMapped(va))
    }
}

struct Node {
    dir: bool,
    data: Mutex<Vec<u8>>,
}

pub(crate) struct MockInode {
    node: Arc<Node>,
    pub(crate) path: String,
}

pub(crate) struct MockFile {
    node: Arc<Node>,
    off: Arc<Mutex<usize>>,
}

pub(crate) struct MockHal {
    programs: Vec<Program>,
    nodes: Mutex<BTreeMap<String, Arc<Node>>>,
    /// Pages currently backing user memory, over all page tables.
    pub(crate) live_pages: AtomicIsize,
    pub(crate) fail_alloc: AtomicBool,
    pub(crate) inode_refs: AtomicIsize,
    pub(crate) open_files: AtomicIsize,
    /// begin_op minus end_op.
    pub(crate) ops: AtomicIsize,
    pub(crate) fs_inits: AtomicUsize,
    /// A condition for sleep/wakeup tests.
    pub(crate) cond: SpinLock<u32>,
    events: Mutex<Vec<String>>,
}

impl MockHal {
    pub(crate) fn new(programs: Vec<Program>) -> Self {
        let hal = Self {
            programs,
            nodes: Mutex::new(BTreeMap::new()),
            live_pages: AtomicIsize::new(0),
            fail_alloc: AtomicBool::new(false),
            inode_refs: AtomicIsize::new(0),
            open_files: AtomicIsize::new(0),
            ops: AtomicIsize::new(0),
            fs_inits: AtomicUsize::new(0),
            cond: SpinLock::new("cond", 0),
            events: Mutex::new(Vec::new()),
        };
        for dir in ["/", "/c1", "/c2", "/c3"] {
            hal.add_node(dir, true);
        }
        hal
    }

    fn add_node(&self, path: &str, dir: bool) -> Arc<Node> {
        let node = Arc::new(Node {
            dir,
            data: Mutex::new(Vec::new()),
        });
        self.nodes.lock().insert(path.to_string(), node.clone());
        node
    }

    /// Create an empty file and open it for writing.
    pub(crate) fn create_file(&self, path: &str) -> MockFile {
        let node = self.add_node(path, false);
        self.open_files.fetch_add(1, Ordering::Relaxed);
        MockFile {
            node,
            off: Arc::new(Mutex::new(0)),
        }
    }

    pub(crate) fn write_file(&self, path: &str, bytes: &[u8]) {
        let node = self.add_node(path, false);
        node.data.lock().extend_from_slice(bytes);
    }

    pub(crate) fn contents(&self, path: &str) -> Option<Vec<u8>> {
        self.nodes.lock().get(path).map(|n| n.data.lock().clone())
    }

    pub(crate) fn record(&self, event: impl Into<String>) {
        self.events.lock().push(event.into());
    }

    pub(crate) fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    pub(crate) fn saw(&self, event: &str) -> bool {
        self.events.lock().iter().any(|e| e == event)
    }

    fn alloc_page(&self) -> Result<Box<[u8; PAGE_SIZE]>, MemoryError> {
        if self.fail_alloc.load(Ordering::Relaxed) {
            return Err(MemoryError::AllocationFailed);
        }
        self.live_pages.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new([0; PAGE_SIZE]))
    }

    fn drop_pages(&self, n: usize) {
        self.live_pages.fetch_sub(n as isize, Ordering::Relaxed);
    }
}

impl Arch for MockHal {
    fn cpu_id() -> usize {
        CPU.with(Cell::get)
    }

    fn intr_on() {
        INTR.with(|i| i.set(true));
    }

    fn intr_off() {
        INTR.with(|i| i.set(false));
    }

    fn intr_get() -> bool {
        INTR.with(Cell::get)
    }

    fn wait_for_interrupt() {
        std::thread::yield_now();
    }

    fn arm_timer() {
        TIMER_ARMS.with(|n| n.set(n.get() + 1));
    }
}

impl AddressSpace for MockHal {
    type PageTable = MockPageTable;

    fn create(&self) -> Result<MockPageTable, MemoryError> {
        if self.fail_alloc.load(Ordering::Relaxed) {
            return Err(MemoryError::AllocationFailed);
        }
        Ok(MockPageTable::default())
    }

    fn map_trapframe(&self, pt: &mut MockPageTable, _tf: &TrapFrame) -> Result<(), MemoryError> {
        pt.trapframe = true;
        Ok(())
    }

    fn grow(&self, pt: &mut MockPageTable, old_sz: usize, new_sz: usize) -> Result<usize, MemoryError> {
        if new_sz < old_sz {
            return Ok(old_sz);
        }
        let first = page_round_up(old_sz) / PAGE_SIZE;
        for idx in first..pages_for(new_sz) {
            match self.alloc_page() {
                Ok(page) => {
                    pt.pages.insert(idx, page);
                }
                Err(e) => {
                    self.shrink(pt, idx * PAGE_SIZE, old_sz);
                    return Err(e);
                }
            }
        }
        Ok(new_sz)
    }

    fn shrink(&self, pt: &mut MockPageTable, old_sz: usize, new_sz: usize) -> usize {
        if new_sz >= old_sz {
            return old_sz;
        }
        for idx in pages_for(new_sz)..pages_for(old_sz) {
            if pt.pages.remove(&idx).is_some() {
                self.drop_pages(1);
            }
        }
        new_sz
    }

    fn copy(&self, from: &MockPageTable, to: &mut MockPageTable, sz: usize) -> Result<(), MemoryError> {
        for idx in 0..pages_for(sz) {
            let Some(src) = from.pages.get(&idx) else {
                panic!("uvmcopy: page not present");
            };
            let mut page = match self.alloc_page() {
                Ok(page) => page,
                Err(e) => {
                    self.drop_pages(to.pages.len());
                    to.pages.clear();
                    return Err(e);
                }
            };
            page.copy_from_slice(&src[..]);
            to.pages.insert(idx, page);
        }
        Ok(())
    }

    fn clear_user(&self, pt: &mut MockPageTable, va: usize) {
        pt.guards.insert(va / PAGE_SIZE);
    }

    fn free(&self, pt: MockPageTable, _sz: usize) {
        self.drop_pages(pt.pages.len());
    }

    fn copy_out(&self, pt: &mut MockPageTable, dst_va: usize, src: &[u8]) -> Result<(), MemoryError> {
        for (i, &b) in src.iter().enumerate() {
            let va = dst_va + i;
            pt.page_mut(va)?[va % PAGE_SIZE] = b;
        }
        Ok(())
    }

    fn copy_in(&self, pt: &MockPageTable, dst: &mut [u8], src_va: usize) -> Result<(), MemoryError> {
        for (i, b) in dst.iter_mut().enumerate() {
            let va = src_va + i;
            *b = pt.page(va)?[va % PAGE_SIZE];
        }
        Ok(())
    }
}

impl FileSystem for MockHal {
    type Inode = MockInode;
    type File = MockFile;

    fn init(&self) {
        self.fs_inits.fetch_add(1, Ordering::Relaxed);
    }

    fn namei(&self, path: &str) -> Option<MockInode> {
        let node = self.nodes.lock().get(path).cloned()?;
        self.inode_refs.fetch_add(1, Ordering::Relaxed);
        Some(MockInode {
            node,
            path: path.to_string(),
        })
    }

    fn idup(&self, ip: &MockInode) -> MockInode {
        self.inode_refs.fetch_add(1, Ordering::Relaxed);
        MockInode {
            node: ip.node.clone(),
            path: ip.path.clone(),
        }
    }

    fn iput(&self, _ip: MockInode) {
        self.inode_refs.fetch_sub(1, Ordering::Relaxed);
    }

    fn begin_op(&self) {
        self.ops.fetch_add(1, Ordering::Relaxed);
    }

    fn end_op(&self) {
        if self.ops.fetch_sub(1, Ordering::Relaxed) < 1 {
            panic!("end_op without begin_op");
        }
    }

    fn read_inode(&self, ip: &MockInode, off: usize, dst: &mut [u8]) -> Result<usize, FileSystemError> {
        if ip.node.dir {
            return Err(FileSystemError::IsDirectory);
        }
        let data = ip.node.data.lock();
        let Some(avail) = data.len().checked_sub(off) else {
            return Ok(0);
        };
        let n = avail.min(dst.len());
        dst[..n].copy_from_slice(&data[off..off + n]);
        Ok(n)
    }

    fn file_dup(&self, f: &MockFile) -> MockFile {
        self.open_files.fetch_add(1, Ordering::Relaxed);
        MockFile {
            node: f.node.clone(),
            off: f.off.clone(),
        }
    }

    fn file_close(&self, _f: MockFile) {
        self.open_files.fetch_sub(1, Ordering::Relaxed);
    }

    fn file_write(&self, f: &MockFile, src: &[u8]) -> Result<usize, FileSystemError> {
        if f.node.dir {
            return Err(FileSystemError::IsDirectory);
        }
        let mut data = f.node.data.lock();
        let mut off = f.off.lock();
        if data.len() < *off + src.len() {
            data.resize(*off + src.len(), 0);
        }
        data[*off..*off + src.len()].copy_from_slice(src);
        *off += src.len();
        Ok(src.len())
    }
}

impl Hal for MockHal {
    fn enter_user(&self, kernel: &'static Kernel<Self>) -> UserTask {
        let epc = with_trapframe(kernel, |tf| tf.epc) as usize;
        match self.programs.get(epc) {
            Some(p) => p(kernel),
            None => panic!("no program at {:#x}", epc),
        }
    }
}

/// An init that starts program 1 and then reaps forever, logging
/// `reaped <pid> status <n>`.
fn init_program() -> Program {
    program(|k| async move {
        fork_into(k, 1).expect("init: fork");
        reap_forever(k).await
    })
}

async fn reap_forever(k: &'static Kernel<MockHal>) -> i32 {
    loop {
        match k.wait(None).await {
            Ok((pid, status)) => k.hal.record(format!("reaped {} status {}", pid, status)),
            Err(_) => {
                let _ = k.sleep_ticks(1).await;
            }
        }
    }
}

/// Boot a kernel whose first user program (index 1) is `programs[0]`.
pub(crate) fn boot(programs: Vec<Program>) -> &'static Kernel<MockHal> {
    boot_with(KernelConfig::default(), programs)
}

pub(crate) fn boot_with(config: KernelConfig, programs: Vec<Program>) -> &'static Kernel<MockHal> {
    set_cpu(0);
    let mut all = vec![init_program()];
    all.extend(programs);
    let k: &'static Kernel<MockHal> = Box::leak(Box::new(Kernel::new(MockHal::new(all), config)));
    k.init();
    k.userinit().expect("userinit");
    k
}

/// Drive CPU 0 until `done` holds, ticking the clock after every pass.
pub(crate) fn run_until(k: &'static Kernel<MockHal>, max_passes: usize, mut done: impl FnMut() -> bool) -> bool {
    for _ in 0..max_passes {
        if done() {
            return true;
        }
        k.dispatch_pass();
        k.clock_tick();
    }
    done()
}

pub(crate) fn with_trapframe<R>(k: &Kernel<MockHal>, f: impl FnOnce(&mut TrapFrame) -> R) -> R {
    let mut data = k.proc(k.current()).data.lock();
    match data.trapframe.as_deref_mut() {
        Some(tf) => f(tf),
        None => panic!("no trapframe"),
    }
}

/// Fork a child that runs `program` instead of the caller's.
pub(crate) fn fork_into(k: &'static Kernel<MockHal>, program: usize) -> KResult<i32> {
    let saved = with_trapframe(k, |tf| core::mem::replace(&mut tf.epc, program as u64));
    let r = k.fork();
    with_trapframe(k, |tf| tf.epc = saved);
    r
}

pub(crate) fn poke(k: &Kernel<MockHal>, va: usize, bytes: &[u8]) {
    let mut data = k.proc(k.current()).data.lock();
    let pt = data.pagetable.as_mut().expect("page table");
    k.hal.copy_out(pt, va, bytes).expect("poke");
}

pub(crate) fn peek(k: &Kernel<MockHal>, va: usize, len: usize) -> Result<Vec<u8>, MemoryError> {
    let data = k.proc(k.current()).data.lock();
    let pt = data.pagetable.as_ref().expect("page table");
    let mut buf = vec![0u8; len];
    k.hal.copy_in(pt, &mut buf, va)?;
    Ok(buf)
}

pub(crate) fn state_of(k: &Kernel<MockHal>, pid: i32) -> Option<ProcState> {
    let slot = k.slot_of(pid)?;
    Some(k.proc(slot).lock.lock(k).state)
}

/// (proc_count, mem_usage) of a container.
pub(crate) fn usage(k: &Kernel<MockHal>, id: ContainerId) -> (usize, usize) {
    let c = k.container(id).lock.lock(k);
    (c.proc_count, c.mem_usage)
}
