//! Process and container listings for the operator tools.

use alloc::vec::Vec;
use core::fmt;

use crate::{
    config::{CNAME, KILOMEM, NCONTAINERS, NPROC, PROC_NAME_LEN},
    console::ConsoleWriter,
    container::{ContainerId, ContainerState},
    hal::Hal,
    kernel::Kernel,
    memory::PAGE_SIZE,
    name::FixedName,
    task::ProcState,
};

/// One row of `ps`.
#[derive(Debug, Clone)]
pub struct ProcInfo {
    pub pid: i32,
    /// 0 for the init process.
    pub ppid: i32,
    pub state: ProcState,
    pub name: FixedName<PROC_NAME_LEN>,
    pub container: FixedName<CNAME>,
    pub mem_kb: usize,
    pub cpu_tokens: u64,
    /// Share of all CPU tokens, in percent. Only `cinfo` fills it in.
    pub cpu_percent: u64,
}

#[derive(Debug, Clone)]
pub struct ContainerInfo {
    pub id: ContainerId,
    pub name: FixedName<CNAME>,
    pub state: ContainerState,
    pub mem_kb: usize,
    pub disk_blocks: usize,
    pub procs: usize,
    pub cpu_tokens: u64,
    pub cpu_percent: u64,
    pub scheduler_tokens: u64,
}

/// What `cinfo` reports.
#[derive(Debug, Clone)]
pub struct SystemInfo {
    pub ticks: u64,
    pub total_tokens: u64,
    pub procs: Vec<ProcInfo>,
    pub containers: Vec<ContainerInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryInfo {
    pub used_pages: usize,
    pub limit_pages: usize,
}

fn percent(part: u64, total: u64) -> u64 {
    (part * 100).checked_div(total).unwrap_or(0)
}

impl<H: Hal> Kernel<H> {
    /// Live processes the caller may see.
    pub fn ps(&self) -> Vec<ProcInfo> {
        let viewer = self.viewer();
        let mut rows = Vec::new();
        for slot in 0..NPROC {
            let p = self.proc(slot);
            let g = p.lock.lock(self);
            if g.state == ProcState::Unused || !viewer.can_see(g.container) {
                continue;
            }
            let (name, mem_kb) = {
                let data = p.data.lock();
                (data.name, data.sz / KILOMEM)
            };
            let container = match g.container {
                Some(c) => self.container(c).lock.lock(self).name,
                None => FixedName::new(),
            };
            let info = ProcInfo {
                pid: g.pid,
                ppid: 0,
                state: g.state,
                name,
                container,
                mem_kb,
                cpu_tokens: g.cpu_tokens,
                cpu_percent: 0,
            };
            drop(g);
            // A parent's lock is never taken under its child's.
            let ppid = p.parent().map_or(0, |parent| self.proc(parent).lock.lock(self).pid);
            rows.push(ProcInfo { ppid, ..info });
        }
        rows
    }

    /// CPU statistics. Folds every visible process's tokens into its
    /// container's listing counter, reports it, then restarts that counter
    /// at 1.
    pub fn cinfo(&self) -> SystemInfo {
        let viewer = self.viewer();
        let mut total = 0;
        for slot in 0..NPROC {
            let p = self.proc(slot).lock.lock(self);
            if p.state == ProcState::Unused {
                continue;
            }
            total += p.cpu_tokens;
            // Only the containers reported below get their counter restarted.
            if let Some(c) = p.container
                && viewer.can_see(Some(c))
            {
                let mut g = self.container(c).lock.lock(self);
                if g.state == ContainerState::Started {
                    g.cpu_tokens += p.cpu_tokens;
                }
            }
        }

        let procs = self
            .ps()
            .into_iter()
            .map(|p| ProcInfo {
                cpu_percent: percent(p.cpu_tokens, total),
                ..p
            })
            .collect();

        let mut containers = Vec::new();
        for i in 0..NCONTAINERS {
            let id = ContainerId(i);
            let c = self.container(id);
            let mut g = c.lock.lock(self);
            if g.state != ContainerState::Started || !viewer.can_see(Some(id)) {
                continue;
            }
            containers.push(ContainerInfo {
                id,
                name: g.name,
                state: g.state,
                mem_kb: g.mem_usage * PAGE_SIZE / KILOMEM,
                disk_blocks: g.disk_usage,
                procs: g.proc_count,
                cpu_tokens: g.cpu_tokens,
                cpu_percent: percent(g.cpu_tokens, total),
                scheduler_tokens: c.tokens(),
            });
            g.cpu_tokens = 1;
        }

        SystemInfo {
            ticks: self.ticks(),
            total_tokens: total,
            procs,
            containers,
        }
    }

    /// Pages in use against the caller's limit. Root-access callers see
    /// the whole machine.
    pub fn freememory(&self) -> MemoryInfo {
        let viewer = self.viewer();
        if viewer.root_access() {
            let used_pages = (0..NCONTAINERS)
                .map(|i| self.container(ContainerId(i)).lock.lock(self).mem_usage)
                .sum();
            MemoryInfo {
                used_pages,
                limit_pages: self.config.total_pages,
            }
        } else {
            let id = self.my_container().unwrap_or(ContainerId::ROOT);
            let c = self.container(id).lock.lock(self);
            MemoryInfo {
                used_pages: c.mem_usage,
                limit_pages: c.limits.mem_pages,
            }
        }
    }

    /// Print the process and container tables on the console. Meant for
    /// a console keystroke, so it works with no current process.
    pub fn procdump(&self) {
        let _ = self.write_procdump(&mut ConsoleWriter);
    }

    /// The `procdump` tables; the last process column is the size of the
    /// process's container.
    pub fn write_procdump(&self, out: &mut impl fmt::Write) -> fmt::Result {
        writeln!(out)?;
        writeln!(out, "PID\tSTATE\tNAME\tCONTAINER\tPROCESS")?;
        for p in self.ps() {
            let members = self
                .find_container(p.container.as_str())
                .map_or(0, |id| self.container(id).lock.lock(self).proc_count);
            writeln!(
                out,
                "{}\t{}\t{}\t{}\t{}",
                p.pid,
                p.state.label(),
                p.name,
                p.container,
                members
            )?;
        }
        writeln!(out)?;
        writeln!(out, "NAME\tMEM(KB)\tDISK\tPROCS\tTOKENS")?;
        for i in 0..NCONTAINERS {
            let c = self.container(ContainerId(i));
            let g = c.lock.lock(self);
            if g.state != ContainerState::Started {
                continue;
            }
            writeln!(
                out,
                "{}\t{}\t{}\t{}\t{}",
                g.name,
                g.mem_usage * PAGE_SIZE / KILOMEM,
                g.disk_usage * KILOMEM,
                g.proc_count,
                c.tokens()
            )?;
        }
        Ok(())
    }
}

impl fmt::Display for ProcInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\t{}K\t{}\t{}\t{}",
            self.pid,
            self.mem_kb,
            self.name,
            self.state.label(),
            self.container
        )
    }
}

impl fmt::Display for SystemInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Ticks: {}\nTotal Tokens: {}", self.ticks, self.total_tokens)?;
        writeln!(f, "[Process Statistics]")?;
        writeln!(f, "\nPID\tCPU %\tTOKENS\tSTATE\tNAME\tCONTAINER")?;
        for p in &self.procs {
            writeln!(
                f,
                "{}\t{}\t{}\t{}\t{}\t'{}'\t",
                p.pid,
                p.cpu_percent,
                p.cpu_tokens,
                p.state.label(),
                p.name,
                p.container
            )?;
        }
        writeln!(f, "[Process Statistics]")?;
        writeln!(f, "\n[Container Statistics]")?;
        writeln!(f, "NAME\tMEM(KB)\tDISK\tPROCS\tCPU %\tTOKENS")?;
        for c in &self.containers {
            writeln!(
                f,
                "{}\t{}\t{}\t{}\t{}%\t{}",
                c.name,
                c.mem_kb,
                c.disk_blocks * KILOMEM,
                c.procs,
                c.cpu_percent,
                c.cpu_tokens
            )?;
        }
        write!(f, "[Container Statistics]")
    }
}

impl fmt::Display for MemoryInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Used memory:  '{}' Pages", self.used_pages)?;
        write!(f, "Free memory:  '{}' Pages", self.limit_pages)
    }
}
