//! Process listing and diagnostic dump (component C7).

use crate::contracts::{AddressSpace, Cpu, KernelStackPool};
use crate::kernel::Kernel;
use crate::proc::{Pid, State};

#[derive(Debug, Clone)]
pub struct ProcessSummary {
    pub slot: usize,
    pub pid: Pid,
    pub state: State,
    pub name: String,
    pub cur_tid: usize,
    pub pages: usize,
    pub bytes: usize,
    pub limit: usize,
    pub level: u8,
    pub priority: u8,
}

#[derive(Debug, Clone)]
pub struct ThreadSummary {
    pub tid: usize,
    pub state: State,
}

impl<A, K, C> Kernel<A, K, C>
where
    A: AddressSpace,
    K: KernelStackPool,
    C: Cpu,
{
    /// `list`: a snapshot of every non-`Unused` process, taken under the
    /// table lock (unlike `procdump`, which does not lock).
    pub fn list_processes(&self) -> Vec<ProcessSummary> {
        self.table
            .slots
            .iter()
            .enumerate()
            .filter(|(_, p)| !p.is_unused())
            .map(|(slot, p)| ProcessSummary {
                slot,
                pid: p.pid.unwrap(),
                state: p.state,
                name: p.name.clone(),
                cur_tid: p.cur_thread,
                pages: p.page_count(),
                bytes: p.sz,
                limit: p.sz_limit,
                level: p.level,
                priority: p.priority,
            })
            .collect()
    }

    pub fn threads_of(&self, pid: Pid) -> Vec<ThreadSummary> {
        match self.table.get(pid) {
            Some(p) => p
                .ttable
                .iter()
                .filter(|t| !matches!(t.state, State::Unused))
                .map(|t| ThreadSummary {
                    tid: t.tid,
                    state: t.state,
                })
                .collect(),
            None => Vec::new(),
        }
    }

    /// `procdump`: a best-effort, possibly-torn text dump, intentionally
    /// not taking the table lock so it remains useful on a wedged kernel.
    pub fn procdump(&self) -> String {
        let mut out = String::new();
        for (slot, proc) in self.table.slots.iter().enumerate() {
            if proc.is_unused() {
                continue;
            }
            out.push_str(&format!(
                "[{}] pid={} state={:?} name={} tid={} pages={} bytes={} limit={}\n",
                slot,
                proc.pid.unwrap().0,
                proc.state,
                proc.name,
                proc.cur_thread,
                proc.page_count(),
                proc.sz,
                proc.sz_limit,
            ));
            for t in proc.ttable.iter().filter(|t| !matches!(t.state, State::Unused)) {
                out.push_str(&format!("    tid={} state={:?}\n", t.tid, t.state));
                if matches!(proc.state, State::Sleeping) {
                    let pcs = self.cpu.caller_pcs(&t.context, 10);
                    if !pcs.is_empty() {
                        out.push_str(&format!("      pcs={:?}\n", pcs));
                    }
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::Kernel;

    #[test]
    fn list_processes_skips_unused_slots() {
        let mut kernel = Kernel::new();
        let pid = kernel.boot_init_process("init").unwrap();
        let summaries = kernel.list_processes();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].pid, pid);
        assert_eq!(summaries[0].name, "init");
    }

    #[test]
    fn procdump_includes_every_live_thread() {
        let mut kernel = Kernel::new();
        let pid = kernel.boot_init_process("init").unwrap();
        kernel.thread_create(pid, 0x1000, 0).unwrap();
        let dump = kernel.procdump();
        assert!(dump.contains("pid=1"));
        assert!(dump.contains("tid=0"));
        assert!(dump.contains("tid=1"));
    }
}
