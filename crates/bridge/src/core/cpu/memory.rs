//! Page Invalidation and Guest Memory Reads.
//!
//! Pages whose protection was lifted by a fault are queued by the environment. The core
//! drains that queue whenever the engine is stopped, invalidates each page in the engine,
//! and records it as dirty until the platform collects the dirty set.

use super::CpuCore;
use crate::common::constants::GUEST_PAGE_SIZE;
use crate::common::{PhysAddr, VirtAddr};
use crate::engine::Environment;
use crate::soc::Transaction;

/// Longest instruction fetched for disassembly.
const MAX_INSN_BYTES: usize = 16;

/// Dirty pages collected since the last call to [`CpuCore::take_dirty_pages`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DirtyPages {
    /// Guest page bases in ascending order.
    pub pages: Vec<PhysAddr>,
    /// Some notifications were lost; treat all protected memory as dirty.
    pub overflowed: bool,
}

impl CpuCore {
    /// Delivers queued page invalidations and translation flushes to the engine.
    pub(crate) fn sync_pages(&mut self) {
        let batch = self.env.take_faulted_pages();
        for &page in &batch.pages {
            self.engine.invalidate_page(page);
            let _ = self.dirty.insert(page);
        }
        self.pages_invalidated += batch.pages.len() as u64;

        let mut flush = self.env.take_flush_request();
        if batch.overflowed {
            tracing::warn!(core_id = self.core_id, "page queue overflowed, flushing translations");
            self.dirty_overflowed = true;
            flush = true;
        }
        if flush {
            self.engine.flush_translations();
            self.translation_flushes += 1;
        }
    }

    /// Removes and returns the pages written since the last call.
    pub fn take_dirty_pages(&mut self) -> DirtyPages {
        self.sync_pages();
        DirtyPages {
            pages: std::mem::take(&mut self.dirty).into_iter().collect(),
            overflowed: std::mem::replace(&mut self.dirty_overflowed, false),
        }
    }

    /// Disassembles the instruction at guest virtual `addr`.
    ///
    /// Reads guest memory through debug transactions only; core state is not modified.
    /// Returns the text and the instruction length.
    pub fn disassemble(&self, addr: VirtAddr) -> Option<(String, usize)> {
        let phys = self.engine.virt_to_phys(addr)?;
        let to_page_end = (GUEST_PAGE_SIZE - phys.page_offset()) as usize;
        let mut bytes = [0u8; MAX_INSN_BYTES];
        let buf = &mut bytes[..to_page_end.min(MAX_INSN_BYTES)];
        let response = self.env.transport(&mut Transaction::read(phys, buf).debug());
        if !response.status.is_ok() {
            return None;
        }
        self.engine.disassemble(addr, buf)
    }
}
