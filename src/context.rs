//! Process-wide analysis context: options, machine model, shutdown flag and
//! the fresh-identifier counters shared by all states of one analysis.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::Result;
use crate::machine::MachineModel;
use crate::options::SmgOptions;
use crate::shutdown::ShutdownNotifier;
use crate::types::{ObjectId, ValueId};

#[derive(Debug)]
pub struct AnalysisContext {
    options: SmgOptions,
    machine: MachineModel,
    shutdown: ShutdownNotifier,
    next_object: AtomicU64,
    next_value: AtomicU64,
    next_state: AtomicU64,
}

impl AnalysisContext {
    pub fn new(options: SmgOptions, machine: MachineModel, shutdown: ShutdownNotifier) -> Arc<Self> {
        Arc::new(Self {
            options,
            machine,
            shutdown,
            // 0 is reserved for the Null object and the Zero value.
            next_object: AtomicU64::new(1),
            next_value: AtomicU64::new(1),
            next_state: AtomicU64::new(0),
        })
    }

    pub fn with_options(options: SmgOptions) -> Arc<Self> {
        Self::new(options, MachineModel::default(), ShutdownNotifier::new())
    }

    pub fn options(&self) -> &SmgOptions {
        &self.options
    }

    pub fn machine(&self) -> &MachineModel {
        &self.machine
    }

    pub fn shutdown(&self) -> &ShutdownNotifier {
        &self.shutdown
    }

    /// Polled by long-running loops between object visits.
    pub fn check_shutdown(&self) -> Result<()> {
        self.shutdown.check()
    }

    pub fn fresh_object_id(&self) -> ObjectId {
        ObjectId::new(self.next_object.fetch_add(1, Ordering::Relaxed))
    }

    pub fn fresh_value_id(&self) -> ValueId {
        ValueId::new(self.next_value.fetch_add(1, Ordering::Relaxed))
    }

    pub fn fresh_state_id(&self) -> u64 {
        self.next_state.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for AnalysisContext {
    fn default() -> Self {
        Self {
            options: SmgOptions::default(),
            machine: MachineModel::default(),
            shutdown: ShutdownNotifier::new(),
            next_object: AtomicU64::new(1),
            next_value: AtomicU64::new(1),
            next_state: AtomicU64::new(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    #[test]
    fn test_fresh_ids_skip_reserved() {
        let ctx = AnalysisContext::with_options(SmgOptions::default());
        let o = ctx.fresh_object_id();
        let v = ctx.fresh_value_id();
        assert!(!o.is_null());
        assert!(!v.is_zero());
        assert_ne!(ctx.fresh_value_id(), v);
    }
}
