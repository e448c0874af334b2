//! A `Group`: the fixed set of sibling processes spawned for one configured program.
//!
//! A Group's process set is fixed for its lifetime; reconfiguration always replaces the
//! Group object wholesale rather than mutating `numprocs` in place.

use std::sync::Arc;

use taskmaster_core::spec::ProgramSpec;
use taskmaster_core::PidRegistry;

use crate::process::{Process, ProcessState};

pub struct Group {
    pub spec: Arc<ProgramSpec>,
    pub processes: Vec<Arc<Process>>,
}

impl Group {
    pub fn new(spec: ProgramSpec) -> Group {
        let spec = Arc::new(spec);
        let processes = (0..spec.numprocs)
            .map(|i| Process::new(spec.process_name(i), Arc::clone(&spec)))
            .collect();
        Group { spec, processes }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// Spawn every sibling currently stopped/exited/fatal, honoring `autostart` for the
    /// initial pass at daemon startup (callers pass `force = true` for an operator-issued
    /// `start`, which ignores `autostart`).
    pub fn start_all(&self, registry: &PidRegistry<Arc<Process>>, force: bool) {
        if !force && !self.spec.autostart {
            return;
        }
        for process in &self.processes {
            if matches!(
                process.state(),
                ProcessState::Stopped | ProcessState::Exited | ProcessState::Fatal
            ) {
                process.spawn(registry);
            }
        }
    }

    pub fn stop_all(&self) {
        for process in &self.processes {
            if !matches!(process.state(), ProcessState::Stopped) {
                process.stop();
            }
        }
    }

    pub fn find(&self, process_name: &str) -> Option<&Arc<Process>> {
        self.processes.iter().find(|p| p.name == process_name)
    }
}
