//! Owns every `Group`, the live configuration, and the PID registry; implements startup,
//! config reload diffing, and the operations the command dispatcher calls into.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{info, warn};
use taskmaster_core::config::{self, Config};
use taskmaster_core::PidRegistry;

use crate::dispatcher::Countdown;
use crate::group::Group;
use crate::process::{Process, ProcessState};

pub struct Supervisor {
    pub registry: Arc<PidRegistry<Arc<Process>>>,
    groups: Mutex<HashMap<String, Group>>,
    config_path: Mutex<PathBuf>,
    /// Path staged by the `config <path>` control command, consulted by the next
    /// `reload`/`SIGHUP` instead of `config_path`.
    staged_path: Mutex<Option<PathBuf>>,
}

impl Supervisor {
    pub fn new(config_path: PathBuf, config: Config) -> Supervisor {
        let groups = config
            .programs
            .into_iter()
            .map(|(name, spec)| (name, Group::new(spec)))
            .collect();

        Supervisor {
            registry: Arc::new(PidRegistry::new()),
            groups: Mutex::new(groups),
            config_path: Mutex::new(config_path),
            staged_path: Mutex::new(None),
        }
    }

    /// Spawn every `autostart` program group. Called once at daemon startup.
    pub fn start_autostart(&self) {
        let groups = self.groups.lock().expect("groups lock poisoned");
        for group in groups.values() {
            group.start_all(&self.registry, false);
        }
    }

    pub fn with_group<R>(&self, name: &str, f: impl FnOnce(&Group) -> R) -> Option<R> {
        let groups = self.groups.lock().expect("groups lock poisoned");
        groups.get(name).map(f)
    }

    pub fn group_names(&self) -> Vec<String> {
        let groups = self.groups.lock().expect("groups lock poisoned");
        let mut names: Vec<String> = groups.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn stop_all(&self) {
        let groups = self.groups.lock().expect("groups lock poisoned");
        for group in groups.values() {
            group.stop_all();
        }
    }

    /// Stage a path to be used by the next reload, without touching the live
    /// configuration. Returns an error if the path cannot be parsed right now so the
    /// operator gets immediate feedback.
    pub fn stage_config_path(&self, path: PathBuf) -> Result<(), taskmaster_core::error::ConfigError> {
        config::load_config(&path)?;
        *self.staged_path.lock().expect("staged path lock poisoned") = Some(path);
        Ok(())
    }

    pub fn current_config_path(&self) -> PathBuf {
        self.config_path.lock().expect("config path lock poisoned").clone()
    }

    /// Reload the configuration: reads the staged path if one was set via `config
    /// <path>`, otherwise re-reads the path the daemon was started with. On a parse or
    /// validation failure, the running configuration is left untouched.
    pub fn reload(&self) -> Result<ReloadReport, taskmaster_core::error::ConfigError> {
        let path = {
            let mut staged = self.staged_path.lock().expect("staged path lock poisoned");
            match staged.take() {
                Some(path) => {
                    *self.config_path.lock().expect("config path lock poisoned") = path.clone();
                    path
                }
                None => self.current_config_path(),
            }
        };

        let new_config = config::load_config(&path)?;
        Ok(self.apply(new_config))
    }

    fn apply(&self, new_config: Config) -> ReloadReport {
        let mut groups = self.groups.lock().expect("groups lock poisoned");
        let mut report = ReloadReport::default();

        let mut kept = HashMap::new();
        for (name, spec) in new_config.programs {
            match groups.remove(&name) {
                Some(existing) if *existing.spec == spec => {
                    kept.insert(name, existing);
                }
                Some(existing) => {
                    drain_group(&existing);
                    let group = Group::new(spec);
                    group.start_all(&self.registry, false);
                    report.changed.push(name.clone());
                    kept.insert(name, group);
                }
                None => {
                    let group = Group::new(spec);
                    group.start_all(&self.registry, false);
                    report.added.push(name.clone());
                    kept.insert(name, group);
                }
            }
        }

        for (name, removed) in groups.drain() {
            drain_group(&removed);
            report.removed.push(name);
        }

        *groups = kept;
        info!(
            "reload: {} added, {} changed, {} removed",
            report.added.len(),
            report.changed.len(),
            report.removed.len()
        );
        if report.is_empty() {
            info!("reload: no configuration changes");
        }
        report
    }
}

/// Stop every live process in `group` and block until each has reached a terminal
/// non-live state. Per spec.md §4.3 a removed/changed group must be fully drained --
/// exactly once, counting outstanding live processes explicitly -- before its name is
/// either freed or handed to a freshly constructed replacement `Group`. Run with the
/// Supervisor lock held: the lock's span covers the whole reload so concurrent control
/// requests see either the pre- or post-reload world, never a partially drained group.
fn drain_group(group: &Group) {
    let live: Vec<&Arc<Process>> = group
        .processes
        .iter()
        .filter(|p| {
            !matches!(
                p.state(),
                ProcessState::Stopped | ProcessState::Exited | ProcessState::Fatal
            )
        })
        .collect();

    if live.is_empty() {
        return;
    }

    let countdown = Countdown::new(live.len());
    for process in &live {
        process.on_next_settle(countdown.callback());
    }
    group.stop_all();
    countdown.wait(Duration::from_secs(group.spec.stopwaitsecs + 2));
}

#[derive(Debug, Default, Clone)]
pub struct ReloadReport {
    pub added: Vec<String>,
    pub changed: Vec<String>,
    pub removed: Vec<String>,
}

impl ReloadReport {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }
}

pub fn bootstrap(explicit_path: Option<&Path>) -> Result<Supervisor, taskmaster_core::error::ConfigError> {
    let path = config::resolve_config_path(explicit_path)?;
    let config = config::load_config(&path)?;
    if config.programs.is_empty() {
        warn!("configuration at {} defines no programs", path.display());
    }
    Ok(Supervisor::new(path, config))
}
