#![allow(clippy::arithmetic_side_effects)]

pub mod app_creator;
pub mod cleanup;
pub mod control;
pub mod scanner;
pub mod startup;
pub mod test_harness;

use {
    corvus_exec_runtime::{
        config::ExecOptions,
        error::ExecError,
        events::EventSink,
        osal::{ModuleInfo, OsServices, OsStatus, SymbolAddress, TaskHandle},
        records::{AppId, AppState, AppType, ControlRequest, ExceptionAction, LibId, TaskRecord},
        registry::{RegisteredCounts, Registry},
    },
    serde::Serialize,
    std::sync::{
        atomic::{AtomicU32, Ordering},
        Arc, Mutex, MutexGuard,
    },
};

/// Per-application teardown hooks of the surrounding subsystems, invoked
/// (outside the registry lock) before any task or module is reclaimed.
/// Subsystems that keep no per-app state leave the defaults in place.
pub trait SubsystemCleanup {
    fn cleanup_tables(&self, _app: AppId) -> Result<(), OsStatus> {
        Ok(())
    }

    fn cleanup_software_bus(&self, _app: AppId) -> Result<(), OsStatus> {
        Ok(())
    }

    fn cleanup_time(&self, _app: AppId) -> Result<(), OsStatus> {
        Ok(())
    }

    fn cleanup_events(&self, _app: AppId) -> Result<(), OsStatus> {
        Ok(())
    }
}

/// For embedders with no per-app subsystem state.
#[derive(Debug, Default)]
pub struct NoHooks;

impl SubsystemCleanup for NoHooks {}

/// Everything a ground query wants to know about one application, read
/// atomically under the registry lock.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct AppInfo {
    pub id: AppId,
    pub name: String,
    pub app_type: AppType,
    pub state: AppState,
    pub entry_point: String,
    pub file_name: String,
    pub stack_size: u32,
    pub priority: u8,
    pub exception_action: ExceptionAction,
    pub start_address: Option<SymbolAddress>,
    pub main_task: Option<TaskHandle>,
    pub main_task_name: String,
    pub execution_counter: u32,
    pub module: ModuleInfo,
}

/// The application executive.
///
/// Owns the registry behind the single process-wide lock, the OS port,
/// the event sink, and the subsystem teardown hooks. Creation and query
/// operations may be called from any task; the background scanner drives
/// all state-machine transitions through [`run_scan`](Self::run_scan).
///
/// The lock discipline is uniform: the registry mutex is never held
/// across a port call that can block (module load/unload, symbol lookup,
/// task create/delete, object enumeration, file I/O, library init) nor
/// across the subsystem hooks. The one exception is `module_info`, a
/// plain address query, which `app_info` reads under the lock.
pub struct AppExecutive<OS, EV, HK> {
    os: OS,
    events: EV,
    hooks: HK,
    options: ExecOptions,
    registry: Arc<Mutex<Registry>>,
    command_count: AtomicU32,
}

/// Outcome of an application exception, decided by the app's configured
/// recovery policy.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ExceptionDisposition {
    /// The app is set up for restart; the scanner will tear it down and
    /// re-create it.
    AppRestarting(AppId),
    /// The app is unrecoverable (or unknown); the embedder must escalate
    /// to a processor reset.
    ProcessorResetRequired,
}

impl<OS, EV, HK> AppExecutive<OS, EV, HK>
where
    OS: OsServices,
    EV: EventSink,
    HK: SubsystemCleanup,
{
    pub fn new(os: OS, events: EV, hooks: HK, options: ExecOptions) -> Self {
        Self {
            os,
            events,
            hooks,
            options,
            registry: Arc::new(Mutex::new(Registry::new())),
            command_count: AtomicU32::new(0),
        }
    }

    pub fn options(&self) -> &ExecOptions {
        &self.options
    }

    pub(crate) fn os(&self) -> &OS {
        &self.os
    }

    pub(crate) fn events(&self) -> &EV {
        &self.events
    }

    pub(crate) fn hooks(&self) -> &HK {
        &self.hooks
    }

    pub(crate) fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap()
    }

    /// Bumps the monotonic command counter. A bump guarantees the next
    /// scan does a full sweep regardless of its idle timer, so any
    /// control-request write that precedes the bump is observed then.
    pub fn note_command(&self) {
        self.command_count.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn command_count(&self) -> u32 {
        self.command_count.load(Ordering::Relaxed)
    }

    pub fn registered_counts(&self) -> RegisteredCounts {
        self.registry().counts
    }

    pub fn app_id_by_name(&self, name: &str) -> Result<AppId, ExecError> {
        self.registry().app_id_by_name(name).ok_or(ExecError::AppNotFound)
    }

    pub fn lib_id_by_name(&self, name: &str) -> Result<LibId, ExecError> {
        self.registry().lib_id_by_name(name).ok_or(ExecError::LibNotFound)
    }

    /// Snapshot of one application's record plus its module layout, all
    /// read under the lock so the fields are mutually consistent.
    pub fn app_info(&self, app: AppId) -> Result<AppInfo, ExecError> {
        let registry = self.registry();
        let rec = registry.get_app(app).ok_or(ExecError::AppNotFound)?;
        if rec.is_slot_free() {
            return Err(ExecError::AppNotFound);
        }
        let execution_counter = rec
            .task
            .main_task
            .and_then(|handle| registry.task_index_for(handle))
            .map(|index| registry.task(index).execution_counter)
            .unwrap_or(0);
        let module = rec
            .start
            .module_handle
            .and_then(|handle| self.os.module_info(handle).ok())
            .unwrap_or_default();
        Ok(AppInfo {
            id: app,
            name: rec.start.name.clone(),
            app_type: rec.app_type,
            state: rec.state,
            entry_point: rec.start.entry_point.clone(),
            file_name: rec.start.file_name.clone(),
            stack_size: rec.start.stack_size,
            priority: rec.start.priority,
            exception_action: rec.start.exception_action,
            start_address: rec.start.start_address,
            main_task: rec.task.main_task,
            main_task_name: rec.task.main_task_name.clone(),
            execution_counter,
            module,
        })
    }

    /// Execution-counter tick for a live task, called on behalf of the
    /// task itself.
    pub fn increment_task_counter(&self, task: TaskHandle) -> Result<(), ExecError> {
        let mut registry = self.registry();
        let index = registry.task_index_for(task).ok_or(ExecError::TaskNotFound)?;
        let rec: &mut TaskRecord = registry.task_mut(index);
        rec.execution_counter = rec.execution_counter.wrapping_add(1);
        Ok(())
    }

    /// Maps a faulting task to its owning application and applies the
    /// app's configured exception action. `RestartApp` injects a restart
    /// request for the scanner; anything else is the embedder's problem.
    pub fn handle_exception(&self, task: TaskHandle) -> ExceptionDisposition {
        let mut registry = self.registry();
        let Some(index) = registry.task_index_for(task) else {
            return ExceptionDisposition::ProcessorResetRequired;
        };
        let owner = registry.task(index).owner;
        let rec = registry.app_mut(owner);
        if !rec.is_slot_free()
            && rec.app_type == AppType::External
            && rec.start.exception_action == ExceptionAction::RestartApp
        {
            rec.control.request = ControlRequest::SysRestart;
            drop(registry);
            self.note_command();
            return ExceptionDisposition::AppRestarting(owner);
        }
        ExceptionDisposition::ProcessorResetRequired
    }
}
