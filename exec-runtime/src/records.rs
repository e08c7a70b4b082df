use {
    crate::osal::{ModuleHandle, SymbolAddress, TaskHandle},
    num_derive::FromPrimitive,
    serde::Serialize,
    std::fmt::{Display, Formatter},
};

/// Slot index of an application record. Stable for the lifetime of the
/// application: the index never changes while the slot is occupied.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize)]
pub struct AppId(pub u32);

impl AppId {
    pub fn as_index(self) -> usize {
        self.0 as usize
    }
}

impl Display for AppId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "app {}", self.0)
    }
}

/// Slot index of a library record.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize)]
pub struct LibId(pub u32);

impl LibId {
    pub fn as_index(self) -> usize {
        self.0 as usize
    }
}

/// Lifecycle state of an application slot. `Undefined` means the slot is
/// free. Ordering matters: the scanner treats everything above `Running`
/// as a pending state change.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Serialize)]
pub enum AppState {
    #[default]
    Undefined,
    EarlyInit,
    LateInit,
    Running,
    Waiting,
    Stopped,
}

/// Origin of an application. Only `External` apps are created, scanned,
/// and torn down by the executive; `Core` entries belong to the platform.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub enum AppType {
    Core,
    #[default]
    External,
}

/// Disposition written by command processors and observed by the scanner.
/// Any value above `AppRun` moves a running app toward teardown.
#[derive(
    Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, FromPrimitive, Serialize,
)]
#[repr(u32)]
pub enum ControlRequest {
    #[default]
    AppRun = 1,
    AppExit,
    AppError,
    SysDelete,
    SysRestart,
    SysReload,
    SysException,
}

/// Recovery policy when an application's task takes an exception.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, FromPrimitive, Serialize)]
#[repr(u32)]
pub enum ExceptionAction {
    #[default]
    RestartApp = 0,
    ProcRestart = 1,
}

impl ExceptionAction {
    /// Startup-script values above `RestartApp` all mean a processor
    /// restart, however far out of range they are.
    pub fn from_raw_clamped(raw: u32) -> Self {
        if raw == 0 {
            Self::RestartApp
        } else {
            Self::ProcRestart
        }
    }
}

/// Creation parameters of an application. Immutable once the app reaches
/// `LateInit`; restart and reload re-create the app from a snapshot of
/// this struct taken before the slot is cleared.
#[derive(Clone, Debug, Default, Serialize)]
pub struct StartParams {
    pub name: String,
    pub entry_point: String,
    pub file_name: String,
    pub stack_size: u32,
    pub priority: u8,
    pub exception_action: ExceptionAction,
    /// Resolved entry address; present from `LateInit` on
    pub start_address: Option<SymbolAddress>,
    /// Loaded module image; present from `LateInit` on
    pub module_handle: Option<ModuleHandle>,
}

/// Identity of an application's primary task.
#[derive(Clone, Debug, Default, Serialize)]
pub struct TaskInfo {
    pub main_task: Option<TaskHandle>,
    pub main_task_name: String,
}

/// Control-request field plus the graceful-shutdown countdown, both
/// advanced by the background scanner.
#[derive(Copy, Clone, Debug, Default, Serialize)]
pub struct ControlState {
    pub request: ControlRequest,
    pub timer_ms: u32,
}

/// One application slot.
#[derive(Clone, Debug, Default)]
pub struct AppRecord {
    pub state: AppState,
    pub app_type: AppType,
    pub start: StartParams,
    pub task: TaskInfo,
    pub control: ControlState,
}

impl AppRecord {
    pub fn is_slot_free(&self) -> bool {
        self.state == AppState::Undefined
    }
}

/// One library slot.
#[derive(Clone, Debug, Default)]
pub struct LibRecord {
    pub in_use: bool,
    pub name: String,
    pub module_handle: Option<ModuleHandle>,
}

/// One task-table entry, indexed by the task handle's table index. The
/// owner back-edge is non-owning; the app record owns the task.
#[derive(Clone, Debug)]
pub struct TaskRecord {
    pub in_use: bool,
    pub owner: AppId,
    pub handle: TaskHandle,
    pub name: String,
    pub execution_counter: u32,
}

impl Default for TaskRecord {
    fn default() -> Self {
        Self {
            in_use: false,
            owner: AppId(0),
            handle: TaskHandle(0),
            name: String::new(),
            execution_counter: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_request_ordering_matches_teardown_rule() {
        // Everything above AppRun is a teardown request.
        for request in [
            ControlRequest::AppExit,
            ControlRequest::AppError,
            ControlRequest::SysDelete,
            ControlRequest::SysRestart,
            ControlRequest::SysReload,
            ControlRequest::SysException,
        ] {
            assert!(request > ControlRequest::AppRun);
        }
    }

    #[test]
    fn exception_action_clamps_out_of_range_values() {
        assert_eq!(
            ExceptionAction::from_raw_clamped(0),
            ExceptionAction::RestartApp
        );
        assert_eq!(
            ExceptionAction::from_raw_clamped(1),
            ExceptionAction::ProcRestart
        );
        assert_eq!(
            ExceptionAction::from_raw_clamped(77),
            ExceptionAction::ProcRestart
        );
    }

    #[test]
    fn zeroed_app_record_is_a_free_slot() {
        let record = AppRecord::default();
        assert!(record.is_slot_free());
        assert_eq!(record.control.request, ControlRequest::AppRun);
        assert_eq!(record.control.timer_ms, 0);
    }
}
