/// Number of application slots.
pub const MAX_APPLICATIONS: usize = 32;
/// Number of library slots.
pub const MAX_LIBRARIES: usize = 10;
/// Number of task-table entries; task handles fold into this index space.
pub const MAX_TASKS: usize = 64;

/// Longest accepted application, library, task, or symbol name, in bytes.
pub const MAX_API_NAME: usize = 20;
/// Longest accepted filesystem path, in bytes.
pub const MAX_PATH_LEN: usize = 64;

/// Cumulative byte capacity of one startup-script record. Records that
/// reach this length are dropped at their terminator.
pub const STARTUP_RECORD_SIZE: usize = 128;
/// A startup record needs at least entry type, file, entry point, name,
/// priority, stack size, one reserved field, and the exception action.
pub const STARTUP_MIN_TOKENS: usize = 8;

/// Milliseconds between full background sweeps.
pub const DEFAULT_APP_SCAN_RATE_MS: u32 = 1000;
/// Number of sweep periods a waiting app is given before its control
/// request is dispatched. The product with the scan rate is the graceful
/// shutdown deadline.
pub const DEFAULT_APP_KILL_TIMEOUT: u32 = 5;

/// Startup script on the non-volatile store; always present.
pub const DEFAULT_NONVOL_STARTUP_FILE: &str = "/cf/exec_startup.scr";
/// Startup script on the volatile store; tried first after a processor
/// reset so a replacement script survives the reset.
pub const DEFAULT_VOLATILE_STARTUP_FILE: &str = "/ram/exec_startup.scr";

/// What kind of reset the executive is coming up from.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ResetType {
    PowerOn,
    Processor,
}

/// Tunables an embedder may override; defaults come from the build-time
/// constants above.
#[derive(Clone, Debug)]
pub struct ExecOptions {
    pub scan_rate_ms: u32,
    pub kill_timeout: u32,
    pub volatile_startup_path: String,
    pub nonvolatile_startup_path: String,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            scan_rate_ms: DEFAULT_APP_SCAN_RATE_MS,
            kill_timeout: DEFAULT_APP_KILL_TIMEOUT,
            volatile_startup_path: DEFAULT_VOLATILE_STARTUP_FILE.to_string(),
            nonvolatile_startup_path: DEFAULT_NONVOL_STARTUP_FILE.to_string(),
        }
    }
}

impl ExecOptions {
    /// Graceful-shutdown deadline in milliseconds.
    pub fn kill_deadline_ms(&self) -> u32 {
        self.kill_timeout.saturating_mul(self.scan_rate_ms)
    }
}
