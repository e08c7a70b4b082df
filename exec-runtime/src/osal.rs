use {
    crate::{config::MAX_TASKS, records::LibId},
    enum_iterator::Sequence,
    num_derive::{FromPrimitive, ToPrimitive},
    serde::Serialize,
    std::fmt::{Display, Formatter},
};

/// Opaque numeric status code surfaced by the underlying OS layer.
///
/// The executive never interprets the value; it only maps the failure into
/// its own taxonomy and forwards the raw code to the syslog for operators.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct OsStatus(pub i32);

impl Display for OsStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "os status {}", self.0)
    }
}

/// Token returned by a module load, required for unload and info queries.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize)]
pub struct ModuleHandle(pub u32);

/// Token for an OS task.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize)]
pub struct TaskHandle(pub u32);

impl TaskHandle {
    /// Folds the handle into the fixed task-table index space.
    pub fn table_index(self) -> usize {
        self.0 as usize % MAX_TASKS
    }
}

/// Identifier of an arbitrary kernel object visited during enumeration.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct ObjectId(pub u32);

/// Resolved entry-point address. Opaque to the executive; only the port
/// ever dereferences it.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
pub struct SymbolAddress(pub u64);

/// Descriptor for an open byte stream.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct FileHandle(pub i32);

/// Kind of a kernel object as reported by [`OsServices::identify_object`].
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, Hash, FromPrimitive, ToPrimitive, Sequence,
)]
#[repr(u32)]
pub enum ObjectKind {
    Task,
    Queue,
    BinSem,
    CountSem,
    Mutex,
    Timer,
    Stream,
    Module,
}

/// Address-space layout of a loaded module image.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct ModuleInfo {
    /// Whether the address fields below carry meaningful values
    pub addresses_valid: bool,
    pub code_address: u64,
    pub code_size: u64,
    pub data_address: u64,
    pub data_size: u64,
    pub bss_address: u64,
    pub bss_size: u64,
}

/// Capability set the executive consumes from the operating system.
///
/// Everything that can block, allocate kernel objects, or touch the
/// filesystem goes through this trait, which keeps the executive itself
/// free of platform calls and lets tests substitute a scripted
/// implementation. All methods take `&self`; implementations are expected
/// to be internally synchronized.
pub trait OsServices {
    fn module_load(&self, module_name: &str, file_path: &str) -> Result<ModuleHandle, OsStatus>;

    fn module_unload(&self, handle: ModuleHandle) -> Result<(), OsStatus>;

    fn symbol_lookup(&self, symbol_name: &str) -> Result<SymbolAddress, OsStatus>;

    fn module_info(&self, handle: ModuleHandle) -> Result<ModuleInfo, OsStatus>;

    /// Creates a task that begins execution at `entry`. The port performs
    /// the indirect call on the new task's own stack.
    fn task_create(
        &self,
        task_name: &str,
        entry: SymbolAddress,
        stack_size: u32,
        priority: u8,
        fp_enabled: bool,
    ) -> Result<TaskHandle, OsStatus>;

    fn task_delete(&self, handle: TaskHandle) -> Result<(), OsStatus>;

    /// Visits every kernel object created by `owner` that still exists.
    /// Deletions performed inside the callback must be reflected by the
    /// next enumeration.
    fn for_each_object(&self, owner: TaskHandle, visit: &mut dyn FnMut(ObjectId));

    fn identify_object(&self, id: ObjectId) -> ObjectKind;

    /// Kind-specific delete of a single object.
    fn delete_object(&self, id: ObjectId, kind: ObjectKind) -> Result<(), OsStatus>;

    /// Invokes a resolved library init entry with the library's slot id.
    /// The call happens on the caller's stack.
    fn library_init(&self, entry: SymbolAddress, lib: LibId) -> Result<(), OsStatus>;

    fn file_open(&self, path: &str) -> Result<FileHandle, OsStatus>;

    fn file_read(&self, file: FileHandle, buf: &mut [u8]) -> Result<usize, OsStatus>;

    fn file_close(&self, file: FileHandle) -> Result<(), OsStatus>;
}
