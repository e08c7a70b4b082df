//! Scripted stand-ins for the OS port and the event sink, shared by the
//! unit tests of this crate (and usable by embedders for their own).

use {
    corvus_exec_runtime::{
        events::{EventId, EventSink, Severity},
        osal::{
            FileHandle, ModuleHandle, ModuleInfo, ObjectId, ObjectKind, OsServices, OsStatus,
            SymbolAddress, TaskHandle,
        },
        records::LibId,
    },
    itertools::Itertools,
    std::{
        collections::{HashMap, HashSet},
        sync::Mutex,
    },
};

const ERR_UNAVAILABLE: OsStatus = OsStatus(-1);
const ERR_NOT_FOUND: OsStatus = OsStatus(-3);
const ERR_BUSY: OsStatus = OsStatus(-38);

#[derive(Default)]
struct MockState {
    symbols: HashMap<String, SymbolAddress>,
    files: HashMap<String, Vec<u8>>,
    open_files: HashMap<i32, (Vec<u8>, usize)>,
    next_file: i32,

    next_module: u32,
    loaded_modules: HashSet<ModuleHandle>,
    load_count: u32,
    unload_calls: HashMap<ModuleHandle, u32>,

    next_task: u32,
    live_tasks: HashSet<TaskHandle>,

    object_kinds: HashMap<ObjectId, ObjectKind>,
    owned_objects: HashMap<TaskHandle, Vec<ObjectId>>,
    stuck_objects: HashSet<ObjectId>,
    next_object: u32,
    enumeration_passes: u32,

    fail_module_load: bool,
    fail_symbol_lookup: bool,
    fail_task_create: bool,
    failing_task_deletes: HashSet<TaskHandle>,
    failing_lib_inits: HashSet<u64>,
    lib_init_calls: Vec<(SymbolAddress, LibId)>,
}

/// A scripted OS port. Handles are allocated sequentially (module
/// handles from 7, so the first load yields handle 7 and a reload yields
/// 8), and every load, unload, and init call is accounted for so tests
/// can assert that rollback paths released exactly what they acquired.
pub struct MockOs {
    state: Mutex<MockState>,
}

impl Default for MockOs {
    fn default() -> Self {
        Self::new()
    }
}

impl MockOs {
    pub fn new() -> Self {
        let state = MockState {
            next_module: 7,
            next_task: 1,
            next_object: 100,
            next_file: 1,
            ..MockState::default()
        };
        Self {
            state: Mutex::new(state),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn define_symbol(&self, name: &str, address: u64) {
        self.lock()
            .symbols
            .insert(name.to_string(), SymbolAddress(address));
    }

    pub fn add_file(&self, path: &str, contents: &[u8]) {
        self.lock().files.insert(path.to_string(), contents.to_vec());
    }

    /// Gives `owner` one kernel object of the given kind.
    pub fn add_object(&self, owner: TaskHandle, kind: ObjectKind) -> ObjectId {
        let mut state = self.lock();
        let id = ObjectId(state.next_object);
        state.next_object += 1;
        state.object_kinds.insert(id, kind);
        state.owned_objects.entry(owner).or_default().push(id);
        id
    }

    /// Makes an object refuse deletion forever.
    pub fn stick_object(&self, id: ObjectId) {
        self.lock().stuck_objects.insert(id);
    }

    pub fn set_module_load_fails(&self, fails: bool) {
        self.lock().fail_module_load = fails;
    }

    pub fn set_symbol_lookup_fails(&self, fails: bool) {
        self.lock().fail_symbol_lookup = fails;
    }

    pub fn set_task_create_fails(&self, fails: bool) {
        self.lock().fail_task_create = fails;
    }

    pub fn set_task_delete_fails(&self, task: TaskHandle) {
        self.lock().failing_task_deletes.insert(task);
    }

    pub fn fail_library_init(&self, address: u64) {
        self.lock().failing_lib_inits.insert(address);
    }

    pub fn loaded_modules(&self) -> Vec<ModuleHandle> {
        self.lock()
            .loaded_modules
            .iter()
            .copied()
            .sorted_by_key(|handle| handle.0)
            .collect()
    }

    pub fn load_count(&self) -> u32 {
        self.lock().load_count
    }

    pub fn unloads_of(&self, module: ModuleHandle) -> u32 {
        self.lock().unload_calls.get(&module).copied().unwrap_or(0)
    }

    pub fn live_tasks(&self) -> Vec<TaskHandle> {
        self.lock()
            .live_tasks
            .iter()
            .copied()
            .sorted_by_key(|handle| handle.0)
            .collect()
    }

    pub fn objects_of(&self, owner: TaskHandle) -> Vec<ObjectId> {
        self.lock()
            .owned_objects
            .get(&owner)
            .cloned()
            .unwrap_or_default()
    }

    pub fn lib_init_calls(&self) -> Vec<(SymbolAddress, LibId)> {
        self.lock().lib_init_calls.clone()
    }

    /// Number of `for_each_object` sweeps performed so far.
    pub fn enumeration_passes(&self) -> u32 {
        self.lock().enumeration_passes
    }
}

impl OsServices for MockOs {
    fn module_load(&self, _module_name: &str, _file_path: &str) -> Result<ModuleHandle, OsStatus> {
        let mut state = self.lock();
        if state.fail_module_load {
            return Err(ERR_UNAVAILABLE);
        }
        let handle = ModuleHandle(state.next_module);
        state.next_module += 1;
        state.loaded_modules.insert(handle);
        state.load_count += 1;
        Ok(handle)
    }

    fn module_unload(&self, handle: ModuleHandle) -> Result<(), OsStatus> {
        let mut state = self.lock();
        *state.unload_calls.entry(handle).or_insert(0) += 1;
        if state.loaded_modules.remove(&handle) {
            Ok(())
        } else {
            Err(ERR_NOT_FOUND)
        }
    }

    fn symbol_lookup(&self, symbol_name: &str) -> Result<SymbolAddress, OsStatus> {
        let state = self.lock();
        if state.fail_symbol_lookup {
            return Err(ERR_NOT_FOUND);
        }
        state
            .symbols
            .get(symbol_name)
            .copied()
            .ok_or(ERR_NOT_FOUND)
    }

    fn module_info(&self, handle: ModuleHandle) -> Result<ModuleInfo, OsStatus> {
        let state = self.lock();
        if !state.loaded_modules.contains(&handle) {
            return Err(ERR_NOT_FOUND);
        }
        Ok(ModuleInfo {
            addresses_valid: true,
            code_address: 0x0800_0000,
            code_size: 0x4000,
            data_address: 0x2000_0000,
            data_size: 0x800,
            bss_address: 0x2000_0800,
            bss_size: 0x400,
        })
    }

    fn task_create(
        &self,
        _task_name: &str,
        _entry: SymbolAddress,
        _stack_size: u32,
        _priority: u8,
        _fp_enabled: bool,
    ) -> Result<TaskHandle, OsStatus> {
        let mut state = self.lock();
        if state.fail_task_create {
            return Err(ERR_UNAVAILABLE);
        }
        let handle = TaskHandle(state.next_task);
        state.next_task += 1;
        state.live_tasks.insert(handle);
        Ok(handle)
    }

    fn task_delete(&self, handle: TaskHandle) -> Result<(), OsStatus> {
        let mut state = self.lock();
        if state.failing_task_deletes.contains(&handle) {
            return Err(ERR_BUSY);
        }
        state.live_tasks.remove(&handle);
        Ok(())
    }

    fn for_each_object(&self, owner: TaskHandle, visit: &mut dyn FnMut(ObjectId)) {
        self.lock().enumeration_passes += 1;
        // Snapshot first: the callback deletes objects, which re-enters
        // this mock.
        let snapshot = self.objects_of(owner);
        for id in snapshot {
            visit(id);
        }
    }

    fn identify_object(&self, id: ObjectId) -> ObjectKind {
        self.lock()
            .object_kinds
            .get(&id)
            .copied()
            .unwrap_or(ObjectKind::Queue)
    }

    fn delete_object(&self, id: ObjectId, _kind: ObjectKind) -> Result<(), OsStatus> {
        let mut state = self.lock();
        if state.stuck_objects.contains(&id) {
            return Err(ERR_BUSY);
        }
        for objects in state.owned_objects.values_mut() {
            objects.retain(|object| *object != id);
        }
        state.object_kinds.remove(&id);
        Ok(())
    }

    fn library_init(&self, entry: SymbolAddress, lib: LibId) -> Result<(), OsStatus> {
        let mut state = self.lock();
        state.lib_init_calls.push((entry, lib));
        if state.failing_lib_inits.contains(&entry.0) {
            Err(ERR_UNAVAILABLE)
        } else {
            Ok(())
        }
    }

    fn file_open(&self, path: &str) -> Result<FileHandle, OsStatus> {
        let mut state = self.lock();
        let contents = state.files.get(path).cloned().ok_or(ERR_NOT_FOUND)?;
        let fd = state.next_file;
        state.next_file += 1;
        state.open_files.insert(fd, (contents, 0));
        Ok(FileHandle(fd))
    }

    fn file_read(&self, file: FileHandle, buf: &mut [u8]) -> Result<usize, OsStatus> {
        let mut state = self.lock();
        let (contents, position) = state.open_files.get_mut(&file.0).ok_or(ERR_NOT_FOUND)?;
        let n = buf.len().min(contents.len() - *position);
        buf[..n].copy_from_slice(&contents[*position..*position + n]);
        *position += n;
        Ok(n)
    }

    fn file_close(&self, file: FileHandle) -> Result<(), OsStatus> {
        self.lock()
            .open_files
            .remove(&file.0)
            .map(|_| ())
            .ok_or(ERR_NOT_FOUND)
    }
}

/// Event sink that remembers everything for assertions.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<(EventId, Severity, String)>>,
    syslog: Mutex<Vec<String>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<(EventId, Severity, String)> {
        self.events.lock().unwrap().clone()
    }

    pub fn event_ids(&self) -> Vec<EventId> {
        self.events().into_iter().map(|(id, _, _)| id).collect()
    }

    pub fn count_of(&self, wanted: EventId) -> usize {
        self.event_ids().into_iter().filter(|id| *id == wanted).count()
    }

    pub fn syslog(&self) -> Vec<String> {
        self.syslog.lock().unwrap().clone()
    }

    pub fn syslog_contains(&self, needle: &str) -> bool {
        self.syslog().iter().any(|line| line.contains(needle))
    }
}

impl EventSink for RecordingSink {
    fn send_event(&self, id: EventId, severity: Severity, text: &str) {
        self.events
            .lock()
            .unwrap()
            .push((id, severity, text.to_string()));
    }

    fn write_syslog(&self, text: &str) {
        self.syslog.lock().unwrap().push(text.to_string());
    }
}
