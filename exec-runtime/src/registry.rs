use {
    crate::{
        config::{MAX_APPLICATIONS, MAX_LIBRARIES, MAX_TASKS},
        osal::TaskHandle,
        records::{AppId, AppRecord, AppState, AppType, LibId, LibRecord, TaskRecord},
    },
    log::warn,
    serde::Serialize,
};

/// Registration counters. Invariant: each field equals the number of
/// live records of its kind, at every point where the registry lock is
/// released.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct RegisteredCounts {
    pub external_apps: u32,
    pub libraries: u32,
    pub tasks: u32,
}

/// Outcome of a library check-in: either the name was already present or
/// a fresh slot was reserved for it.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LibraryCheckin {
    Existing(LibId),
    Reserved(LibId),
}

/// The three fixed-capacity tables plus the scanner bookkeeping that
/// shares their lock.
///
/// The tables are sized once at construction and never grow or shrink; a
/// record's index is its identity for as long as the slot is occupied.
/// All methods take `&mut self` or `&self`; the owner wraps the whole
/// structure in a single mutex, and nothing in here blocks.
#[derive(Debug)]
pub struct Registry {
    apps: Vec<AppRecord>,
    libs: Vec<LibRecord>,
    tasks: Vec<TaskRecord>,
    pub counts: RegisteredCounts,
    /// Number of apps seen above `Running` during the last sweep
    pub pending_state_changes: u32,
    /// Countdown until the next full sweep
    pub background_timer_ms: u32,
    /// Command counter snapshot taken by the last full sweep
    pub last_scan_command_count: u32,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            apps: vec![AppRecord::default(); MAX_APPLICATIONS],
            libs: vec![LibRecord::default(); MAX_LIBRARIES],
            tasks: vec![TaskRecord::default(); MAX_TASKS],
            counts: RegisteredCounts::default(),
            pending_state_changes: 0,
            background_timer_ms: 0,
            last_scan_command_count: 0,
        }
    }

    pub fn apps(&self) -> &[AppRecord] {
        &self.apps
    }

    pub fn app(&self, id: AppId) -> &AppRecord {
        &self.apps[id.as_index()]
    }

    pub fn app_mut(&mut self, id: AppId) -> &mut AppRecord {
        &mut self.apps[id.as_index()]
    }

    pub fn get_app(&self, id: AppId) -> Option<&AppRecord> {
        self.apps.get(id.as_index())
    }

    /// First-fit reservation of a free application slot. The record is
    /// zeroed and parked in `EarlyInit`, which keeps other reservers off
    /// the slot while holding no kernel resources yet.
    pub fn reserve_app_slot(&mut self) -> Option<AppId> {
        let slot = self.apps.iter().position(AppRecord::is_slot_free)?;
        self.apps[slot] = AppRecord::default();
        self.apps[slot].state = AppState::EarlyInit;
        Some(AppId(slot as u32))
    }

    /// Returns a slot to the free pool with no trace of its former
    /// occupant.
    pub fn release_app_slot(&mut self, id: AppId) {
        self.apps[id.as_index()] = AppRecord::default();
    }

    pub fn app_id_by_name(&self, name: &str) -> Option<AppId> {
        self.apps
            .iter()
            .position(|rec| !rec.is_slot_free() && rec.start.name == name)
            .map(|slot| AppId(slot as u32))
    }

    pub fn lib(&self, id: LibId) -> &LibRecord {
        &self.libs[id.as_index()]
    }

    pub fn lib_mut(&mut self, id: LibId) -> &mut LibRecord {
        &mut self.libs[id.as_index()]
    }

    pub fn lib_id_by_name(&self, name: &str) -> Option<LibId> {
        self.libs
            .iter()
            .position(|rec| rec.in_use && rec.name == name)
            .map(|slot| LibId(slot as u32))
    }

    /// Single-pass name de-duplication and reservation. A matching in-use
    /// name wins over a free slot; otherwise the first free slot is
    /// reserved and carries the name from here on. `None` means the table
    /// is full.
    pub fn checkin_library(&mut self, name: &str) -> Option<LibraryCheckin> {
        let mut free_slot = None;
        for (slot, rec) in self.libs.iter().enumerate() {
            if rec.in_use {
                if rec.name == name {
                    return Some(LibraryCheckin::Existing(LibId(slot as u32)));
                }
            } else if free_slot.is_none() {
                free_slot = Some(slot);
            }
        }
        let slot = free_slot?;
        self.libs[slot].in_use = true;
        self.libs[slot].name = name.to_string();
        self.libs[slot].module_handle = None;
        Some(LibraryCheckin::Reserved(LibId(slot as u32)))
    }

    /// Rollback of a failed library load: the slot goes back to the free
    /// pool. The registered-libraries counter was never incremented for a
    /// slot that only got as far as reservation.
    pub fn clear_library(&mut self, id: LibId) {
        self.libs[id.as_index()] = LibRecord::default();
    }

    pub fn tasks(&self) -> &[TaskRecord] {
        &self.tasks
    }

    pub fn task(&self, index: usize) -> &TaskRecord {
        &self.tasks[index]
    }

    pub fn task_mut(&mut self, index: usize) -> &mut TaskRecord {
        &mut self.tasks[index]
    }

    /// Registers the task under its handle's table index. A collision
    /// means an earlier teardown leaked the entry; the new registration
    /// wins so the live task is tracked, and the overwrite is logged.
    pub fn register_task(&mut self, handle: TaskHandle, owner: AppId, name: &str) -> usize {
        let index = handle.table_index();
        let rec = &mut self.tasks[index];
        if rec.in_use {
            warn!(
                "task table entry {} still in use by {} (handle {:?}); overwriting",
                index, rec.owner, rec.handle
            );
        } else {
            self.counts.tasks = self.counts.tasks.saturating_add(1);
        }
        rec.in_use = true;
        rec.owner = owner;
        rec.handle = handle;
        rec.name = name.to_string();
        rec.execution_counter = 0;
        index
    }

    pub fn invalidate_task(&mut self, index: usize) {
        let rec = &mut self.tasks[index];
        if rec.in_use {
            *rec = TaskRecord::default();
            self.counts.tasks = self.counts.tasks.saturating_sub(1);
        }
    }

    /// Maps a handle to its live table entry, if the entry still belongs
    /// to that handle.
    pub fn task_index_for(&self, handle: TaskHandle) -> Option<usize> {
        let index = handle.table_index();
        let rec = &self.tasks[index];
        (rec.in_use && rec.handle == handle).then_some(index)
    }

    /// Handles of all live tasks owned by `owner` other than its primary
    /// task, in table order.
    pub fn child_tasks_of(&self, owner: AppId, main_task: TaskHandle) -> Vec<TaskHandle> {
        self.tasks
            .iter()
            .filter(|rec| rec.in_use && rec.owner == owner && rec.handle != main_task)
            .map(|rec| rec.handle)
            .collect()
    }

    /// Counter consistency check (used by tests; cheap enough to assert
    /// in debug builds after compound mutations).
    pub fn counts_consistent(&self) -> bool {
        let apps = self
            .apps
            .iter()
            .filter(|rec| !rec.is_slot_free() && rec.app_type == AppType::External)
            .count() as u32;
        let libs = self.libs.iter().filter(|rec| rec.in_use).count() as u32;
        let tasks = self.tasks.iter().filter(|rec| rec.in_use).count() as u32;
        self.counts
            == RegisteredCounts {
                external_apps: apps,
                libraries: libs,
                tasks,
            }
    }
}
