use {
    crate::{AppExecutive, SubsystemCleanup},
    corvus_exec_runtime::{
        config::{MAX_API_NAME, MAX_PATH_LEN},
        error::ExecError,
        events::{EventId, EventSink, Severity},
        osal::{ModuleHandle, OsServices, SymbolAddress},
        records::{AppId, AppState, AppType, ControlRequest, ControlState, ExceptionAction, LibId, StartParams},
        registry::LibraryCheckin,
    },
    log::{debug, info},
};

/// Outcome of a library load. An already-present name is not an error;
/// the caller gets the existing slot.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LibraryLoad {
    Loaded(LibId),
    AlreadyLoaded(LibId),
}

impl LibraryLoad {
    pub fn id(self) -> LibId {
        match self {
            Self::Loaded(id) | Self::AlreadyLoaded(id) => id,
        }
    }
}

fn checked_name(name: &str) -> Result<&str, ExecError> {
    if name.is_empty() || name.len() > MAX_API_NAME {
        return Err(ExecError::BadArgument);
    }
    Ok(name)
}

fn checked_path(path: &str) -> Result<&str, ExecError> {
    if path.is_empty() || path.len() > MAX_PATH_LEN {
        return Err(ExecError::BadArgument);
    }
    Ok(path)
}

impl<OS, EV, HK> AppExecutive<OS, EV, HK>
where
    OS: OsServices,
    EV: EventSink,
    HK: SubsystemCleanup,
{
    /// Creates an external application: reserves a slot, loads its module,
    /// resolves the entry point, and stands up the primary task.
    ///
    /// Each stage that fails rolls back everything the earlier stages
    /// acquired, so a failed creation leaves no slot, no module image, and
    /// no task behind.
    pub fn app_create(
        &self,
        file_name: &str,
        entry_point: &str,
        app_name: &str,
        priority: u8,
        stack_size: u32,
        exception_action: ExceptionAction,
    ) -> Result<AppId, ExecError> {
        checked_name(app_name)?;
        checked_name(entry_point)?;
        checked_path(file_name)?;

        info!("starting {} from {}", app_name, file_name);

        // Stage 1: slot reservation. The name check shares the same lock
        // hold so two creators cannot race the same name into two slots.
        let app_id = {
            let mut registry = self.registry();
            if registry.app_id_by_name(app_name).is_some() {
                self.events()
                    .write_syslog(&format!("app_create: {} is already running", app_name));
                return Err(ExecError::AppCreate);
            }
            match registry.reserve_app_slot() {
                Some(id) => id,
                None => {
                    self.events()
                        .write_syslog("app_create: no free application slots");
                    return Err(ExecError::AppCreate);
                }
            }
        };

        // Stage 2: module load, lock released.
        let module = match self.os().module_load(app_name, file_name) {
            Ok(handle) => handle,
            Err(status) => {
                self.events().write_syslog(&format!(
                    "app_create: could not load {}: {}",
                    file_name, status
                ));
                self.registry().release_app_slot(app_id);
                return Err(ExecError::AppCreate);
            }
        };

        // Stage 3: entry-point resolution, lock released.
        let entry = match self.os().symbol_lookup(entry_point) {
            Ok(address) => address,
            Err(status) => {
                self.events().write_syslog(&format!(
                    "app_create: could not find symbol {} in {}: {}",
                    entry_point, file_name, status
                ));
                self.unload_quietly(module, app_name);
                self.registry().release_app_slot(app_id);
                return Err(ExecError::AppCreate);
            }
        };

        // Stage 4: record population. From here the slot carries the
        // module image and the saved start parameters.
        {
            let mut registry = self.registry();
            let rec = registry.app_mut(app_id);
            rec.app_type = AppType::External;
            rec.state = AppState::LateInit;
            rec.start = StartParams {
                name: app_name.to_string(),
                entry_point: entry_point.to_string(),
                file_name: file_name.to_string(),
                stack_size,
                priority,
                exception_action,
                start_address: Some(entry),
                module_handle: Some(module),
            };
            rec.task.main_task_name = app_name.to_string();
            rec.control = ControlState {
                request: ControlRequest::AppRun,
                timer_ms: 0,
            };
        }

        // Stage 5: primary task, lock released (task creation can block).
        // On failure the module image is unloaded too; keeping it around
        // for post-mortem would leak it with no owner left in the tables.
        let task = match self
            .os()
            .task_create(app_name, entry, stack_size, priority, true)
        {
            Ok(handle) => handle,
            Err(status) => {
                self.events().write_syslog(&format!(
                    "app_create: could not create main task for {}: {}",
                    app_name, status
                ));
                self.unload_quietly(module, app_name);
                self.registry().release_app_slot(app_id);
                return Err(ExecError::AppCreate);
            }
        };

        // Stage 6: task registration; the app is visible to the scanner
        // the moment the lock is released.
        {
            let mut registry = self.registry();
            registry.register_task(task, app_id, app_name);
            let rec = registry.app_mut(app_id);
            rec.task.main_task = Some(task);
            rec.state = AppState::Running;
            registry.counts.external_apps = registry.counts.external_apps.saturating_add(1);
            debug_assert!(registry.counts_consistent());
        }

        self.events().send_event(
            EventId::AppStarted,
            Severity::Info,
            &format!("started {} from {}", app_name, file_name),
        );
        Ok(app_id)
    }

    /// Loads a shared library: reserves (or finds) its slot by name,
    /// optionally loads the module, optionally resolves and invokes the
    /// init entry.
    ///
    /// The three fallible load stages funnel into a single commit-or-
    /// rollback epilogue; there are no early returns between them.
    pub fn load_library(
        &self,
        file_name: Option<&str>,
        entry_point: Option<&str>,
        lib_name: &str,
    ) -> Result<LibraryLoad, ExecError> {
        checked_name(lib_name)?;
        if let Some(path) = file_name {
            checked_path(path)?;
        }
        if let Some(symbol) = entry_point {
            if symbol.len() > MAX_API_NAME {
                return Err(ExecError::BadArgument);
            }
        }

        // Stage 1: name check and slot reservation in one pass.
        let lib_id = {
            let mut registry = self.registry();
            match registry.checkin_library(lib_name) {
                Some(LibraryCheckin::Existing(id)) => {
                    info!("library {} already loaded", lib_name);
                    return Ok(LibraryLoad::AlreadyLoaded(id));
                }
                Some(LibraryCheckin::Reserved(id)) => id,
                None => {
                    self.events()
                        .write_syslog("load_library: no free library slots");
                    return Err(ExecError::LoadLib);
                }
            }
        };

        // Stages 2-4: module load, entry resolution, init call. A failure
        // records the status and skips the remaining stages; all paths
        // fall through to the epilogue below.
        let mut module: Option<ModuleHandle> = None;
        let mut init_entry: Option<SymbolAddress> = None;
        let mut status: Result<(), ExecError> = Ok(());

        if let Some(path) = file_name {
            match self.os().module_load(lib_name, path) {
                Ok(handle) => module = Some(handle),
                Err(os_status) => {
                    self.events().write_syslog(&format!(
                        "load_library: could not load {}: {}",
                        path, os_status
                    ));
                    status = Err(ExecError::LoadLib);
                }
            }
        }

        if status.is_ok() {
            if let Some(symbol) = entry_point.filter(|s| !s.is_empty() && *s != "NULL") {
                match self.os().symbol_lookup(symbol) {
                    Ok(address) => init_entry = Some(address),
                    Err(os_status) => {
                        self.events().write_syslog(&format!(
                            "load_library: could not find init symbol {}: {}",
                            symbol, os_status
                        ));
                        status = Err(ExecError::LoadLib);
                    }
                }
            }
        }

        if status.is_ok() {
            if let Some(entry) = init_entry {
                if let Err(os_status) = self.os().library_init(entry, lib_id) {
                    self.events().write_syslog(&format!(
                        "load_library: init of {} failed: {}",
                        lib_name, os_status
                    ));
                    status = Err(ExecError::LoadLib);
                }
            }
        }

        // Stage 5: commit or roll back.
        match status {
            Ok(()) => {
                let mut registry = self.registry();
                registry.lib_mut(lib_id).module_handle = module;
                registry.counts.libraries = registry.counts.libraries.saturating_add(1);
                debug_assert!(registry.counts_consistent());
                drop(registry);
                debug!("loaded library {}", lib_name);
                self.events().send_event(
                    EventId::LibraryLoaded,
                    Severity::Info,
                    &format!("loaded library {}", lib_name),
                );
                Ok(LibraryLoad::Loaded(lib_id))
            }
            Err(error) => {
                if let Some(handle) = module {
                    self.unload_quietly(handle, lib_name);
                }
                self.registry().clear_library(lib_id);
                Err(error)
            }
        }
    }

    /// Unload on a rollback or teardown path: failure is syslogged, never
    /// propagated.
    pub(crate) fn unload_quietly(&self, module: ModuleHandle, owner_name: &str) {
        if let Err(status) = self.os().module_unload(module) {
            self.events().write_syslog(&format!(
                "could not unload module of {}: {}",
                owner_name, status
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            test_harness::{MockOs, RecordingSink},
            NoHooks,
        },
        corvus_exec_runtime::{
            config::{ExecOptions, MAX_API_NAME, MAX_APPLICATIONS, MAX_LIBRARIES, MAX_PATH_LEN},
            osal::TaskHandle,
            registry::RegisteredCounts,
        },
        test_case::test_case,
    };

    fn fixture() -> AppExecutive<MockOs, RecordingSink, NoHooks> {
        let os = MockOs::new();
        os.define_symbol("Main", 0xDEAD);
        AppExecutive::new(os, RecordingSink::new(), NoHooks, ExecOptions::default())
    }

    fn create_app(
        exec: &AppExecutive<MockOs, RecordingSink, NoHooks>,
        name: &str,
    ) -> Result<AppId, ExecError> {
        exec.app_create("/cf/x.so", "Main", name, 100, 4096, ExceptionAction::RestartApp)
    }

    #[test]
    fn creates_an_app_with_module_task_and_counters() {
        let exec = fixture();
        let app = create_app(&exec, "APPX").unwrap();

        assert_eq!(app, AppId(0));
        let info = exec.app_info(app).unwrap();
        assert_eq!(info.state, AppState::Running);
        assert_eq!(info.app_type, AppType::External);
        assert_eq!(info.start_address, Some(SymbolAddress(0xDEAD)));
        assert_eq!(info.main_task, Some(TaskHandle(1)));
        assert_eq!(info.main_task_name, "APPX");

        assert_eq!(
            exec.registered_counts(),
            RegisteredCounts {
                external_apps: 1,
                libraries: 0,
                tasks: 1,
            }
        );
        assert_eq!(exec.os().loaded_modules(), vec![ModuleHandle(7)]);
        assert_eq!(exec.os().live_tasks(), vec![TaskHandle(1)]);
        assert_eq!(exec.events().count_of(EventId::AppStarted), 1);
    }

    #[test]
    fn missing_symbol_unloads_the_module_exactly_once() {
        let os = MockOs::new();
        // No symbols defined: the lookup for "Main" fails.
        let exec = AppExecutive::new(os, RecordingSink::new(), NoHooks, ExecOptions::default());

        let result = create_app(&exec, "APPX");
        assert_eq!(result, Err(ExecError::AppCreate));
        assert_eq!(exec.os().unloads_of(ModuleHandle(7)), 1);
        assert!(exec.os().loaded_modules().is_empty());
        assert_eq!(exec.registered_counts(), RegisteredCounts::default());
        assert_eq!(exec.app_id_by_name("APPX"), Err(ExecError::AppNotFound));
    }

    enum Failure {
        SlotExhausted,
        ModuleLoad,
        SymbolLookup,
        TaskCreate,
    }

    #[test_case(Failure::SlotExhausted ; "slot exhausted")]
    #[test_case(Failure::ModuleLoad ; "module load fails")]
    #[test_case(Failure::SymbolLookup ; "symbol lookup fails")]
    #[test_case(Failure::TaskCreate ; "task create fails")]
    fn creation_failures_roll_back_completely(failure: Failure) {
        let exec = fixture();
        match failure {
            Failure::SlotExhausted => {
                for n in 0..MAX_APPLICATIONS {
                    create_app(&exec, &format!("APP{}", n)).unwrap();
                }
            }
            Failure::ModuleLoad => exec.os().set_module_load_fails(true),
            Failure::SymbolLookup => exec.os().set_symbol_lookup_fails(true),
            Failure::TaskCreate => exec.os().set_task_create_fails(true),
        }
        let counts_before = exec.registered_counts();
        let modules_before = exec.os().loaded_modules();
        let tasks_before = exec.os().live_tasks();

        let result = create_app(&exec, "VICTIM");

        assert_eq!(result, Err(ExecError::AppCreate));
        assert_eq!(exec.registered_counts(), counts_before);
        assert_eq!(exec.os().loaded_modules(), modules_before);
        assert_eq!(exec.os().live_tasks(), tasks_before);
        assert_eq!(exec.app_id_by_name("VICTIM"), Err(ExecError::AppNotFound));
        assert!(exec.registry().counts_consistent());
    }

    #[test]
    fn failed_creation_returns_the_slot_to_the_pool() {
        let exec = fixture();
        exec.os().set_task_create_fails(true);
        assert_eq!(create_app(&exec, "BROKEN"), Err(ExecError::AppCreate));

        exec.os().set_task_create_fails(false);
        // The next creation takes slot 0 again.
        assert_eq!(create_app(&exec, "HEALTHY"), Ok(AppId(0)));
    }

    #[test]
    fn slot_index_is_stable_across_neighbor_teardown() {
        let exec = fixture();
        let first = create_app(&exec, "FIRST").unwrap();
        let second = create_app(&exec, "SECOND").unwrap();
        assert_eq!((first, second), (AppId(0), AppId(1)));

        exec.cleanup_app(first).unwrap();
        let third = create_app(&exec, "THIRD").unwrap();

        // The freed slot is reused; the survivor never moves.
        assert_eq!(third, AppId(0));
        assert_eq!(exec.app_id_by_name("SECOND"), Ok(AppId(1)));
        assert_eq!(exec.app_info(second).unwrap().name, "SECOND");
    }

    #[test]
    fn duplicate_app_names_are_refused_before_any_load() {
        let exec = fixture();
        create_app(&exec, "APPX").unwrap();
        let loads_before = exec.os().load_count();

        assert_eq!(create_app(&exec, "APPX"), Err(ExecError::AppCreate));
        assert_eq!(exec.os().load_count(), loads_before);
        assert_eq!(exec.registered_counts().external_apps, 1);
    }

    #[test]
    fn over_length_and_empty_arguments_are_bad_arguments() {
        let exec = fixture();
        let long_name = "N".repeat(MAX_API_NAME + 1);
        let long_path = "/".repeat(MAX_PATH_LEN + 1);

        for result in [
            exec.app_create("/cf/x.so", "Main", "", 1, 2, ExceptionAction::RestartApp),
            exec.app_create("/cf/x.so", "Main", &long_name, 1, 2, ExceptionAction::RestartApp),
            exec.app_create(&long_path, "Main", "APPX", 1, 2, ExceptionAction::RestartApp),
            exec.app_create("/cf/x.so", &long_name, "APPX", 1, 2, ExceptionAction::RestartApp),
            exec.app_create("", "Main", "APPX", 1, 2, ExceptionAction::RestartApp),
        ] {
            assert_eq!(result, Err(ExecError::BadArgument));
        }
        // Nothing was touched.
        assert_eq!(exec.os().load_count(), 0);
        assert_eq!(exec.registered_counts(), RegisteredCounts::default());
    }

    #[test]
    fn loading_a_library_twice_returns_the_same_slot_once_loaded() {
        let exec = fixture();
        exec.os().define_symbol("Lib_Init", 0xBEEF);

        let first = exec.load_library(Some("/cf/lib.so"), Some("Lib_Init"), "L");
        assert_eq!(first, Ok(LibraryLoad::Loaded(LibId(0))));
        assert_eq!(exec.registered_counts().libraries, 1);

        let second = exec.load_library(Some("/cf/lib.so"), Some("Lib_Init"), "L");
        assert_eq!(second, Ok(LibraryLoad::AlreadyLoaded(LibId(0))));
        assert_eq!(second.unwrap().id(), LibId(0));

        // One load, one init, one counter bump in total.
        assert_eq!(exec.registered_counts().libraries, 1);
        assert_eq!(exec.os().load_count(), 1);
        assert_eq!(
            exec.os().lib_init_calls(),
            vec![(SymbolAddress(0xBEEF), LibId(0))]
        );
    }

    #[test]
    fn library_init_failure_rolls_the_slot_and_module_back() {
        let exec = fixture();
        exec.os().define_symbol("Lib_Init", 0xBEEF);
        exec.os().fail_library_init(0xBEEF);

        let result = exec.load_library(Some("/cf/lib.so"), Some("Lib_Init"), "L");
        assert_eq!(result, Err(ExecError::LoadLib));
        assert!(exec.os().loaded_modules().is_empty());
        assert_eq!(exec.os().unloads_of(ModuleHandle(7)), 1);
        assert_eq!(exec.lib_id_by_name("L"), Err(ExecError::LibNotFound));
        assert_eq!(exec.registered_counts().libraries, 0);

        // The name is free again afterwards.
        exec.os().define_symbol("Other_Init", 0xF00D);
        assert_eq!(
            exec.load_library(Some("/cf/lib.so"), Some("Other_Init"), "L"),
            Ok(LibraryLoad::Loaded(LibId(0)))
        );
    }

    #[test]
    fn library_init_symbol_failure_unloads_the_module() {
        let exec = fixture();
        let result = exec.load_library(Some("/cf/lib.so"), Some("Nope_Init"), "L");
        assert_eq!(result, Err(ExecError::LoadLib));
        assert!(exec.os().loaded_modules().is_empty());
        assert_eq!(exec.registered_counts().libraries, 0);
    }

    #[test]
    fn null_init_entry_skips_the_init_call() {
        let exec = fixture();
        assert_eq!(
            exec.load_library(Some("/cf/lib.so"), Some("NULL"), "RAW"),
            Ok(LibraryLoad::Loaded(LibId(0)))
        );
        assert!(exec.os().lib_init_calls().is_empty());
        assert_eq!(exec.registered_counts().libraries, 1);
    }

    #[test]
    fn fileless_library_reserves_a_named_slot_only() {
        let exec = fixture();
        assert_eq!(
            exec.load_library(None, None, "BUILTIN"),
            Ok(LibraryLoad::Loaded(LibId(0)))
        );
        assert_eq!(exec.os().load_count(), 0);
        assert_eq!(exec.lib_id_by_name("BUILTIN"), Ok(LibId(0)));
    }

    #[test]
    fn registry_counts_stay_consistent_under_churn() {
        use rand::{rngs::StdRng, Rng, SeedableRng};

        let exec = fixture();
        let mut rng = StdRng::seed_from_u64(7);
        let mut live: Vec<AppId> = Vec::new();
        let mut serial = 0u32;

        for _ in 0..200 {
            if live.is_empty() || rng.gen_bool(0.6) {
                serial += 1;
                if let Ok(app) = create_app(&exec, &format!("APP{}", serial)) {
                    live.push(app);
                }
            } else {
                let app = live.swap_remove(rng.gen_range(0..live.len()));
                exec.cleanup_app(app).unwrap();
            }
            assert!(exec.registry().counts_consistent());
            assert_eq!(exec.registered_counts().external_apps, live.len() as u32);
        }
    }

    #[test]
    fn library_table_exhaustion_is_a_load_error() {
        let exec = fixture();
        for n in 0..MAX_LIBRARIES {
            exec.load_library(None, None, &format!("LIB{}", n)).unwrap();
        }
        assert_eq!(
            exec.load_library(None, None, "ONE_TOO_MANY"),
            Err(ExecError::LoadLib)
        );
        assert_eq!(exec.registered_counts().libraries, MAX_LIBRARIES as u32);
    }
}
