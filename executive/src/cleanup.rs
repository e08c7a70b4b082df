use {
    crate::{AppExecutive, SubsystemCleanup},
    corvus_exec_runtime::{
        error::{worst, ExecError},
        events::EventSink,
        osal::{OsServices, TaskHandle},
        records::{AppId, AppType},
    },
    log::debug,
};

impl<OS, EV, HK> AppExecutive<OS, EV, HK>
where
    OS: OsServices,
    EV: EventSink,
    HK: SubsystemCleanup,
{
    /// Tears one application down completely: subsystem hooks, child
    /// tasks, the primary task, the module image, and finally the slot.
    ///
    /// Failures along the way are logged and folded into the worst
    /// observed status; cleanup never stops part-way.
    pub(crate) fn cleanup_app(&self, app: AppId) -> Result<(), ExecError> {
        // Subsystem hooks run first, outside the lock; they may call back
        // into the query surface.
        let mut status = Ok(());
        let hook_results = [
            ("tables", self.hooks().cleanup_tables(app)),
            ("software bus", self.hooks().cleanup_software_bus(app)),
            ("time", self.hooks().cleanup_time(app)),
            ("events", self.hooks().cleanup_events(app)),
        ];
        for (subsystem, result) in hook_results {
            if let Err(os_status) = result {
                self.events().write_syslog(&format!(
                    "cleanup_app: {} cleanup for {} failed: {}",
                    subsystem, app, os_status
                ));
                status = worst(status, Err(ExecError::AppCleanup));
            }
        }

        let (app_type, app_name, main_task, module, children) = {
            let registry = self.registry();
            let rec = registry.app(app);
            if rec.is_slot_free() {
                return status;
            }
            let main_task = rec.task.main_task;
            let children = match main_task {
                Some(main) => registry.child_tasks_of(app, main),
                None => Vec::new(),
            };
            (
                rec.app_type,
                rec.start.name.clone(),
                main_task,
                rec.start.module_handle,
                children,
            )
        };

        // Children before the primary, each reclaimed lock-released.
        for child in children {
            status = worst(status, self.cleanup_task_resources(child));
        }
        if let Some(main) = main_task {
            status = worst(status, self.cleanup_task_resources(main));
        }

        if app_type == AppType::External {
            if let Some(handle) = module {
                self.unload_quietly(handle, &app_name);
            }
        }

        {
            let mut registry = self.registry();
            if app_type == AppType::External {
                registry.counts.external_apps = registry.counts.external_apps.saturating_sub(1);
            }
            registry.release_app_slot(app);
            debug_assert!(registry.counts_consistent());
        }
        debug!("cleaned up {}", app_name);
        status
    }

    /// Reclaims every kernel object a task still owns, then the task
    /// itself, then its table entry.
    ///
    /// Enumeration is repeated until it comes back empty; a pass that
    /// deletes nothing, or that finds at least as many objects as the
    /// pass before it, means something refuses to die and the loop stops
    /// rather than spin. The first failing delete fixes the kind-specific
    /// status that gets syslogged.
    pub(crate) fn cleanup_task_resources(&self, task: TaskHandle) -> Result<(), ExecError> {
        let mut prev_found = u32::MAX;
        let mut first_failure: Option<ExecError> = None;
        let mut remaining;

        loop {
            let mut found = 0u32;
            let mut deleted = 0u32;
            self.os().for_each_object(task, &mut |id| {
                found += 1;
                let kind = self.os().identify_object(id);
                match self.os().delete_object(id, kind) {
                    Ok(()) => deleted += 1,
                    Err(os_status) => {
                        if first_failure.is_none() {
                            let failure = ExecError::from_object_kind(kind);
                            first_failure = Some(failure);
                            self.events().write_syslog(&format!(
                                "cleanup: {:?} {:?} of task {:?} would not delete ({}): {}",
                                kind, id, task, os_status, failure
                            ));
                        }
                    }
                }
            });
            remaining = found.saturating_sub(deleted);
            if found == 0 {
                break;
            }
            if deleted == 0 || found >= prev_found {
                break;
            }
            prev_found = found;
        }

        let mut status = match self.os().task_delete(task) {
            Ok(()) => Ok(()),
            Err(os_status) => {
                self.events().write_syslog(&format!(
                    "cleanup: task {:?} would not delete: {}",
                    task, os_status
                ));
                Err(ExecError::TaskDelete)
            }
        };
        if remaining > 0 {
            status = Err(ExecError::AppCleanup);
        }

        {
            let mut registry = self.registry();
            if let Some(index) = registry.task_index_for(task) {
                registry.invalidate_task(index);
            }
        }
        status
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            test_harness::{MockOs, RecordingSink},
            AppExecutive, NoHooks,
        },
        corvus_exec_runtime::{
            config::ExecOptions,
            osal::{ModuleHandle, ObjectKind, OsStatus},
            records::ExceptionAction,
        },
        enum_iterator::all,
        test_case::test_case,
    };

    fn fixture() -> AppExecutive<MockOs, RecordingSink, NoHooks> {
        fixture_with_hooks(NoHooks)
    }

    fn fixture_with_hooks<HK: SubsystemCleanup>(hooks: HK) -> AppExecutive<MockOs, RecordingSink, HK> {
        let os = MockOs::new();
        os.define_symbol("Main", 0xDEAD);
        AppExecutive::new(os, RecordingSink::new(), hooks, ExecOptions::default())
    }

    fn create_app<HK: SubsystemCleanup>(
        exec: &AppExecutive<MockOs, RecordingSink, HK>,
        name: &str,
    ) -> (AppId, TaskHandle) {
        let app = exec
            .app_create("/cf/x.so", "Main", name, 100, 4096, ExceptionAction::RestartApp)
            .unwrap();
        let main_task = exec.app_info(app).unwrap().main_task.unwrap();
        (app, main_task)
    }

    #[test]
    fn reclaim_drains_all_objects_and_converges_quickly() {
        let exec = fixture();
        let (_, task) = create_app(&exec, "APPX");
        let object_count = 5;
        for kind in all::<ObjectKind>().take(object_count) {
            exec.os().add_object(task, kind);
        }
        let passes_before = exec.os().enumeration_passes();

        assert_eq!(exec.cleanup_task_resources(task), Ok(()));

        assert!(exec.os().objects_of(task).is_empty());
        assert!(exec.os().live_tasks().is_empty());
        assert_eq!(exec.registered_counts().tasks, 0);
        // Everything deletable goes in one pass plus the empty check.
        let passes = exec.os().enumeration_passes() - passes_before;
        assert!(passes <= object_count as u32 + 1, "took {} passes", passes);
    }

    #[test]
    fn stuck_queue_stops_reclaim_after_one_pass() {
        let exec = fixture();
        let (_, task) = create_app(&exec, "APPX");
        let queue = exec.os().add_object(task, ObjectKind::Queue);
        exec.os().stick_object(queue);
        let passes_before = exec.os().enumeration_passes();

        let status = exec.cleanup_task_resources(task);

        // No forward progress: exactly one enumeration, the queue status
        // syslogged, the task delete still attempted, and the residue
        // reported as a cleanup failure.
        assert_eq!(exec.os().enumeration_passes() - passes_before, 1);
        assert!(exec.events().syslog_contains("Queue"));
        assert!(exec.os().live_tasks().is_empty());
        assert_eq!(status, Err(ExecError::AppCleanup));
    }

    #[test]
    fn primary_task_delete_failure_is_its_own_status() {
        let exec = fixture();
        let (_, task) = create_app(&exec, "APPX");
        exec.os().set_task_delete_fails(task);

        assert_eq!(exec.cleanup_task_resources(task), Err(ExecError::TaskDelete));
        // The table entry is invalidated regardless.
        assert_eq!(exec.registered_counts().tasks, 0);
    }

    #[test_case(ObjectKind::Queue, "queue delete failed" ; "queue")]
    #[test_case(ObjectKind::BinSem, "binary semaphore delete failed" ; "binary semaphore")]
    #[test_case(ObjectKind::CountSem, "counting semaphore delete failed" ; "counting semaphore")]
    #[test_case(ObjectKind::Mutex, "mutex delete failed" ; "mutex")]
    #[test_case(ObjectKind::Timer, "timer delete failed" ; "timer")]
    #[test_case(ObjectKind::Task, "child task delete failed" ; "child task")]
    fn first_failing_delete_is_reported_by_kind(kind: ObjectKind, needle: &str) {
        let exec = fixture();
        let (_, task) = create_app(&exec, "APPX");
        let object = exec.os().add_object(task, kind);
        exec.os().stick_object(object);

        assert_eq!(exec.cleanup_task_resources(task), Err(ExecError::AppCleanup));
        assert!(
            exec.events().syslog_contains(needle),
            "syslog misses {}: {:?}",
            needle,
            exec.events().syslog()
        );
    }

    #[test]
    fn partial_progress_keeps_reclaiming_until_dry() {
        let exec = fixture();
        let (_, task) = create_app(&exec, "APPX");
        let stuck = exec.os().add_object(task, ObjectKind::Timer);
        exec.os().stick_object(stuck);
        exec.os().add_object(task, ObjectKind::Queue);
        exec.os().add_object(task, ObjectKind::BinSem);

        let status = exec.cleanup_task_resources(task);

        // The deletable objects are gone; only the stuck timer remains.
        assert_eq!(exec.os().objects_of(task), vec![stuck]);
        assert_eq!(status, Err(ExecError::AppCleanup));
    }

    #[test]
    fn app_cleanup_reclaims_children_module_and_slot() {
        let exec = fixture();
        let (app, main_task) = create_app(&exec, "APPX");

        // A child task with its own baggage.
        let child = exec
            .os()
            .task_create("CHILD", corvus_exec_runtime::osal::SymbolAddress(0xC0DE), 2048, 90, true)
            .unwrap();
        exec.registry().register_task(child, app, "CHILD");
        exec.os().add_object(child, ObjectKind::Queue);
        exec.os().add_object(main_task, ObjectKind::Mutex);

        assert_eq!(exec.cleanup_app(app), Ok(()));

        assert!(exec.os().live_tasks().is_empty());
        assert!(exec.os().objects_of(child).is_empty());
        assert!(exec.os().objects_of(main_task).is_empty());
        assert_eq!(exec.os().unloads_of(ModuleHandle(7)), 1);
        assert_eq!(exec.app_info(app), Err(ExecError::AppNotFound));
        assert_eq!(exec.registered_counts().external_apps, 0);
        assert_eq!(exec.registered_counts().tasks, 0);
        assert!(exec.registry().counts_consistent());
    }

    struct FailingTableHooks;

    impl SubsystemCleanup for FailingTableHooks {
        fn cleanup_tables(&self, _app: AppId) -> Result<(), OsStatus> {
            Err(OsStatus(-70))
        }
    }

    #[test]
    fn hook_failures_are_folded_in_but_never_abort() {
        let exec = fixture_with_hooks(FailingTableHooks);
        let (app, _) = create_app(&exec, "APPX");

        let status = exec.cleanup_app(app);

        // The app is fully gone despite the hook failure.
        assert_eq!(status, Err(ExecError::AppCleanup));
        assert!(exec.events().syslog_contains("tables"));
        assert_eq!(exec.app_info(app), Err(ExecError::AppNotFound));
        assert!(exec.os().loaded_modules().is_empty());
    }

    #[test]
    fn module_unload_failure_is_logged_not_fatal() {
        let exec = fixture();
        let (app, _) = create_app(&exec, "APPX");
        // Unload the image behind the executive's back so the teardown
        // unload fails.
        exec.os().module_unload(ModuleHandle(7)).unwrap();

        assert_eq!(exec.cleanup_app(app), Ok(()));
        assert!(exec.events().syslog_contains("unload"));
        assert_eq!(exec.app_info(app), Err(ExecError::AppNotFound));
    }
}
