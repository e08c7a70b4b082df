use {
    crate::{AppExecutive, SubsystemCleanup},
    corvus_exec_runtime::{
        events::EventSink,
        osal::OsServices,
        records::{AppId, AppState, AppType, ControlRequest},
    },
    log::trace,
};

impl<OS, EV, HK> AppExecutive<OS, EV, HK>
where
    OS: OsServices,
    EV: EventSink,
    HK: SubsystemCleanup,
{
    /// One background sweep. `elapsed_ms` is the time since the previous
    /// call.
    ///
    /// When nothing is pending, no command has arrived, and the sweep
    /// timer has not run down, this only decrements the timer; that is
    /// the path the background task takes almost every tick. A full sweep
    /// visits slots in index order, arms the graceful-shutdown countdown
    /// for running apps with a pending request, and dispatches expired
    /// requests with the lock dropped (dispatch may re-enter creation,
    /// which takes the lock itself). Nothing observed about a slot before
    /// the drop is assumed after re-acquisition.
    ///
    /// Returns true if any app has a state change in flight; the caller
    /// can shorten its next interval accordingly.
    pub fn run_scan(&self, elapsed_ms: u32) -> bool {
        let command_count = self.command_count();
        let mut registry = self.registry();

        if registry.pending_state_changes == 0
            && registry.last_scan_command_count == command_count
            && registry.background_timer_ms > elapsed_ms
        {
            registry.background_timer_ms -= elapsed_ms;
            return false;
        }

        registry.background_timer_ms = self.options().scan_rate_ms;
        registry.last_scan_command_count = command_count;
        registry.pending_state_changes = 0;

        for slot in 0..registry.apps().len() {
            let app = AppId(slot as u32);
            let (state, request, timer_ms) = {
                let rec = registry.app(app);
                if rec.app_type != AppType::External || rec.is_slot_free() {
                    continue;
                }
                (rec.state, rec.control.request, rec.control.timer_ms)
            };

            if state > AppState::Running {
                registry.pending_state_changes += 1;
                if timer_ms > elapsed_ms {
                    registry.app_mut(app).control.timer_ms = timer_ms - elapsed_ms;
                } else {
                    registry.app_mut(app).control.timer_ms = 0;
                    drop(registry);
                    self.process_control_request(app);
                    registry = self.registry();
                }
            } else if state == AppState::Running && request > ControlRequest::AppRun {
                trace!("app {} entering graceful shutdown", slot);
                registry.pending_state_changes += 1;
                let deadline_ms = self.options().kill_deadline_ms();
                let rec = registry.app_mut(app);
                rec.state = AppState::Waiting;
                rec.control.timer_ms = deadline_ms;
            }
        }

        registry.pending_state_changes != 0
    }
}
