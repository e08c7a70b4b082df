use {
    crate::{AppExecutive, SubsystemCleanup},
    corvus_exec_runtime::{
        error::ExecError,
        events::{EventId, EventSink, Severity},
        osal::OsServices,
        records::{AppId, AppType, ControlRequest, StartParams},
    },
    log::{error, info},
    num_traits::FromPrimitive,
};

impl<OS, EV, HK> AppExecutive<OS, EV, HK>
where
    OS: OsServices,
    EV: EventSink,
    HK: SubsystemCleanup,
{
    /// Command-processor ingress: records a disposition for the scanner
    /// to act on. Only external apps can be controlled.
    pub fn set_control_request(
        &self,
        app: AppId,
        request: ControlRequest,
    ) -> Result<(), ExecError> {
        let mut registry = self.registry();
        let rec = registry.get_app(app).ok_or(ExecError::AppNotFound)?;
        if rec.is_slot_free() {
            return Err(ExecError::AppNotFound);
        }
        if rec.app_type != AppType::External {
            return Err(ExecError::BadArgument);
        }
        registry.app_mut(app).control.request = request;
        Ok(())
    }

    /// Raw-integer ingress. Values outside the known enumeration are
    /// rejected here, at the boundary, so the tables only ever hold
    /// well-formed requests.
    pub fn set_control_request_raw(&self, app: AppId, raw: u32) -> Result<(), ExecError> {
        let request = ControlRequest::from_u32(raw).ok_or(ExecError::BadArgument)?;
        self.set_control_request(app, request)
    }

    /// Dispatches an expired control request for one slot.
    ///
    /// Called by the scanner with the registry lock released; the slot is
    /// re-read here, and may legitimately have emptied in the window. The
    /// start parameters are snapshotted before any teardown so restart
    /// and reload can re-create the app after the slot is cleared.
    pub(crate) fn process_control_request(&self, app: AppId) {
        let (request, params) = {
            let registry = self.registry();
            let rec = registry.app(app);
            if rec.is_slot_free() {
                return;
            }
            (rec.control.request, rec.start.clone())
        };

        match request {
            ControlRequest::AppExit => {
                self.teardown(app, &params);
                info!("{} exited", params.name);
                self.events().send_event(
                    EventId::AppExited,
                    Severity::Info,
                    &format!("{} exited", params.name),
                );
            }
            ControlRequest::AppError => {
                self.teardown(app, &params);
                self.events().send_event(
                    EventId::AppExitedOnError,
                    Severity::Error,
                    &format!("{} exited with an error", params.name),
                );
            }
            ControlRequest::SysDelete => {
                self.teardown(app, &params);
                self.events().send_event(
                    EventId::AppStopped,
                    Severity::Info,
                    &format!("stopped {}", params.name),
                );
            }
            ControlRequest::SysRestart => {
                self.teardown(app, &params);
                match self.recreate(&params) {
                    Ok(new_id) => {
                        self.events().send_event(
                            EventId::AppRestarted,
                            Severity::Info,
                            &format!("restarted {} ({})", params.name, new_id),
                        );
                    }
                    Err(err) => {
                        self.events().send_event(
                            EventId::AppRestartFailed,
                            Severity::Error,
                            &format!("could not restart {}: {}", params.name, err),
                        );
                    }
                }
            }
            ControlRequest::SysReload => {
                // Same shape as restart; the file is re-read from disk, so
                // a replaced image takes effect here.
                self.teardown(app, &params);
                match self.recreate(&params) {
                    Ok(new_id) => {
                        self.events().send_event(
                            EventId::AppReloaded,
                            Severity::Info,
                            &format!("reloaded {} from {} ({})", params.name, params.file_name, new_id),
                        );
                    }
                    Err(err) => {
                        self.events().send_event(
                            EventId::AppReloadFailed,
                            Severity::Error,
                            &format!("could not reload {}: {}", params.name, err),
                        );
                    }
                }
            }
            // A pending exception (or a stale AppRun that should never
            // have reached the waiting state) is rewritten to a plain
            // delete instead of being dispatched, so a wedged app cannot
            // emit this event on every sweep.
            ControlRequest::SysException | ControlRequest::AppRun => {
                error!(
                    "{}: invalid control request {:?}, forcing delete",
                    params.name, request
                );
                self.events().send_event(
                    EventId::InvalidControlRequest,
                    Severity::Error,
                    &format!("{}: invalid control request {:?}", params.name, request),
                );
                let mut registry = self.registry();
                let rec = registry.app_mut(app);
                if !rec.is_slot_free() {
                    rec.control.request = ControlRequest::SysDelete;
                }
            }
        }
    }

    fn teardown(&self, app: AppId, params: &StartParams) {
        if let Err(status) = self.cleanup_app(app) {
            self.events().write_syslog(&format!(
                "teardown of {} finished with {}",
                params.name, status
            ));
        }
    }

    fn recreate(&self, params: &StartParams) -> Result<AppId, ExecError> {
        self.app_create(
            &params.file_name,
            &params.entry_point,
            &params.name,
            params.priority,
            params.stack_size,
            params.exception_action,
        )
    }
}
