use {crate::osal::ObjectKind, thiserror::Error};

/// Failure taxonomy of the executive.
///
/// Creation failures are rolled back at the point of failure and returned
/// to the caller. Teardown failures are logged, folded into a worst-case
/// status, and never abort a cleanup in progress.
#[derive(Error, Copy, Clone, Debug, Eq, PartialEq)]
pub enum ExecError {
    #[error("application could not be created")]
    AppCreate,
    #[error("library could not be loaded")]
    LoadLib,
    #[error("null or over-length argument")]
    BadArgument,
    #[error("one or more task-owned objects could not be deleted")]
    AppCleanup,
    #[error("primary task delete failed")]
    TaskDelete,
    #[error("child task delete failed")]
    ChildTaskDelete,
    #[error("queue delete failed")]
    QueueDelete,
    #[error("binary semaphore delete failed")]
    BinSemDelete,
    #[error("counting semaphore delete failed")]
    CountSemDelete,
    #[error("mutex delete failed")]
    MutSemDelete,
    #[error("timer delete failed")]
    TimerDelete,
    #[error("no such application")]
    AppNotFound,
    #[error("no such library")]
    LibNotFound,
    #[error("no such task")]
    TaskNotFound,
}

impl ExecError {
    /// Kind-specific status for the first object delete that fails during
    /// task-resource reclamation.
    pub fn from_object_kind(kind: ObjectKind) -> Self {
        match kind {
            ObjectKind::Task => Self::ChildTaskDelete,
            ObjectKind::Queue => Self::QueueDelete,
            ObjectKind::BinSem => Self::BinSemDelete,
            ObjectKind::CountSem => Self::CountSemDelete,
            ObjectKind::Mutex => Self::MutSemDelete,
            ObjectKind::Timer => Self::TimerDelete,
            ObjectKind::Stream | ObjectKind::Module => Self::AppCleanup,
        }
    }

    fn severity(self) -> u8 {
        match self {
            Self::AppNotFound | Self::LibNotFound | Self::TaskNotFound | Self::BadArgument => 1,
            Self::ChildTaskDelete
            | Self::QueueDelete
            | Self::BinSemDelete
            | Self::CountSemDelete
            | Self::MutSemDelete
            | Self::TimerDelete => 2,
            Self::AppCreate | Self::LoadLib | Self::AppCleanup => 3,
            Self::TaskDelete => 4,
        }
    }
}

/// Folds two teardown statuses, keeping the worst. Ties keep the earlier
/// status, so the first failure of a given severity is the one reported.
pub fn worst(a: Result<(), ExecError>, b: Result<(), ExecError>) -> Result<(), ExecError> {
    match (a, b) {
        (Ok(()), b) => b,
        (a, Ok(())) => a,
        (Err(ea), Err(eb)) => {
            if eb.severity() > ea.severity() {
                Err(eb)
            } else {
                Err(ea)
            }
        }
    }
}
