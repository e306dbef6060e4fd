use crate::row::RowModel;
use crate::task::{TaskOutcome, TaskScope};
use crate::types::{DataSourceId, RowId};

/// A change to one data source's rows, computed in the background and applied on the
/// foreground if the staleness gate accepts it.
pub(crate) type RowMutation = Box<dyn FnOnce(&mut RowModel) + Send>;

/// What background tasks send back to the viewer. Messages of one task arrive in the order the
/// task sent them, `*Finished` is always a task's last message.
pub(crate) enum EngineMessage {
    Commit {
        scope: TaskScope,
        seq: u64,
        data_source: DataSourceId,
        mutation: RowMutation,
    },
    BuildFinished {
        data_source: DataSourceId,
        seq: u64,
        outcome: TaskOutcome,
    },
    ZoomFinished {
        data_source: DataSourceId,
        seq: u64,
        outcome: TaskOutcome,
        rows: Vec<RowId>,
        full_scan_done: bool,
    },
}
