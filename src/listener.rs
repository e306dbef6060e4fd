use crate::types::{DataSourceId, RowId};

/// Notifications the viewer sends to the host that paints it. All methods are called on the
/// thread that owns the viewer.
pub trait HostListener {
    fn on_build_started(&mut self, _data_source: DataSourceId) {}

    fn on_build_finished(&mut self, _data_source: DataSourceId) {}

    /// A zoom finished and its rows were committed.
    fn on_zoom_applied(&mut self, _rows: &[RowId]) {}

    /// Paint the time graph, then call [crate::viewer::TimeGraphViewer::redraw_completed].
    fn on_redraw_needed(&mut self) {}
}

/// For hosts that poll the viewer instead of listening.
#[derive(Debug, Default)]
pub struct NoopListener;

impl HostListener for NoopListener {}
