pub mod build;
pub mod config;
pub mod dirty;
pub mod filter;
pub mod gate;
pub mod listener;
pub mod materializer;
mod message;
pub mod otlp;
pub mod redraw;
pub mod row;
pub mod source;
pub mod synthetic;
pub mod task;
pub mod task_timer;
pub mod types;
pub mod viewer;
pub mod zoom;

pub use config::{EngineConfig, SavedFilter};
pub use filter::{FilterExpression, PredicateSet, Tag};
pub use listener::{HostListener, NoopListener};
pub use row::{Row, RowModel};
pub use source::{DataSource, MemorySource, RowEntry};
pub use types::{DataSourceId, Event, EventTags, Interval, RowId, Sampling, TimePoint};
pub use viewer::TimeGraphViewer;
