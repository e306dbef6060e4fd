use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use timegraph::config::{load_config, load_config_from};
use timegraph::otlp::OtlpSource;
use timegraph::redraw::RedrawState;
use timegraph::synthetic::{self, SyntheticConfig};
use timegraph::types::{time_point_to_utc_string, NANOS_PER_MILLISECOND};
use timegraph::{
    DataSource, DataSourceId, EngineConfig, Event, FilterExpression, HostListener, Row, RowId,
    SavedFilter, Tag, TimeGraphViewer, TimePoint,
};

#[derive(Parser)]
#[command(name = "timegraph")]
#[command(about = "Compute time graph rows for a trace file or generated data, without a GUI")]
struct Cli {
    /// OTLP trace export, JSON or gzip-compressed JSON
    #[arg(long, conflicts_with = "synthetic")]
    file: Option<PathBuf>,

    /// Use generated data instead of a file
    #[arg(long)]
    synthetic: bool,

    /// Number of generated thread rows
    #[arg(long, default_value = "16")]
    rows: usize,

    #[arg(long, default_value = "0")]
    seed: u64,

    /// Width of the time graph in pixels
    #[arg(long, default_value = "1000")]
    pixel_width: i64,

    /// Window to zoom to, in milliseconds from the start of the data, e.g. `10:20.5`.
    /// Can be repeated, windows are applied in order.
    #[arg(long = "window", value_parser = parse_window)]
    windows: Vec<(f64, f64)>,

    /// Filter applied to every row, e.g. `excluded:name == RUNNING`. Can be repeated.
    #[arg(long = "filter")]
    filters: Vec<String>,

    /// Config file, the default location in the user's config directory is used if not given
    #[arg(long)]
    config: Option<PathBuf>,

    /// Maximum number of events printed per row
    #[arg(long, default_value = "8")]
    max_events: usize,
}

fn parse_window(text: &str) -> Result<(f64, f64)> {
    let Some((start, end)) = text.split_once(':') else {
        bail!("expected START:END, got {:?}", text);
    };
    let start: f64 = start.trim().parse().context("invalid window start")?;
    let end: f64 = end.trim().parse().context("invalid window end")?;
    if end <= start {
        bail!("window end must be after its start");
    }
    Ok((start, end))
}

fn parse_filter(text: &str) -> Result<SavedFilter> {
    let Some((tag, expression)) = text.split_once(':') else {
        bail!("expected TAG:EXPRESSION, got {:?}", text);
    };
    let Some(tag) = Tag::parse(tag) else {
        bail!("unknown tag {:?}, expected dimmed, excluded, highlighted or bound", tag);
    };
    FilterExpression::parse(expression)
        .with_context(|| format!("invalid filter expression {:?}", expression))?;
    Ok(SavedFilter {
        name: text.to_string(),
        tag,
        expression: expression.trim().to_string(),
        active: true,
    })
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Logs what the viewer asks the host to do.
struct LogListener;

impl HostListener for LogListener {
    fn on_build_finished(&mut self, data_source: DataSourceId) {
        tracing::info!(%data_source, "rows built");
    }

    fn on_zoom_applied(&mut self, rows: &[RowId]) {
        tracing::debug!(rows = rows.len(), "zoom applied");
    }
}

const QUIESCENCE_TIMEOUT: Duration = Duration::from_secs(60);

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config_from(path)?,
        None => load_config().unwrap_or_else(|err| {
            tracing::warn!(error = %err, "failed to load config, using defaults");
            EngineConfig::default()
        }),
    };
    for filter in &cli.filters {
        config.saved_filters.push(parse_filter(filter)?);
    }

    let source: Arc<dyn DataSource> = match (&cli.file, cli.synthetic) {
        (Some(path), _) => Arc::new(OtlpSource::load(path)?),
        (None, true) => Arc::new(synthetic::generate(&SyntheticConfig {
            rows: cli.rows,
            seed: cli.seed,
            ..Default::default()
        })),
        (None, false) => bail!("either --file or --synthetic is required"),
    };
    let (data_start, data_end) = source.bounds();

    let id = DataSourceId(1);
    let mut viewer = TimeGraphViewer::new(config, Box::new(LogListener));
    viewer.open_data_source(id, source);
    viewer.on_trace_selected(id);
    viewer.notify_window_changed(data_start, data_end, cli.pixel_width);
    settle(&mut viewer)?;
    print_rows(&viewer, cli.max_events);

    for (start_ms, end_ms) in &cli.windows {
        let start = data_start + millis_to_time_point(*start_ms);
        let end = data_start + millis_to_time_point(*end_ms);
        viewer.notify_window_changed(start, end, cli.pixel_width);
        settle(&mut viewer)?;
        print_rows(&viewer, cli.max_events);
    }

    Ok(())
}

fn millis_to_time_point(millis: f64) -> TimePoint {
    (millis * NANOS_PER_MILLISECOND as f64) as TimePoint
}

/// Wait for all background work, acknowledging redraws like a host that paints instantly.
fn settle(viewer: &mut TimeGraphViewer) -> Result<()> {
    if !viewer.wait_until_quiescent(QUIESCENCE_TIMEOUT) {
        bail!(
            "engine still busy after {:?}, {} operations in flight",
            QUIESCENCE_TIMEOUT,
            viewer.dirty_count()
        );
    }
    while viewer.redraw_state() != RedrawState::Idle {
        viewer.redraw_completed();
    }
    Ok(())
}

fn print_rows(viewer: &TimeGraphViewer, max_events: usize) {
    if let Some((start, end)) = viewer.window() {
        println!(
            "window {} .. {}",
            time_point_to_utc_string(start),
            time_point_to_utc_string(end)
        );
    }
    let Some(model) = viewer.active_rows() else {
        println!("no rows");
        return;
    };
    for root in model.roots() {
        print_row(root, 0, max_events);
    }
    println!();
}

fn print_row(row: &Row, depth: usize, max_events: usize) {
    let visible: Vec<&Event> = row.zoomed_events.iter().filter(|e| !e.is_gap()).collect();
    let shown = visible
        .iter()
        .take(max_events)
        .map(|event| format_event(event))
        .collect::<Vec<_>>()
        .join(" ");
    let more = visible.len().saturating_sub(max_events);
    println!(
        "{:indent$}{} ({} events{}) {}",
        "",
        row.name,
        visible.len(),
        if more > 0 { format!(", {} more", more) } else { String::new() },
        shown,
        indent = depth * 2
    );
    for child in &row.children {
        print_row(child, depth + 1, max_events);
    }
}

fn format_event(event: &Event) -> String {
    let style = event.style.as_deref().unwrap_or("~");
    let flags = if event.tags.is_empty() {
        String::new()
    } else {
        format!(" {:?}", event.tags)
    };
    format!(
        "[{} {:.3}ms{}]",
        style,
        event.duration as f64 / NANOS_PER_MILLISECOND as f64,
        flags
    )
}
