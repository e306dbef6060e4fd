//! Data source reading OpenTelemetry trace exports.
//!
//! Every node (`service.name` of the resource) becomes a top-level row whose states show when the
//! node was busy. Below it, spans are packed greedily into lanes of non-overlapping spans, one
//! child row per lane. Time between spans is filled with unstyled intervals so every row tiles
//! its range.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

use anyhow::Result;
use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use opentelemetry_proto::tonic::common::v1::any_value::Value;
use opentelemetry_proto::tonic::common::v1::KeyValue;

use crate::source::{DataSource, MemorySource, RowEntry};
use crate::task_timer::TaskTimer;
use crate::types::{time_point_from_unix_nano, Attributes, Interval, RowId, TimePoint};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

pub fn value_to_text(value_opt: &Option<Value>) -> String {
    let Some(value) = value_opt else {
        return "empty".to_string();
    };

    match value {
        Value::StringValue(s) => s.clone(),
        Value::BoolValue(b) => b.to_string(),
        Value::IntValue(i) => i.to_string(),
        Value::DoubleValue(d) => d.to_string(),
        Value::ArrayValue(a) => format!(
            "[{}]",
            a.values
                .iter()
                .map(|v| value_to_text(&v.value))
                .collect::<Vec<_>>()
                .join(", ")
        ),
        Value::KvlistValue(kv) => format!(
            "{{{}}}",
            kv.values
                .iter()
                .map(|v| format!(
                    "{}: {}",
                    v.key,
                    value_to_text(v.value.as_ref().map(|v| &v.value).unwrap_or(&None))
                ))
                .collect::<Vec<_>>()
                .join(", ")
        ),
        Value::BytesValue(bytes) => hex::encode(bytes),
    }
}

fn attributes_to_text(attributes: &[KeyValue]) -> Attributes {
    attributes
        .iter()
        .map(|attribute| {
            let value = attribute.value.clone().and_then(|v| v.value);
            (attribute.key.clone(), value_to_text(&value))
        })
        .collect()
}

/// Parse a JSON array of export requests, gzip-compressed or not.
pub fn parse_trace_file(file_bytes: &[u8]) -> Result<Vec<ExportTraceServiceRequest>> {
    let t = TaskTimer::new("Parsing trace file");

    let mut decompressed = Vec::new();
    let json_bytes = if file_bytes.starts_with(&GZIP_MAGIC) {
        flate2::read::GzDecoder::new(file_bytes).read_to_end(&mut decompressed)?;
        decompressed.as_slice()
    } else {
        file_bytes
    };

    let file_str = std::str::from_utf8(json_bytes)
        .map_err(|e| anyhow::anyhow!("File is not UTF8!: {}", e))?;
    let traces: Vec<ExportTraceServiceRequest> = serde_json::from_str(file_str)?;

    t.stop();
    Ok(traces)
}

#[derive(Debug, Clone)]
struct SpanRecord {
    name: String,
    start: TimePoint,
    end: TimePoint,
    attributes: Attributes,
}

/// Flatten the requests into spans grouped by node name.
fn extract_spans(requests: &[ExportTraceServiceRequest]) -> BTreeMap<String, Vec<SpanRecord>> {
    let mut spans_by_node: BTreeMap<String, Vec<SpanRecord>> = BTreeMap::new();
    let mut skipped = 0;

    for request in requests {
        for rs in &request.resource_spans {
            let node_name = rs
                .resource
                .as_ref()
                .map(|resource| {
                    attributes_to_text(&resource.attributes)
                        .remove("service.name")
                        .unwrap_or_else(|| "unknown".to_string())
                })
                .unwrap_or_else(|| "no resource".to_string());

            for ss in &rs.scope_spans {
                for span in &ss.spans {
                    let start = time_point_from_unix_nano(span.start_time_unix_nano);
                    let end = time_point_from_unix_nano(span.end_time_unix_nano);
                    if end <= start {
                        skipped += 1;
                        continue;
                    }

                    let mut attributes = attributes_to_text(&span.attributes);
                    attributes.insert("node".to_string(), node_name.clone());
                    attributes.insert("span_id".to_string(), hex::encode(&span.span_id));
                    if !span.parent_span_id.is_empty() {
                        attributes.insert(
                            "parent_span_id".to_string(),
                            hex::encode(&span.parent_span_id),
                        );
                    }
                    if let Some(scope) = &ss.scope {
                        attributes.insert("scope".to_string(), scope.name.clone());
                    }

                    spans_by_node
                        .entry(node_name.clone())
                        .or_default()
                        .push(SpanRecord {
                            name: span.name.clone(),
                            start,
                            end,
                            attributes,
                        });
                }
            }
        }
    }

    if skipped > 0 {
        tracing::debug!(skipped, "ignored spans without duration");
    }
    spans_by_node
}

/// Pack spans sorted by start time into lanes of non-overlapping spans. Each span goes to the
/// first lane that is free at its start.
fn assign_lanes(spans: Vec<SpanRecord>) -> Vec<Vec<SpanRecord>> {
    let mut lanes: Vec<Vec<SpanRecord>> = Vec::new();
    for span in spans {
        let free_lane = lanes
            .iter_mut()
            .find(|lane| lane.last().is_some_and(|last| last.end <= span.start));
        match free_lane {
            Some(lane) => lane.push(span),
            None => lanes.push(vec![span]),
        }
    }
    lanes
}

/// Fill the time between sorted, non-overlapping intervals, and before and after them up to
/// `[start, end]`.
fn tile(intervals: Vec<Interval>, start: TimePoint, end: TimePoint) -> Vec<Interval> {
    let mut tiled = Vec::with_capacity(intervals.len() * 2 + 1);
    let mut cursor = start;
    for interval in intervals {
        if interval.start > cursor {
            tiled.push(Interval::new(cursor, interval.start));
        }
        cursor = cursor.max(interval.end);
        tiled.push(interval);
    }
    if cursor < end {
        tiled.push(Interval::new(cursor, end));
    }
    tiled
}

/// Union of the spans' time ranges, as "busy" states.
fn busy_intervals(spans: &[SpanRecord]) -> Vec<Interval> {
    let mut ranges: Vec<(TimePoint, TimePoint)> =
        spans.iter().map(|span| (span.start, span.end)).collect();
    ranges.sort_unstable();

    let mut merged: Vec<(TimePoint, TimePoint)> = Vec::new();
    for (start, end) in ranges {
        match merged.last_mut() {
            Some(last) if start <= last.1 => last.1 = last.1.max(end),
            _ => merged.push((start, end)),
        }
    }
    merged
        .into_iter()
        .map(|(start, end)| Interval::state(start, end, "busy"))
        .collect()
}

/// Rows built from an OTLP trace export.
pub struct OtlpSource {
    rows: MemorySource,
}

impl OtlpSource {
    pub fn from_requests(name: &str, requests: &[ExportTraceServiceRequest]) -> OtlpSource {
        let t = TaskTimer::new("Extracting spans");

        let mut rows = MemorySource::new(name);
        let mut next_id: RowId = 0;
        let mut new_id = || {
            next_id += 1;
            next_id
        };

        for (node_name, mut spans) in extract_spans(requests) {
            spans.sort_by_key(|span| (span.start, span.end));
            let node_start = spans.iter().map(|span| span.start).min().unwrap_or(0);
            let node_end = spans.iter().map(|span| span.end).max().unwrap_or(0);

            let node_id = new_id();
            rows.add_row(
                RowEntry {
                    id: node_id,
                    parent_id: None,
                    name: node_name.clone(),
                    start: node_start,
                    end: node_end,
                },
                tile(busy_intervals(&spans), node_start, node_end),
            );

            for (lane_index, lane) in assign_lanes(spans).into_iter().enumerate() {
                let intervals = lane
                    .into_iter()
                    .map(|span| {
                        let mut interval = Interval::state(span.start, span.end, &span.name);
                        interval.attributes.extend(span.attributes);
                        interval
                    })
                    .collect();
                rows.add_row(
                    RowEntry {
                        id: new_id(),
                        parent_id: Some(node_id),
                        name: format!("{} lane {}", node_name, lane_index),
                        start: node_start,
                        end: node_end,
                    },
                    tile(intervals, node_start, node_end),
                );
            }
        }

        t.stop();
        tracing::info!(source = name, rows = rows.row_count(), "trace rows extracted");
        OtlpSource { rows }
    }

    pub fn load(path: &Path) -> Result<OtlpSource> {
        let file_bytes = std::fs::read(path)
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?;
        let requests = parse_trace_file(&file_bytes)?;
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(OtlpSource::from_requests(&name, &requests))
    }

    pub fn row_count(&self) -> usize {
        self.rows.row_count()
    }
}

impl DataSource for OtlpSource {
    fn name(&self) -> &str {
        self.rows.name()
    }

    fn bounds(&self) -> (TimePoint, TimePoint) {
        self.rows.bounds()
    }

    fn entries(&self) -> Result<Vec<RowEntry>> {
        self.rows.entries()
    }

    fn intervals(
        &self,
        row: RowId,
        start: TimePoint,
        end: TimePoint,
        resolution: TimePoint,
    ) -> Result<Vec<Interval>> {
        self.rows.intervals(row, start, end, resolution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use opentelemetry_proto::tonic::common::v1::{AnyValue, InstrumentationScope};
    use opentelemetry_proto::tonic::resource::v1::Resource;
    use opentelemetry_proto::tonic::trace::v1::{ResourceSpans, ScopeSpans, Span};

    fn string_attribute(key: &str, value: Value) -> KeyValue {
        KeyValue {
            key: key.to_string(),
            value: Some(AnyValue { value: Some(value) }),
        }
    }

    fn span(name: &str, span_id: Vec<u8>, start_ns: u64, end_ns: u64) -> Span {
        Span {
            name: name.to_string(),
            span_id,
            start_time_unix_nano: start_ns,
            end_time_unix_nano: end_ns,
            attributes: vec![string_attribute("height", Value::IntValue(7))],
            ..Default::default()
        }
    }

    fn request(node: &str, spans: Vec<Span>) -> ExportTraceServiceRequest {
        ExportTraceServiceRequest {
            resource_spans: vec![ResourceSpans {
                resource: Some(Resource {
                    attributes: vec![string_attribute(
                        "service.name",
                        Value::StringValue(node.to_string()),
                    )],
                    ..Default::default()
                }),
                scope_spans: vec![ScopeSpans {
                    scope: Some(InstrumentationScope {
                        name: "test".to_string(),
                        ..Default::default()
                    }),
                    spans,
                    ..Default::default()
                }],
                ..Default::default()
            }],
        }
    }

    fn span_record(name: &str, start: TimePoint, end: TimePoint) -> SpanRecord {
        SpanRecord {
            name: name.to_string(),
            start,
            end,
            attributes: Attributes::new(),
        }
    }

    #[test]
    fn lanes_do_not_overlap() {
        let spans = vec![
            span_record("a", 0, 10),
            span_record("b", 5, 15),
            span_record("c", 10, 20),
        ];
        let lanes = assign_lanes(spans);
        let names: Vec<Vec<&str>> = lanes
            .iter()
            .map(|lane| lane.iter().map(|span| span.name.as_str()).collect())
            .collect();
        assert_eq!(names, vec![vec!["a", "c"], vec!["b"]]);
    }

    #[test]
    fn tile_fills_holes() {
        let tiled = tile(vec![Interval::state(10, 20, "x")], 0, 30);
        let ranges: Vec<_> = tiled.iter().map(|i| (i.start, i.end)).collect();
        assert_eq!(ranges, vec![(0, 10), (10, 20), (20, 30)]);
        assert_eq!(tiled[0].style, None);
    }

    #[test]
    fn busy_merges_overlaps() {
        let spans = vec![
            span_record("a", 0, 10),
            span_record("b", 5, 15),
            span_record("c", 20, 30),
        ];
        let ranges: Vec<_> = busy_intervals(&spans).iter().map(|i| (i.start, i.end)).collect();
        assert_eq!(ranges, vec![(0, 15), (20, 30)]);
    }

    #[test]
    fn parses_plain_and_gzipped_files() {
        use std::io::Write;

        let requests = vec![request(
            "node0",
            vec![
                span("apply_chunk", vec![1, 2], 1_000, 2_000),
                span("produce_block", vec![3, 4], 1_500, 3_000),
                span("instant", vec![5, 6], 2_000, 2_000),
            ],
        )];
        let json = serde_json::to_string(&requests).unwrap();
        let plain = parse_trace_file(json.as_bytes()).unwrap();
        assert_eq!(plain.len(), 1);

        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(json.as_bytes()).unwrap();
        let gzipped = encoder.finish().unwrap();
        let decoded = parse_trace_file(&gzipped).unwrap();
        assert_eq!(decoded, plain);

        let source = OtlpSource::from_requests("test", &decoded);
        // node row + two lanes
        assert_eq!(source.row_count(), 3);
        assert_eq!(source.bounds(), (1_000, 3_000));

        let entries = source.entries().unwrap();
        assert_eq!(entries[0].name, "node0");
        assert_eq!(entries[1].parent_id, Some(entries[0].id));

        let lane = source.intervals(entries[1].id, 1_000, 3_000, 1).unwrap();
        assert_eq!(lane[0].style.as_deref(), Some("apply_chunk"));
        assert_eq!(lane[0].attributes.get("height").map(String::as_str), Some("7"));
        assert_eq!(lane[0].attributes.get("span_id").map(String::as_str), Some("0102"));
        assert_eq!(lane.last().map(|i| i.end), Some(3_000));
    }
}
