use std::collections::{HashMap, HashSet};

use crate::source::RowEntry;
use crate::types::{Event, RowId, Sampling, TimePoint};

/// One entry of the time graph, e.g. a process or a thread.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub id: RowId,
    pub parent_id: Option<RowId>,
    pub name: String,
    pub time_start: TimePoint,
    pub time_end: TimePoint,
    pub children: Vec<Row>,
    /// Coarse events over the whole row, computed once by the build.
    pub full_events: Vec<Event>,
    /// Events of the current viewport.
    pub zoomed_events: Vec<Event>,
    /// Viewport `zoomed_events` was computed for, `None` until the first zoom commits.
    pub current_sampling: Option<Sampling>,
}

impl Row {
    pub fn new(entry: &RowEntry) -> Row {
        Row {
            id: entry.id,
            parent_id: entry.parent_id,
            name: entry.name.clone(),
            time_start: entry.start,
            time_end: entry.end,
            children: Vec::new(),
            full_events: Vec::new(),
            zoomed_events: Vec::new(),
            current_sampling: None,
        }
    }

    pub fn is_stale(&self, sampling: &Sampling) -> bool {
        self.current_sampling.as_ref() != Some(sampling)
    }

    pub fn find(&self, id: RowId) -> Option<&Row> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(id))
    }

    pub fn find_mut(&mut self, id: RowId) -> Option<&mut Row> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter_mut().find_map(|child| child.find_mut(id))
    }

    /// Depth-first, parents before children.
    pub fn visit<'a>(&'a self, f: &mut impl FnMut(&'a Row)) {
        f(self);
        for child in &self.children {
            child.visit(f);
        }
    }

    pub fn visit_mut(&mut self, f: &mut impl FnMut(&mut Row)) {
        f(self);
        for child in &mut self.children {
            child.visit_mut(f);
        }
    }
}

/// The part of a row a zoom task needs, copied so the task doesn't touch the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowSnapshot {
    pub id: RowId,
    pub time_start: TimePoint,
    pub time_end: TimePoint,
    pub current_sampling: Option<Sampling>,
}

impl From<&Row> for RowSnapshot {
    fn from(row: &Row) -> Self {
        RowSnapshot {
            id: row.id,
            time_start: row.time_start,
            time_end: row.time_end,
            current_sampling: row.current_sampling,
        }
    }
}

/// All rows of one data source, top-level rows in the order the build committed them.
#[derive(Debug, Clone, Default)]
pub struct RowModel {
    roots: Vec<Row>,
}

impl RowModel {
    pub fn new() -> RowModel {
        RowModel::default()
    }

    pub fn roots(&self) -> &[Row] {
        &self.roots
    }

    pub fn push_root(&mut self, row: Row) {
        self.roots.push(row);
    }

    pub fn clear(&mut self) {
        self.roots.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    pub fn find(&self, id: RowId) -> Option<&Row> {
        self.roots.iter().find_map(|row| row.find(id))
    }

    pub fn find_mut(&mut self, id: RowId) -> Option<&mut Row> {
        self.roots.iter_mut().find_map(|row| row.find_mut(id))
    }

    /// Every row, depth-first.
    pub fn rows(&self) -> Vec<&Row> {
        let mut rows = Vec::new();
        for root in &self.roots {
            root.visit(&mut |row| rows.push(row));
        }
        rows
    }

    pub fn len(&self) -> usize {
        self.rows().len()
    }

    /// Snapshots of the rows to zoom, depth-first. `visible` restricts the result to those ids.
    pub fn snapshots(&self, visible: Option<&[RowId]>) -> Vec<RowSnapshot> {
        let visible: Option<HashSet<RowId>> = visible.map(|ids| ids.iter().copied().collect());
        self.rows()
            .into_iter()
            .filter(|row| visible.as_ref().map_or(true, |ids| ids.contains(&row.id)))
            .map(RowSnapshot::from)
            .collect()
    }

    pub fn reset_zoom(&mut self) {
        for root in &mut self.roots {
            root.visit_mut(&mut |row| {
                row.zoomed_events.clear();
                row.current_sampling = None;
            });
        }
    }
}

/// Assemble the row hierarchy from a flat entry list, keeping the entry order among siblings.
/// Entries whose parent is unknown become top-level rows. Duplicate ids and entries that are
/// only reachable through a parent cycle are dropped.
pub fn build_row_tree(entries: &[RowEntry]) -> Vec<Row> {
    let mut rows: HashMap<RowId, Row> = HashMap::with_capacity(entries.len());
    let mut order = Vec::with_capacity(entries.len());
    for entry in entries {
        if rows.contains_key(&entry.id) {
            tracing::warn!(row = entry.id, name = %entry.name, "duplicate row id, ignoring entry");
            continue;
        }
        rows.insert(entry.id, Row::new(entry));
        order.push(entry.id);
    }

    let mut children: HashMap<RowId, Vec<RowId>> = HashMap::new();
    let mut root_ids = Vec::new();
    for id in &order {
        match rows[id].parent_id {
            Some(parent) if parent != *id && rows.contains_key(&parent) => {
                children.entry(parent).or_default().push(*id)
            }
            _ => root_ids.push(*id),
        }
    }

    let roots: Vec<Row> = root_ids
        .into_iter()
        .filter_map(|id| assemble_row(id, &mut rows, &children))
        .collect();

    if !rows.is_empty() {
        tracing::warn!(
            dropped = rows.len(),
            "rows unreachable from any top-level row (parent cycle)"
        );
    }

    roots
}

fn assemble_row(
    id: RowId,
    rows: &mut HashMap<RowId, Row>,
    children: &HashMap<RowId, Vec<RowId>>,
) -> Option<Row> {
    let mut row = rows.remove(&id)?;
    if let Some(child_ids) = children.get(&id) {
        for child_id in child_ids {
            if let Some(child) = assemble_row(*child_id, rows, children) {
                row.children.push(child);
            }
        }
    }
    Some(row)
}
