//! Drawing Items
//! Editable shapes: base points -> handles -> outlines, with a two-phase handle drag
//!
//! An item keeps its semantic anchors ("base points") in a local frame around `origin`. The
//! handles a user drags are derived from the base points; edits to handles are folded back into
//! base points by the per-variant rules in [`node`] and [`edge`]. Outlines are derived last and
//! only when the owning scene flushes, so a burst of drag updates costs one recomputation.

use std::fmt;

use egui::{Pos2, Rect, Vec2};

use crate::config::EngineConfig;
use crate::fsm::{StateId, TransKey};
use crate::geometry::{self, CubicSegment, Shape};

pub mod edge;
pub mod node;

#[cfg(test)]
mod tests;

pub use edge::{EdgeItem, EditMode};
pub use node::NodeItem;

/// Arena index of an item inside its scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemId(pub u32);

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Item({})", self.0)
    }
}

/// The model element an item stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ElementRef {
    State(StateId),
    Transition(TransKey),
}

/// How much derived state is stale. Ordered so that `max` merges requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Dirty {
    #[default]
    Clean,
    /// Outlines must be rebuilt from unchanged base points
    Paths,
    /// Endpoints must be re-synced and re-anchored before the outlines are rebuilt
    Full,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InitialArrow {
    pub from: Pos2,
    pub to: Pos2,
    pub head: [Pos2; 3],
}

/// Renderable geometry in scene coordinates.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ItemPaths {
    #[default]
    Empty,
    Node {
        outline: Shape,
        decorations: Vec<Shape>,
        initial: Option<InitialArrow>,
    },
    Edge {
        segments: Vec<CubicSegment>,
        head: [Pos2; 3],
        label: Pos2,
    },
}

impl ItemPaths {
    pub fn bounding_rect(&self) -> Rect {
        match self {
            ItemPaths::Empty => Rect::NOTHING,
            ItemPaths::Node {
                outline, initial, ..
            } => {
                let mut rect = outline.bounding_rect();
                if let Some(arrow) = initial {
                    rect.extend_with(arrow.from);
                }
                rect
            }
            ItemPaths::Edge {
                segments, label, ..
            } => {
                let mut rect = Rect::NOTHING;
                for seg in segments {
                    for p in seg {
                        rect.extend_with(*p);
                    }
                }
                rect.extend_with(*label);
                rect
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ItemKind {
    Node(NodeItem),
    Edge(EdgeItem),
}

#[derive(Debug, Clone)]
struct DragState {
    handle: usize,
    origin: Pos2,
    base: Vec<Pos2>,
}

/// One node or edge of a diagram.
#[derive(Debug, Clone)]
pub struct Item {
    origin: Pos2,
    base: Vec<Pos2>,
    ctrls: Vec<Pos2>,
    kind: ItemKind,
    selected: bool,
    highlighted: bool,
    drag: Option<DragState>,
    dirty: Dirty,
    paths: ItemPaths,
}

impl Item {
    fn with_kind(kind: ItemKind, origin: Pos2, base: Vec<Pos2>) -> Self {
        let mut item = Self {
            origin,
            base,
            ctrls: Vec::new(),
            kind,
            selected: false,
            highlighted: false,
            drag: None,
            dirty: Dirty::Full,
            paths: ItemPaths::Empty,
        };
        item.refresh_ctrls();
        item
    }

    pub fn node(node: NodeItem, origin: Pos2, base: Vec<Pos2>, config: &EngineConfig) -> Self {
        let base = node::sanitize(base, config.default_radius(), config.min_node_radius);
        Self::with_kind(ItemKind::Node(node), origin, base)
    }

    /// `base` must already be a valid edge list; see [`edge::sanitize`].
    pub fn edge(edge: EdgeItem, origin: Pos2, base: Vec<Pos2>) -> Self {
        debug_assert!(edge::is_valid_len(base.len()));
        Self::with_kind(ItemKind::Edge(edge), origin, base)
    }

    pub fn origin(&self) -> Pos2 {
        self.origin
    }

    pub fn base(&self) -> &[Pos2] {
        &self.base
    }

    /// Handles in the local frame.
    pub fn handles(&self) -> &[Pos2] {
        &self.ctrls
    }

    pub fn handle_scene(&self, index: usize) -> Option<Pos2> {
        self.ctrls.get(index).map(|p| *p + self.origin.to_vec2())
    }

    pub fn kind(&self) -> &ItemKind {
        &self.kind
    }

    pub fn as_node(&self) -> Option<&NodeItem> {
        match &self.kind {
            ItemKind::Node(n) => Some(n),
            ItemKind::Edge(_) => None,
        }
    }

    pub fn as_edge(&self) -> Option<&EdgeItem> {
        match &self.kind {
            ItemKind::Edge(e) => Some(e),
            ItemKind::Node(_) => None,
        }
    }

    pub fn element(&self) -> ElementRef {
        match &self.kind {
            ItemKind::Node(n) => ElementRef::State(n.state),
            ItemKind::Edge(e) => ElementRef::Transition(e.key),
        }
    }

    pub fn is_selected(&self) -> bool {
        self.selected
    }

    pub fn is_highlighted(&self) -> bool {
        self.highlighted
    }

    pub fn set_highlighted(&mut self, on: bool) {
        self.highlighted = on;
    }

    pub fn paths(&self) -> &ItemPaths {
        &self.paths
    }

    pub fn dirty(&self) -> Dirty {
        self.dirty
    }

    pub fn is_editing(&self) -> bool {
        self.drag.is_some()
    }

    pub fn drag_handle(&self) -> Option<usize> {
        self.drag.as_ref().map(|d| d.handle)
    }

    pub(crate) fn set_selected(&mut self, on: bool) {
        self.selected = on;
    }

    pub(crate) fn mark(&mut self, level: Dirty) {
        self.dirty = self.dirty.max(level);
    }

    pub(crate) fn take_dirty(&mut self) -> Dirty {
        std::mem::take(&mut self.dirty)
    }

    pub(crate) fn set_paths(&mut self, paths: ItemPaths) {
        self.paths = paths;
    }

    pub(crate) fn set_origin(&mut self, origin: Pos2) {
        self.origin = origin;
    }

    pub(crate) fn base_mut(&mut self) -> &mut Vec<Pos2> {
        &mut self.base
    }

    pub(crate) fn node_mut(&mut self) -> Option<&mut NodeItem> {
        match &mut self.kind {
            ItemKind::Node(n) => Some(n),
            ItemKind::Edge(_) => None,
        }
    }

    pub(crate) fn edge_mut(&mut self) -> Option<&mut EdgeItem> {
        match &mut self.kind {
            ItemKind::Edge(e) => Some(e),
            ItemKind::Node(_) => None,
        }
    }

    pub(crate) fn refresh_ctrls(&mut self) {
        self.ctrls = match &self.kind {
            ItemKind::Node(_) => node::ctrls_from_base(&self.base),
            ItemKind::Edge(_) => edge::ctrls_from_base(&self.base),
        };
    }

    pub fn is_fixed(&self, index: usize) -> bool {
        match &self.kind {
            ItemKind::Node(n) => index >= self.ctrls.len() || node::is_fixed(n.flags, index),
            ItemKind::Edge(e) => edge::is_fixed(e.mode, self.base.len(), index),
        }
    }

    fn to_local(&self, p: Pos2) -> Pos2 {
        p - self.origin.to_vec2()
    }

    // ========================================================================
    // HIT TESTING
    // ========================================================================

    /// Nearest handle within `tolerance` of the scene point `p`, among indices `lo..=hi`.
    /// Unselected items never report handle hits.
    ///
    /// When the winner is fixed, a movable neighbor (successor first) that is nearly as close
    /// wins instead, so coincident fixed/movable handles pick the movable one.
    pub fn hit_handle(&self, p: Pos2, lo: usize, hi: usize, tolerance: f32) -> Option<usize> {
        if !self.selected || self.ctrls.is_empty() {
            return None;
        }
        let hi = hi.min(self.ctrls.len() - 1);
        if lo > hi {
            return None;
        }
        let local = self.to_local(p);
        let dist = |i: usize| self.ctrls[i].distance(local);
        let (best, best_dist) = (lo..=hi)
            .map(|i| (i, dist(i)))
            .filter(|(_, d)| *d <= tolerance)
            .min_by(|a, b| a.1.total_cmp(&b.1))?;

        if self.is_fixed(best) {
            let slack = best_dist + tolerance * 0.25;
            for j in [best + 1, best.wrapping_sub(1)] {
                if j >= lo && j <= hi && !self.is_fixed(j) && dist(j) <= slack {
                    return Some(j);
                }
            }
        }
        Some(best)
    }

    /// Nearest curve segment within `tolerance`, among segment indices `lo..=hi`.
    pub fn hit_segment(&self, p: Pos2, lo: usize, hi: usize, tolerance: f32) -> Option<usize> {
        match &self.kind {
            ItemKind::Edge(_) => edge::hit_segment(&self.base, self.to_local(p), lo, hi, tolerance),
            ItemKind::Node(_) => None,
        }
    }

    /// Does the scene point `p` touch the item body?
    pub fn contains(&self, p: Pos2, tolerance: f32) -> bool {
        match &self.paths {
            ItemPaths::Node { outline, .. } => {
                outline.contains(p) || outline.distance_to_boundary(p) <= tolerance
            }
            ItemPaths::Edge {
                segments, label, ..
            } => {
                segments
                    .iter()
                    .any(|seg| geometry::distance_to_cubic(p, seg) <= tolerance)
                    || label.distance(p) <= tolerance * 2.0
            }
            ItemPaths::Empty => match &self.kind {
                ItemKind::Node(_) => {
                    let r = node::radius(&self.base);
                    Rect::from_center_size(self.origin, r * 2.0).contains(p)
                }
                ItemKind::Edge(_) => self.hit_segment(p, 0, usize::MAX, tolerance).is_some(),
            },
        }
    }

    pub fn bounding_rect(&self) -> Rect {
        self.paths.bounding_rect()
    }

    // ========================================================================
    // HANDLE DRAG PROTOCOL
    // ========================================================================

    /// Start dragging handle `index`. Refused for fixed handles, out-of-range indices and
    /// while another drag is running.
    pub fn begin_handle_edit(&mut self, index: usize) -> bool {
        if self.drag.is_some() || index >= self.ctrls.len() || self.is_fixed(index) {
            log::debug!("refusing handle edit {} on {:?}", index, self.element());
            return false;
        }
        self.drag = Some(DragState {
            handle: index,
            origin: self.origin,
            base: self.base.clone(),
        });
        true
    }

    /// Move the dragged handle towards the scene point `p` (snapped to the grid pitch).
    /// Only base points and handles change; outlines wait for the next flush.
    pub fn update_handle_edit(&mut self, p: Pos2, config: &EngineConfig) -> bool {
        let Some(handle) = self.drag.as_ref().map(|d| d.handle) else {
            return false;
        };
        let local = self.to_local(geometry::snap(p, config.grid_pitch));
        let changed = match &self.kind {
            ItemKind::Node(_) => {
                if node::is_corner(handle) {
                    let shift =
                        node::move_corner(&mut self.base, handle, local, config.min_node_radius);
                    self.origin += shift;
                    true
                } else if handle == node::HANDLE_INIT_SOURCE {
                    self.base[node::INIT_SOURCE] = local;
                    true
                } else {
                    false
                }
            }
            ItemKind::Edge(e) => {
                edge::move_handle(&mut self.base, e.mode, handle, local, config.spline_threshold)
            }
        };
        if changed {
            self.refresh_ctrls();
            self.mark(Dirty::Full);
        }
        changed
    }

    /// Finish the drag. Returns whether the geometry differs from the pre-drag snapshot.
    pub fn end_handle_edit(&mut self) -> bool {
        match self.drag.take() {
            Some(before) => before.origin != self.origin || before.base != self.base,
            None => false,
        }
    }

    /// Abort the drag and restore the pre-drag geometry.
    pub fn cancel_handle_edit(&mut self) {
        if let Some(before) = self.drag.take() {
            self.origin = before.origin;
            self.base = before.base;
            self.refresh_ctrls();
            self.mark(Dirty::Full);
        }
    }

    // ========================================================================
    // STRUCTURAL EDITS
    // ========================================================================

    /// Split edge segment `segment` at the scene point `p`.
    pub fn insert_handle(&mut self, segment: usize, p: Pos2) -> bool {
        let local = self.to_local(p);
        let done = match &self.kind {
            ItemKind::Edge(e) => edge::split_segment(&mut self.base, e.mode, segment, local),
            ItemKind::Node(_) => false,
        };
        if done {
            self.refresh_ctrls();
            self.mark(Dirty::Full);
        } else {
            log::debug!("ignored insert at segment {} on {:?}", segment, self.element());
        }
        done
    }

    /// Merge the edge segments around interior knot `index`.
    pub fn delete_handle(&mut self, index: usize) -> bool {
        let done = match &self.kind {
            ItemKind::Edge(e) => edge::merge_at_knot(&mut self.base, e.mode, index),
            ItemKind::Node(_) => false,
        };
        if done {
            self.refresh_ctrls();
            self.mark(Dirty::Full);
        } else {
            log::debug!("ignored delete of handle {} on {:?}", index, self.element());
        }
        done
    }

    pub fn translate(&mut self, delta: Vec2) {
        self.origin += delta;
        self.mark(Dirty::Full);
    }

    /// Switch an edge into `mode` and re-derive its controls.
    pub fn set_mode(&mut self, mode: EditMode) -> bool {
        let ItemKind::Edge(e) = &mut self.kind else {
            return false;
        };
        e.mode = mode;
        edge::enter_mode(&mut self.base, mode);
        self.refresh_ctrls();
        self.mark(Dirty::Full);
        true
    }
}
