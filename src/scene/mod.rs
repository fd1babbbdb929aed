//! Scene Graph
//! Owns every drawing item of one diagram and keeps it in step with the automaton
//!
//! Items live in an arena keyed by [`ItemId`]; nodes are found by state id and edges by
//! transition key. Edges never hold references to their endpoint nodes, they resolve them
//! through the maps whenever geometry is recomputed.
//!
//! Edits only touch base points and mark the item dirty. [`Scene::flush_pending_update`]
//! recomputes everything that went stale, nodes before edges, so that edge anchoring always
//! sees final node outlines.

use std::collections::{BTreeMap, BTreeSet};

use egui::{Pos2, Rect, Vec2};

use crate::config::EngineConfig;
use crate::fsm::{AutomatonModel, StateId, TransKey};
use crate::geometry::{arrow_head, first_direction, pull_out, Shape};
use crate::item::edge::{self, EdgeItem, EditMode};
use crate::item::node::{self, NodeItem};
use crate::item::{Dirty, ElementRef, InitialArrow, Item, ItemId, ItemPaths};
use crate::style::{DefaultStyle, NodeFlags, StyleProvider};


pub const ARROW_LENGTH: f32 = 10.0;
pub const ARROW_HALF_WIDTH: f32 = 4.0;

/// Notification from the automaton owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementDelta {
    StateInserted(StateId),
    StateRemoved(StateId),
    StateEdited { old: StateId, new: StateId },
    TransitionInserted(TransKey),
    TransitionRemoved(TransKey),
    TransitionEdited { old: TransKey, new: TransKey },
    /// Flags or names changed; geometry is kept
    PropertyChanged(ElementRef),
    /// Drop items whose elements are gone
    Trim,
    /// Full diff against the automaton
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reconciled {
    /// Missing plus extra items after the call
    pub missing: usize,
    pub consistent: bool,
}

/// Outgoing notifications, drained with [`Scene::take_events`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SceneEvent {
    SelectionChanged,
    ItemModified(ElementRef),
}

/// Result of [`Scene::hit_test`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hit {
    Handle { item: ItemId, index: usize },
    Node(ItemId),
    Edge { item: ItemId, segment: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeRecord {
    pub state: StateId,
    pub origin: Pos2,
    pub base: Vec<Pos2>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EdgeRecord {
    pub key: TransKey,
    pub mode: EditMode,
    pub origin: Pos2,
    pub base: Vec<Pos2>,
}

/// Deep copy of the representation: every item's origin, base points and mode.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Snapshot {
    pub nodes: Vec<NodeRecord>,
    pub edges: Vec<EdgeRecord>,
}

impl Snapshot {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }
}

fn flags_of(model: &dyn AutomatonModel, state: StateId) -> NodeFlags {
    NodeFlags {
        initial: model.is_initial(state),
        marked: model.is_marked(state),
    }
}

/// Tile positions for `count` items, `columns` per row, starting at `start`.
pub fn grid_positions(count: usize, columns: usize, start: Pos2, spacing: f32) -> Vec<Pos2> {
    let columns = columns.max(1);
    (0..count)
        .map(|i| {
            let col = (i % columns) as f32;
            let row = (i / columns) as f32;
            start + Vec2::new(col * spacing, row * spacing)
        })
        .collect()
}

/// Row width used by grid placement of `state_count` states.
pub fn grid_columns(state_count: usize) -> usize {
    ((1.3 * (state_count as f32).sqrt()).round() as usize).max(1)
}

pub struct Scene {
    config: EngineConfig,
    style: Box<dyn StyleProvider>,
    items: BTreeMap<ItemId, Item>,
    nodes: BTreeMap<StateId, ItemId>,
    edges: BTreeMap<TransKey, ItemId>,
    next_id: u32,
    dirty: BTreeSet<ItemId>,
    consistent: bool,
    modified: bool,
    viewport: Rect,
    dragging: Option<ItemId>,
    /// Other selected nodes receiving a corner drag's radius, with their pre-drag base points
    broadcast: Vec<(ItemId, Vec<Pos2>)>,
    /// Edge being drawn by the user; not registered under any key
    creating: Option<ItemId>,
    events: Vec<SceneEvent>,
}

impl Scene {
    pub fn new(config: EngineConfig) -> Self {
        let style = Box::new(DefaultStyle::new(config.node_shape));
        Self::with_style(config, style)
    }

    pub fn with_style(config: EngineConfig, style: Box<dyn StyleProvider>) -> Self {
        Self {
            config,
            style,
            items: BTreeMap::new(),
            nodes: BTreeMap::new(),
            edges: BTreeMap::new(),
            next_id: 1,
            dirty: BTreeSet::new(),
            consistent: true,
            modified: false,
            viewport: Rect::EVERYTHING,
            dragging: None,
            broadcast: Vec::new(),
            creating: None,
            events: Vec::new(),
        }
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn item(&self, id: ItemId) -> Option<&Item> {
        self.items.get(&id)
    }

    pub fn items(&self) -> impl Iterator<Item = (ItemId, &Item)> {
        self.items.iter().map(|(id, item)| (*id, item))
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn node_id(&self, state: StateId) -> Option<ItemId> {
        self.nodes.get(&state).copied()
    }

    pub fn edge_id(&self, key: &TransKey) -> Option<ItemId> {
        self.edges.get(key).copied()
    }

    pub fn node(&self, state: StateId) -> Option<&Item> {
        self.node_id(state).and_then(|id| self.items.get(&id))
    }

    pub fn edge(&self, key: &TransKey) -> Option<&Item> {
        self.edge_id(key).and_then(|id| self.items.get(&id))
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn is_consistent(&self) -> bool {
        self.consistent
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn set_modified(&mut self, modified: bool) {
        self.modified = modified;
    }

    pub fn viewport(&self) -> Rect {
        self.viewport
    }

    pub fn set_viewport(&mut self, viewport: Rect) {
        self.viewport = viewport;
    }

    pub fn has_pending_update(&self) -> bool {
        !self.dirty.is_empty()
    }

    pub fn take_events(&mut self) -> Vec<SceneEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn pending_edge_id(&self) -> Option<ItemId> {
        self.creating
    }

    pub fn pending_edge(&self) -> Option<&Item> {
        self.creating.and_then(|id| self.items.get(&id))
    }

    /// Union of every item's derived outline.
    pub fn bounding_rect(&self) -> Rect {
        let mut rect = Rect::NOTHING;
        for item in self.items.values() {
            let r = item.bounding_rect();
            if r.width() >= 0.0 && r.height() >= 0.0 {
                rect = rect.union(r);
            } else {
                rect.extend_with(item.origin());
            }
        }
        rect
    }

    // ========================================================================
    // ARENA
    // ========================================================================

    fn adopt(&mut self, mut item: Item, level: Dirty) -> ItemId {
        let id = ItemId(self.next_id);
        self.next_id += 1;
        item.take_dirty();
        item.mark(level);
        self.items.insert(id, item);
        self.dirty.insert(id);
        id
    }

    fn insert_node(
        &mut self,
        state: StateId,
        flags: NodeFlags,
        origin: Pos2,
        base: Vec<Pos2>,
        level: Dirty,
    ) -> ItemId {
        let item = Item::node(NodeItem::new(state, flags), origin, base, &self.config);
        let id = self.adopt(item, level);
        self.nodes.insert(state, id);
        id
    }

    fn insert_edge(
        &mut self,
        key: TransKey,
        mode: EditMode,
        base: Vec<Pos2>,
        level: Dirty,
    ) -> ItemId {
        let origin = self.node(key.source).map_or(Pos2::ZERO, |n| n.origin());
        let id = self.adopt(Item::edge(EdgeItem::new(key, mode), origin, base), level);
        self.edges.insert(key, id);
        id
    }

    fn node_radius(&self, state: StateId) -> Vec2 {
        self.node(state)
            .map_or(self.config.default_radius(), |n| node::radius(n.base()))
    }

    /// Default geometry of a new edge: a loop above the node or a straight line between the
    /// two node centers.
    fn default_edge_base(&self, key: &TransKey) -> Vec<Pos2> {
        let offset = self.config.label_offset;
        if key.is_self_loop() {
            return edge::default_self_loop(self.node_radius(key.source), offset);
        }
        let target = match (self.node(key.source), self.node(key.target)) {
            (Some(s), Some(t)) => (t.origin() - s.origin()).to_pos2(),
            _ => Pos2::new(self.config.grid_spacing, 0.0),
        };
        edge::default_straight(target, offset)
    }

    pub(crate) fn default_mode(&self, key: &TransKey) -> EditMode {
        if key.is_self_loop() {
            EditMode::Spline
        } else {
            self.config.default_edge_mode
        }
    }

    /// Add an edge with default geometry. Both endpoint nodes must exist.
    fn place_edge(&mut self, key: TransKey) -> Option<ItemId> {
        if self.edges.contains_key(&key) {
            return self.edge_id(&key);
        }
        if self.node_id(key.source).is_none() || self.node_id(key.target).is_none() {
            log::debug!("cannot place edge {:?}: endpoint node missing", key);
            return None;
        }
        let base = self.default_edge_base(&key);
        let mode = self.default_mode(&key);
        Some(self.insert_edge(key, mode, base, Dirty::Full))
    }

    fn remove_item(&mut self, id: ItemId) -> Option<Item> {
        let item = self.items.remove(&id)?;
        match item.element() {
            ElementRef::State(s) => {
                if self.nodes.get(&s) == Some(&id) {
                    self.nodes.remove(&s);
                }
            }
            ElementRef::Transition(k) => {
                if self.edges.get(&k) == Some(&id) {
                    self.edges.remove(&k);
                }
            }
        }
        self.dirty.remove(&id);
        self.broadcast.retain(|(other, _)| *other != id);
        if self.dragging == Some(id) {
            self.dragging = None;
            self.broadcast.clear();
        }
        if self.creating == Some(id) {
            self.creating = None;
        }
        if item.is_selected() {
            self.events.push(SceneEvent::SelectionChanged);
        }
        Some(item)
    }

    /// Remove a node and every edge (including a pending one) that touches it.
    fn remove_state(&mut self, state: StateId) -> bool {
        let touching: Vec<ItemId> = self
            .edges
            .iter()
            .filter(|(k, _)| k.touches(state))
            .map(|(_, id)| *id)
            .chain(
                self.creating
                    .filter(|id| {
                        self.items
                            .get(id)
                            .and_then(Item::as_edge)
                            .is_some_and(|e| e.key.touches(state))
                    }),
            )
            .collect();
        for id in touching {
            self.remove_item(id);
        }
        match self.nodes.get(&state).copied() {
            Some(id) => self.remove_item(id).is_some(),
            None => false,
        }
    }

    fn edges_touching(&self, state: StateId) -> Vec<ItemId> {
        let mut ids: Vec<ItemId> = self
            .edges
            .iter()
            .filter(|(k, _)| k.touches(state))
            .map(|(_, id)| *id)
            .collect();
        if let Some(id) = self.creating {
            if self
                .items
                .get(&id)
                .and_then(Item::as_edge)
                .is_some_and(|e| e.key.source == state)
            {
                ids.push(id);
            }
        }
        ids
    }

    fn mark(&mut self, id: ItemId, level: Dirty) {
        if let Some(item) = self.items.get_mut(&id) {
            item.mark(level);
            self.dirty.insert(id);
        }
    }

    fn note_modified(&mut self, id: ItemId) {
        if let Some(item) = self.items.get(&id) {
            self.modified = true;
            self.events.push(SceneEvent::ItemModified(item.element()));
        }
    }

    /// Drop every item.
    pub fn clear(&mut self) {
        let had_selection = self.items.values().any(Item::is_selected);
        self.items.clear();
        self.nodes.clear();
        self.edges.clear();
        self.dirty.clear();
        self.dragging = None;
        self.broadcast.clear();
        self.creating = None;
        if had_selection {
            self.events.push(SceneEvent::SelectionChanged);
        }
    }

    // ========================================================================
    // MODEL SYNCHRONIZATION
    // ========================================================================

    /// Count of missing plus extra items; zero means the scene matches the automaton.
    pub fn test_consistent(&self, model: &dyn AutomatonModel) -> usize {
        let states = model.states();
        let transitions = model.transitions();
        let missing_nodes = states.iter().filter(|s| !self.nodes.contains_key(s)).count();
        let missing_edges = transitions
            .iter()
            .filter(|k| !self.edges.contains_key(k))
            .count();
        let extra_nodes = self
            .nodes
            .keys()
            .filter(|s| !model.exists_state(**s))
            .count();
        let extra_edges = self
            .edges
            .keys()
            .filter(|k| !model.exists_transition(k))
            .count();
        missing_nodes + missing_edges + extra_nodes + extra_edges
    }

    fn finish_reconcile(&mut self, model: &dyn AutomatonModel) -> Reconciled {
        let missing = self.test_consistent(model);
        self.consistent = missing == 0;
        Reconciled {
            missing,
            consistent: self.consistent,
        }
    }

    /// Apply one change notification from the automaton owner.
    pub fn reconcile(&mut self, model: &dyn AutomatonModel, delta: ElementDelta) -> Reconciled {
        log::debug!("reconcile {:?}", delta);
        match delta {
            ElementDelta::StateInserted(state) => {
                if model.exists_state(state) && !self.nodes.contains_key(&state) {
                    self.place_states(model, &[state], false);
                    self.modified = true;
                }
            }
            ElementDelta::StateRemoved(state) => {
                if self.remove_state(state) {
                    self.modified = true;
                }
            }
            ElementDelta::StateEdited { old, new } => self.rekey_state(model, old, new),
            ElementDelta::TransitionInserted(key) => {
                if model.exists_transition(&key) && self.place_edge(key).is_some() {
                    self.modified = true;
                }
            }
            ElementDelta::TransitionRemoved(key) => {
                if let Some(id) = self.edge_id(&key) {
                    self.remove_item(id);
                    self.modified = true;
                }
            }
            ElementDelta::TransitionEdited { old, new } => self.rekey_transition(old, new),
            ElementDelta::PropertyChanged(element) => self.refresh_element(model, element),
            ElementDelta::Trim => self.trim(model),
            ElementDelta::All => return self.reconcile_all(model),
        }
        self.finish_reconcile(model)
    }

    fn rekey_state(&mut self, model: &dyn AutomatonModel, old: StateId, new: StateId) {
        if old == new {
            return;
        }
        let Some(id) = self.nodes.remove(&old) else {
            log::debug!("state {} has no node to re-key", old);
            return;
        };
        if let Some(stale) = self.nodes.get(&new).copied() {
            self.remove_item(stale);
        }
        self.nodes.insert(new, id);
        if let Some(item) = self.items.get_mut(&id) {
            if let Some(n) = item.node_mut() {
                n.state = new;
                n.flags = flags_of(model, new);
            }
            item.mark(Dirty::Paths);
            self.dirty.insert(id);
        }
        let touching: Vec<TransKey> = self.edges.keys().filter(|k| k.touches(old)).copied().collect();
        for key in touching {
            let mut moved = key;
            if moved.source == old {
                moved.source = new;
            }
            if moved.target == old {
                moved.target = new;
            }
            self.rekey_transition(key, moved);
        }
    }

    /// Move an edge to a new key, keeping its item and base points.
    fn rekey_transition(&mut self, old: TransKey, new: TransKey) {
        if old == new {
            return;
        }
        let Some(id) = self.edges.remove(&old) else {
            log::debug!("transition {:?} has no edge to re-key", old);
            return;
        };
        if let Some(stale) = self.edges.get(&new).copied() {
            self.remove_item(stale);
        }
        self.edges.insert(new, id);
        let endpoints_moved = old.source != new.source || old.target != new.target;
        if let Some(item) = self.items.get_mut(&id) {
            if let Some(e) = item.edge_mut() {
                e.key = new;
            }
            item.mark(if endpoints_moved { Dirty::Full } else { Dirty::Paths });
            self.dirty.insert(id);
        }
    }

    fn refresh_element(&mut self, model: &dyn AutomatonModel, element: ElementRef) {
        match element {
            ElementRef::State(state) => {
                let Some(id) = self.node_id(state) else {
                    return;
                };
                if let Some(n) = self.items.get_mut(&id).and_then(Item::node_mut) {
                    n.flags = flags_of(model, state);
                }
                self.mark(id, Dirty::Full);
            }
            ElementRef::Transition(key) => {
                if let Some(id) = self.edge_id(&key) {
                    self.mark(id, Dirty::Paths);
                }
            }
        }
    }

    fn trim(&mut self, model: &dyn AutomatonModel) {
        let dead_states: Vec<StateId> = self
            .nodes
            .keys()
            .filter(|s| !model.exists_state(**s))
            .copied()
            .collect();
        for state in dead_states {
            self.remove_state(state);
            self.modified = true;
        }
        let dead_edges: Vec<ItemId> = self
            .edges
            .iter()
            .filter(|(k, _)| !model.exists_transition(k))
            .map(|(_, id)| *id)
            .collect();
        for id in dead_edges {
            self.remove_item(id);
            self.modified = true;
        }
    }

    fn reconcile_all(&mut self, model: &dyn AutomatonModel) -> Reconciled {
        self.trim(model);
        let mut missing_states: Vec<StateId> = model
            .states()
            .into_iter()
            .filter(|s| !self.nodes.contains_key(s))
            .collect();
        missing_states.sort_unstable();
        let missing_edges: Vec<TransKey> = model
            .transitions()
            .into_iter()
            .filter(|k| !self.edges.contains_key(k))
            .collect();
        let missing = missing_states.len() + missing_edges.len();
        if missing > self.config.max_auto_repair {
            log::warn!(
                "{} items missing, above the auto-repair limit of {}; scene left inconsistent",
                missing,
                self.config.max_auto_repair
            );
            self.consistent = false;
            return Reconciled {
                missing,
                consistent: false,
            };
        }
        if missing > 0 {
            log::info!("auto-repairing {} missing items", missing);
            self.place_states(model, &missing_states, false);
            for key in missing_edges {
                self.place_edge(key);
            }
            self.modified = true;
        }
        self.finish_reconcile(model)
    }

    /// Tile `states` on the grid. Without `clear` the tiles start one pitch below the current
    /// drawing.
    fn place_states(&mut self, model: &dyn AutomatonModel, states: &[StateId], clear: bool) {
        let spacing = self.config.grid_spacing;
        let bbox = self.bounding_rect();
        let start = if clear || !bbox.is_finite() || self.nodes.is_empty() {
            Pos2::new(spacing * 0.5, spacing * 0.5)
        } else {
            Pos2::new(bbox.left() + spacing * 0.5, bbox.bottom() + spacing)
        };
        let columns = grid_columns(model.states().len());
        let radius = self.config.default_radius();
        for (state, origin) in states
            .iter()
            .zip(grid_positions(states.len(), columns, start, spacing))
        {
            self.insert_node(
                *state,
                flags_of(model, *state),
                origin,
                node::default_base(radius),
                Dirty::Full,
            );
        }
    }

    /// Deterministic fallback layout. With `clear` every item is discarded first; otherwise
    /// only elements lacking an item are placed. Returns the number of items created.
    pub fn grid_construct(&mut self, model: &dyn AutomatonModel, clear: bool) -> usize {
        if clear {
            self.clear();
        }
        let mut states = model.states();
        states.sort_unstable();
        states.retain(|s| !self.nodes.contains_key(s));
        self.place_states(model, &states, clear);
        let mut placed = states.len();
        for key in model.transitions() {
            if !self.edges.contains_key(&key) && self.place_edge(key).is_some() {
                placed += 1;
            }
        }
        if placed > 0 || clear {
            self.modified = true;
        }
        log::info!("grid placement created {} items", placed);
        self.finish_reconcile(model);
        placed
    }

    // ========================================================================
    // DERIVED GEOMETRY
    // ========================================================================

    /// Recompute everything marked dirty since the last flush: node outlines first, then the
    /// edges of every node that changed, then all other dirty edges.
    pub fn flush_pending_update(&mut self) {
        if self.dirty.is_empty() {
            return;
        }
        let pending = std::mem::take(&mut self.dirty);
        let mut edges: BTreeSet<ItemId> = BTreeSet::new();
        let mut reshaped: Vec<StateId> = Vec::new();

        for id in pending {
            let Some(item) = self.items.get_mut(&id) else {
                continue;
            };
            match item.as_node().map(|n| n.state) {
                Some(state) => {
                    let level = item.take_dirty();
                    update_node(self.style.as_ref(), item, level);
                    if level == Dirty::Full {
                        reshaped.push(state);
                    }
                }
                None => {
                    edges.insert(id);
                }
            }
        }

        for state in reshaped {
            for id in self.edges_touching(state) {
                if let Some(item) = self.items.get_mut(&id) {
                    item.mark(Dirty::Full);
                }
                edges.insert(id);
            }
        }

        for id in edges {
            self.update_edge(id);
        }
    }

    fn node_outline(&self, state: StateId) -> Option<(Pos2, Shape)> {
        let item = self.node(state)?;
        let outline = match item.paths() {
            ItemPaths::Node { outline, .. } => outline.clone(),
            _ => {
                let flags = item.as_node().map(|n| n.flags).unwrap_or_default();
                self.style
                    .node_shape(flags, item.origin(), node::radius(item.base()))
                    .outline
            }
        };
        Some((item.origin(), outline))
    }

    fn update_edge(&mut self, id: ItemId) {
        let Some(key) = self.items.get(&id).and_then(Item::as_edge).map(|e| e.key) else {
            return;
        };
        let Some((src_origin, src_outline)) = self.node_outline(key.source) else {
            log::debug!("edge {:?} lost its source node", key);
            return;
        };
        let target = if key.target == 0 {
            None
        } else {
            self.node_outline(key.target)
        };
        let margin = self.config.anchor_margin;
        let spline_threshold = self.config.spline_threshold;
        let Some(item) = self.items.get_mut(&id) else {
            return;
        };
        let mode = item.as_edge().map_or(EditMode::Free, |e| e.mode);
        if item.take_dirty() == Dirty::Full {
            item.set_origin(src_origin);
            let offset = -src_origin.to_vec2();
            let base = item.base_mut();
            let len = base.len();
            debug_assert!(edge::is_valid_len(len));
            if !edge::is_valid_len(len) {
                return;
            }
            let before = base.clone();
            let target_local = target.map(|(origin, outline)| {
                base[edge::target(len)] = origin + offset;
                outline.translated(offset)
            });
            edge::fix_root_and_tip(
                base,
                &src_outline.translated(offset),
                target_local.as_ref(),
                margin,
            );
            edge::rederive(base, mode, &before, spline_threshold);
            item.refresh_ctrls();
        }
        let paths = edge_paths(item.origin(), item.base());
        item.set_paths(paths);
    }

    // ========================================================================
    // SELECTION
    // ========================================================================

    pub fn selection(&self) -> Vec<ItemId> {
        self.items
            .iter()
            .filter(|(_, item)| item.is_selected())
            .map(|(id, _)| *id)
            .collect()
    }

    fn set_selection(&mut self, ids: BTreeSet<ItemId>) {
        let mut changed = false;
        for (id, item) in self.items.iter_mut() {
            let on = ids.contains(id);
            if item.is_selected() != on {
                item.set_selected(on);
                changed = true;
            }
        }
        if changed {
            self.events.push(SceneEvent::SelectionChanged);
        }
    }

    /// Select `id`, keeping the current selection when `additive`.
    pub fn select(&mut self, id: ItemId, additive: bool) {
        if !self.items.contains_key(&id) {
            return;
        }
        let mut ids: BTreeSet<ItemId> = if additive {
            self.selection().into_iter().collect()
        } else {
            BTreeSet::new()
        };
        ids.insert(id);
        self.set_selection(ids);
    }

    pub fn toggle_selected(&mut self, id: ItemId) {
        let mut ids: BTreeSet<ItemId> = self.selection().into_iter().collect();
        if !ids.remove(&id) && self.items.contains_key(&id) {
            ids.insert(id);
        }
        self.set_selection(ids);
    }

    pub fn clear_selection(&mut self) {
        self.set_selection(BTreeSet::new());
    }

    pub fn select_all(&mut self) {
        let ids = self.items.keys().copied().collect();
        self.set_selection(ids);
    }

    /// Select every item whose outline lies inside `rect`.
    pub fn select_in_rect(&mut self, rect: Rect, additive: bool) {
        let mut ids: BTreeSet<ItemId> = if additive {
            self.selection().into_iter().collect()
        } else {
            BTreeSet::new()
        };
        ids.extend(
            self.items
                .iter()
                .filter(|(_, item)| rect.contains_rect(item.bounding_rect()))
                .map(|(id, _)| *id),
        );
        self.set_selection(ids);
    }

    // ========================================================================
    // HIT TESTING
    // ========================================================================

    /// What lies under the scene point `p`: handles of selected items first, then nodes, then
    /// edges.
    pub fn hit_test(&self, p: Pos2) -> Option<Hit> {
        let tol = self.config.handle_tolerance;
        for (id, item) in self.items.iter().rev() {
            if let Some(index) = item.hit_handle(p, 0, usize::MAX, tol) {
                return Some(Hit::Handle { item: *id, index });
            }
        }
        if let Some(id) = self.node_at(p) {
            return Some(Hit::Node(id));
        }
        self.edges.values().find_map(|id| {
            let item = self.items.get(id)?;
            if !item.contains(p, tol) {
                return None;
            }
            let segment = item.hit_segment(p, 0, usize::MAX, tol).unwrap_or(0);
            Some(Hit::Edge { item: *id, segment })
        })
    }

    /// Topmost node whose outline contains `p`.
    pub fn node_at(&self, p: Pos2) -> Option<ItemId> {
        let tol = self.config.handle_tolerance;
        self.nodes
            .values()
            .rev()
            .find(|id| self.items.get(id).is_some_and(|n| n.contains(p, tol)))
            .copied()
    }

    // ========================================================================
    // INTERACTIVE EDITS
    // ========================================================================

    /// Start dragging a handle. Corner drags on a node also resize every other selected node.
    pub fn begin_handle_edit(&mut self, id: ItemId, index: usize) -> bool {
        if self.dragging.is_some() {
            return false;
        }
        let Some(item) = self.items.get_mut(&id) else {
            log::debug!("no item {} to drag", id);
            return false;
        };
        if !item.begin_handle_edit(index) {
            return false;
        }
        let is_corner = item.as_node().is_some() && node::is_corner(index);
        self.dragging = Some(id);
        self.broadcast = if is_corner {
            self.items
                .iter()
                .filter(|(other, it)| **other != id && it.is_selected() && it.as_node().is_some())
                .map(|(other, it)| (*other, it.base().to_vec()))
                .collect()
        } else {
            Vec::new()
        };
        true
    }

    pub fn update_handle_edit(&mut self, p: Pos2) -> bool {
        let Some(id) = self.dragging else {
            return false;
        };
        let Some(item) = self.items.get_mut(&id) else {
            return false;
        };
        if !item.update_handle_edit(p, &self.config) {
            return false;
        }
        self.dirty.insert(id);
        if !self.broadcast.is_empty() {
            let r = node::radius(item.base());
            let min = self.config.min_node_radius;
            for (other, _) in &self.broadcast {
                if let Some(o) = self.items.get_mut(other) {
                    node::set_radius(o.base_mut(), r, min);
                    o.refresh_ctrls();
                    o.mark(Dirty::Full);
                    self.dirty.insert(*other);
                }
            }
        }
        true
    }

    /// Finish the drag; reports whether anything changed.
    pub fn end_handle_edit(&mut self) -> bool {
        let Some(id) = self.dragging.take() else {
            return false;
        };
        let broadcast = std::mem::take(&mut self.broadcast);
        let modified = self
            .items
            .get_mut(&id)
            .is_some_and(|item| item.end_handle_edit());
        if modified {
            self.note_modified(id);
            for (other, before) in broadcast {
                if self.items.get(&other).is_some_and(|o| o.base() != &before[..]) {
                    self.note_modified(other);
                }
            }
        }
        modified
    }

    pub fn cancel_handle_edit(&mut self) {
        let Some(id) = self.dragging.take() else {
            return;
        };
        if let Some(item) = self.items.get_mut(&id) {
            item.cancel_handle_edit();
            self.dirty.insert(id);
        }
        for (other, before) in std::mem::take(&mut self.broadcast) {
            if let Some(o) = self.items.get_mut(&other) {
                *o.base_mut() = before;
                o.refresh_ctrls();
                o.mark(Dirty::Full);
                self.dirty.insert(other);
            }
        }
    }

    pub fn is_dragging(&self) -> bool {
        self.dragging.is_some()
    }

    /// Move every selected node by `delta`; attached edges follow on the next flush.
    pub fn move_selection(&mut self, delta: Vec2) -> bool {
        if delta == Vec2::ZERO {
            return false;
        }
        let moved: Vec<ItemId> = self
            .items
            .iter()
            .filter(|(_, item)| item.is_selected() && item.as_node().is_some())
            .map(|(id, _)| *id)
            .collect();
        for id in &moved {
            if let Some(item) = self.items.get_mut(id) {
                item.translate(delta);
                self.dirty.insert(*id);
            }
            self.note_modified(*id);
        }
        !moved.is_empty()
    }

    pub fn set_edge_mode(&mut self, id: ItemId, mode: EditMode) -> bool {
        let Some(item) = self.items.get_mut(&id) else {
            return false;
        };
        if item.as_edge().is_some_and(|e| e.mode == mode) || !item.set_mode(mode) {
            return false;
        }
        self.dirty.insert(id);
        self.note_modified(id);
        true
    }

    pub fn insert_handle(&mut self, id: ItemId, segment: usize, p: Pos2) -> bool {
        let done = self
            .items
            .get_mut(&id)
            .is_some_and(|item| item.insert_handle(segment, p));
        if done {
            self.dirty.insert(id);
            self.note_modified(id);
        }
        done
    }

    pub fn delete_handle(&mut self, id: ItemId, index: usize) -> bool {
        let done = self
            .items
            .get_mut(&id)
            .is_some_and(|item| item.delete_handle(index));
        if done {
            self.dirty.insert(id);
            self.note_modified(id);
        }
        done
    }

    // ========================================================================
    // EDGE CREATION
    // ========================================================================

    /// Start drawing a new edge out of `source`, its tip following `at`.
    pub fn begin_edge_creation(&mut self, source: StateId, at: Pos2) -> bool {
        if self.creating.is_some() {
            return false;
        }
        let Some(src) = self.node(source) else {
            log::debug!("cannot start an edge from unknown state {}", source);
            return false;
        };
        let base = edge::default_straight(at - src.origin().to_vec2(), self.config.label_offset);
        let origin = src.origin();
        let key = TransKey::new(source, 0, 0);
        let item = Item::edge(EdgeItem::new(key, self.config.default_edge_mode), origin, base);
        self.creating = Some(self.adopt(item, Dirty::Full));
        true
    }

    pub fn update_edge_creation(&mut self, at: Pos2) {
        let Some(id) = self.creating else {
            return;
        };
        let hovered = self.node_at(at);
        for (other, item) in self.items.iter_mut() {
            item.set_highlighted(Some(*other) == hovered);
        }
        if let Some(item) = self.items.get_mut(&id) {
            let local = at - item.origin().to_vec2();
            let base = item.base_mut();
            let len = base.len();
            base[edge::target(len)] = local;
            base[edge::tip(len)] = local;
            edge::straighten(base);
            item.refresh_ctrls();
            item.mark(Dirty::Full);
            self.dirty.insert(id);
        }
    }

    /// Ask the model for a transition from the pending edge's source to the node under `at`.
    /// On acceptance the new edge is placed with default geometry.
    pub fn finish_edge_creation(
        &mut self,
        model: &mut dyn AutomatonModel,
        at: Pos2,
    ) -> Option<ItemId> {
        let id = self.creating?;
        let source = self.items.get(&id).and_then(Item::as_edge)?.key.source;
        let target = self
            .node_at(at)
            .and_then(|n| self.items.get(&n))
            .and_then(Item::as_node)
            .map(|n| n.state);
        self.cancel_edge_creation();
        let target = target?;
        let Some(key) = model.request_insert_transition(TransKey::new(source, 0, target)) else {
            log::info!("model rejected transition {} -> {}", source, target);
            return None;
        };
        let placed = self.place_edge(key)?;
        self.note_modified(placed);
        self.consistent = self.test_consistent(model) == 0;
        Some(placed)
    }

    pub fn cancel_edge_creation(&mut self) {
        if let Some(id) = self.creating.take() {
            self.remove_item(id);
        }
        for item in self.items.values_mut() {
            item.set_highlighted(false);
        }
    }

    // ========================================================================
    // SNAPSHOTS
    // ========================================================================

    pub fn snapshot(&self) -> Snapshot {
        let nodes = self
            .nodes
            .iter()
            .filter_map(|(state, id)| {
                let item = self.items.get(id)?;
                Some(NodeRecord {
                    state: *state,
                    origin: item.origin(),
                    base: item.base().to_vec(),
                })
            })
            .collect();
        let edges = self
            .edges
            .iter()
            .filter_map(|(key, id)| {
                let item = self.items.get(id)?;
                Some(EdgeRecord {
                    key: *key,
                    mode: item.as_edge()?.mode,
                    origin: item.origin(),
                    base: item.base().to_vec(),
                })
            })
            .collect();
        Snapshot { nodes, edges }
    }

    /// Replace every item by the records of `snapshot`. Records whose elements no longer
    /// exist are dropped; short point lists fall back to the default geometry. Valid base
    /// points are taken over exactly, without re-anchoring.
    pub fn restore(&mut self, model: &dyn AutomatonModel, snapshot: &Snapshot) {
        self.clear();
        for rec in &snapshot.nodes {
            if !model.exists_state(rec.state) {
                log::debug!("dropping node of unknown state {}", rec.state);
                continue;
            }
            if self.nodes.contains_key(&rec.state) {
                log::debug!("dropping duplicate node of state {}", rec.state);
                continue;
            }
            let (base, level) = if rec.base.len() >= node::BASE_POINTS {
                (rec.base.clone(), Dirty::Paths)
            } else {
                (node::default_base(self.config.default_radius()), Dirty::Full)
            };
            self.insert_node(rec.state, flags_of(model, rec.state), rec.origin, base, level);
        }
        for rec in &snapshot.edges {
            let key = rec.key;
            if !model.exists_transition(&key)
                || self.node_id(key.source).is_none()
                || self.node_id(key.target).is_none()
                || self.edges.contains_key(&key)
            {
                log::debug!("dropping edge of unknown transition {:?}", key);
                continue;
            }
            if edge::is_valid_len(rec.base.len()) {
                let item = Item::edge(EdgeItem::new(key, rec.mode), rec.origin, rec.base.clone());
                let id = self.adopt(item, Dirty::Paths);
                self.edges.insert(key, id);
            } else {
                let base = self.default_edge_base(&key);
                self.insert_edge(key, rec.mode, base, Dirty::Full);
            }
        }
        self.consistent = self.test_consistent(model) == 0;
    }

    // ========================================================================
    // EXTERNAL GEOMETRY
    // ========================================================================

    pub(crate) fn set_node_origin(&mut self, state: StateId, origin: Pos2) -> bool {
        let Some(id) = self.node_id(state) else {
            return false;
        };
        if let Some(item) = self.items.get_mut(&id) {
            item.set_origin(origin);
        }
        self.mark(id, Dirty::Full);
        true
    }

    /// Move the tail of a state's initial arrow (local to the node).
    pub(crate) fn set_initial_source(&mut self, state: StateId, local: Pos2) -> bool {
        let Some(id) = self.node_id(state) else {
            return false;
        };
        if let Some(item) = self.items.get_mut(&id) {
            item.base_mut()[node::INIT_SOURCE] = local;
            item.refresh_ctrls();
        }
        self.mark(id, Dirty::Full);
        true
    }

    /// Replace an edge's local base points; it is re-anchored on the next flush.
    pub(crate) fn set_edge_geometry(
        &mut self,
        key: &TransKey,
        mode: EditMode,
        base: Vec<Pos2>,
    ) -> bool {
        if !edge::is_valid_len(base.len()) {
            return false;
        }
        let Some(id) = self.edge_id(key) else {
            return false;
        };
        if let Some(item) = self.items.get_mut(&id) {
            if let Some(e) = item.edge_mut() {
                e.mode = mode;
            }
            *item.base_mut() = base;
            item.refresh_ctrls();
        }
        self.mark(id, Dirty::Full);
        true
    }

    pub(crate) fn mark_all_modified(&mut self) {
        let ids: Vec<ItemId> = self.items.keys().copied().collect();
        for id in ids {
            self.note_modified(id);
        }
    }
}

fn update_node(style: &dyn StyleProvider, item: &mut Item, level: Dirty) {
    let Some(flags) = item.as_node().map(|n| n.flags) else {
        return;
    };
    let origin = item.origin();
    let offset = origin.to_vec2();
    let shape = style.node_shape(flags, origin, node::radius(item.base()));
    let initial = if flags.initial {
        if level == Dirty::Full {
            let local = shape.outline.translated(-offset);
            let dir = first_direction(&[item.base()[node::INIT_SOURCE].to_vec2()])
                .unwrap_or(-Vec2::X);
            item.base_mut()[node::INIT_TIP] = pull_out(&local, Pos2::ZERO, dir);
            item.refresh_ctrls();
        }
        let from = item.base()[node::INIT_SOURCE] + offset;
        let to = item.base()[node::INIT_TIP] + offset;
        Some(InitialArrow {
            from,
            to,
            head: arrow_head(to, to - from, ARROW_LENGTH, ARROW_HALF_WIDTH),
        })
    } else {
        None
    };
    item.set_paths(ItemPaths::Node {
        outline: shape.outline,
        decorations: shape.decorations,
        initial,
    });
}

fn edge_paths(origin: Pos2, base: &[Pos2]) -> ItemPaths {
    let len = base.len();
    if !edge::is_valid_len(len) {
        return ItemPaths::Empty;
    }
    let offset = origin.to_vec2();
    let segments = edge::segments(base)
        .into_iter()
        .map(|seg| seg.map(|p| p + offset))
        .collect();
    let tip = base[edge::tip(len)];
    let dir = first_direction(&[tip - base[len - 3], tip - base[edge::ROOT], tip - base[edge::SOURCE]])
        .unwrap_or(Vec2::X);
    ItemPaths::Edge {
        segments,
        head: arrow_head(tip + offset, dir, ARROW_LENGTH, ARROW_HALF_WIDTH),
        label: edge::midpoint(base) + base[edge::LABEL].to_vec2() + offset,
    }
}
