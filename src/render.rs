//! Render seam
//! Walks the scene's derived paths and hands them to a drawing backend
//!
//! The engine never paints directly. A [`Surface`] receives scene-coordinate primitives; the
//! editor binary implements it over `egui::Painter`, tests implement it with a recorder.

use egui::Pos2;

use crate::fsm::AutomatonModel;
use crate::geometry::CubicSegment;
use crate::item::{Item, ItemId, ItemPaths};
use crate::scene::Scene;

/// How an item is emphasised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Emphasis {
    Normal,
    Selected,
    /// Drop target while drawing a new edge
    Highlighted,
    /// Edge in muted mode
    Muted,
    /// Edge still being drawn
    Pending,
}

pub trait Surface {
    fn stroke_curve(&mut self, segments: &[CubicSegment], emphasis: Emphasis);
    /// Closed outline; `filled` for node bodies and arrow heads.
    fn polygon(&mut self, points: &[Pos2], filled: bool, emphasis: Emphasis);
    fn line(&mut self, from: Pos2, to: Pos2, emphasis: Emphasis);
    fn text(&mut self, at: Pos2, text: &str, emphasis: Emphasis);
    /// Drag handle of a selected item; fixed handles are drawn but cannot be moved.
    fn handle(&mut self, at: Pos2, fixed: bool);
}

fn emphasis_of(item: &Item, pending: bool) -> Emphasis {
    if pending {
        Emphasis::Pending
    } else if item.is_highlighted() {
        Emphasis::Highlighted
    } else if item.is_selected() {
        Emphasis::Selected
    } else if item.as_edge().is_some_and(|e| e.mode.hides_label()) {
        Emphasis::Muted
    } else {
        Emphasis::Normal
    }
}

impl Scene {
    /// Draw every item overlapping the viewport: edges first, then nodes, then the handles of
    /// selected items on top. Returns the number of items drawn.
    pub fn render(&self, model: &dyn AutomatonModel, surface: &mut dyn Surface) -> usize {
        let viewport = self.viewport();
        let pending = self.pending_edge_id();
        let visible: Vec<(ItemId, &Item)> = self
            .items()
            .filter(|(_, item)| viewport.intersects(item.paths().bounding_rect()))
            .collect();

        for (id, item) in visible.iter().filter(|(_, i)| i.as_edge().is_some()) {
            draw_edge(item, model, emphasis_of(item, pending == Some(*id)), surface);
        }
        for (_, item) in visible.iter().filter(|(_, i)| i.as_node().is_some()) {
            draw_node(item, model, emphasis_of(item, false), surface);
        }
        for (_, item) in visible.iter().filter(|(_, i)| i.is_selected()) {
            for (index, handle) in item.handles().iter().enumerate() {
                surface.handle(item.origin() + handle.to_vec2(), item.is_fixed(index));
            }
        }
        visible.len()
    }
}

fn draw_node(item: &Item, model: &dyn AutomatonModel, emphasis: Emphasis, surface: &mut dyn Surface) {
    let ItemPaths::Node {
        outline,
        decorations,
        initial,
    } = item.paths()
    else {
        return;
    };
    surface.polygon(outline.points(), true, emphasis);
    for decoration in decorations {
        surface.polygon(decoration.points(), false, emphasis);
    }
    if let Some(arrow) = initial {
        surface.line(arrow.from, arrow.to, emphasis);
        surface.polygon(&arrow.head, true, emphasis);
    }
    if let Some(name) = item.as_node().and_then(|n| model.state_name(n.state)) {
        surface.text(item.origin(), &name, emphasis);
    }
}

fn draw_edge(item: &Item, model: &dyn AutomatonModel, emphasis: Emphasis, surface: &mut dyn Surface) {
    let ItemPaths::Edge {
        segments,
        head,
        label,
    } = item.paths()
    else {
        return;
    };
    surface.stroke_curve(segments, emphasis);
    surface.polygon(head, true, emphasis);
    let Some(edge) = item.as_edge() else {
        return;
    };
    if edge.mode.hides_label() {
        return;
    }
    if let Some(name) = model.event_name(edge.key.event) {
        surface.text(*label, &name, emphasis);
    }
}
