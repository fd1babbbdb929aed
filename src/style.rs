//! Node style provider
//! Builds the outline (and any flag-dependent decoration) of a state node

use egui::{Pos2, Rect, Vec2};

use crate::config::NodeShapeKind;
use crate::geometry::Shape;

/// Attributes of a state that influence how its node is drawn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeFlags {
    pub initial: bool,
    pub marked: bool,
}

/// Derived outline of a node: `outline` is what edges anchor to, `decorations` are drawn
/// inside it and never take part in anchoring.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeShape {
    pub outline: Shape,
    pub decorations: Vec<Shape>,
}

pub trait StyleProvider {
    fn node_shape(&self, flags: NodeFlags, center: Pos2, radius: Vec2) -> NodeShape;
}

/// Ellipses or boxes; marked states get a second, inset outline.
#[derive(Debug, Clone, Copy)]
pub struct DefaultStyle {
    pub kind: NodeShapeKind,
    pub marked_inset: f32,
    pub segments: usize,
}

impl Default for DefaultStyle {
    fn default() -> Self {
        Self {
            kind: NodeShapeKind::Ellipse,
            marked_inset: 4.0,
            segments: 64,
        }
    }
}

impl DefaultStyle {
    pub fn new(kind: NodeShapeKind) -> Self {
        Self {
            kind,
            ..Self::default()
        }
    }

    fn outline(&self, center: Pos2, radius: Vec2) -> Shape {
        match self.kind {
            NodeShapeKind::Ellipse => Shape::ellipse(center, radius, self.segments),
            NodeShapeKind::Box => Shape::rect(Rect::from_center_size(center, radius * 2.0)),
        }
    }
}

impl StyleProvider for DefaultStyle {
    fn node_shape(&self, flags: NodeFlags, center: Pos2, radius: Vec2) -> NodeShape {
        let outline = self.outline(center, radius);
        let mut decorations = Vec::new();
        if flags.marked {
            let inset = Vec2::splat(self.marked_inset);
            let inner = (radius - inset).max(radius * 0.5);
            decorations.push(self.outline(center, inner));
        }
        NodeShape {
            outline,
            decorations,
        }
    }
}
