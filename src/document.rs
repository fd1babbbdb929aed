//! Diagram document
//! A scene plus its undo history; every geometry gesture is bracketed here

use egui::{Pos2, Vec2};

use crate::fsm::AutomatonModel;
use crate::history::{EditHistory, HistoryPool};
use crate::item::edge::EditMode;
use crate::item::ItemId;
use crate::layout::{LayoutMode, LayoutOutcome};
use crate::persist::PersistResult;
use crate::scene::{Scene, Snapshot};

pub struct Diagram {
    scene: Scene,
    history: EditHistory<Snapshot>,
    /// Open selection move; `true` once it has changed something
    moving: Option<bool>,
}

impl Diagram {
    pub fn new(scene: Scene, pool: &HistoryPool<Snapshot>) -> Self {
        Self {
            scene,
            history: pool.history(),
            moving: None,
        }
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    /// Direct access for changes that are not undoable (selection, viewport, reconcile).
    pub fn scene_mut(&mut self) -> &mut Scene {
        &mut self.scene
    }

    pub fn history(&self) -> &EditHistory<Snapshot> {
        &self.history
    }

    fn begin(&mut self) {
        let scene = &self.scene;
        self.history.begin_edit(|| scene.snapshot());
    }

    fn finish(&mut self, changed: bool) -> bool {
        if changed {
            self.history.end_edit();
            self.scene.flush_pending_update();
        } else {
            self.history.cancel_edit();
        }
        changed
    }

    /// Run one undoable edit; nothing is recorded when `edit` reports no change.
    fn bracket(&mut self, edit: impl FnOnce(&mut Scene) -> bool) -> bool {
        self.begin();
        let changed = edit(&mut self.scene);
        self.finish(changed)
    }

    // ========================================================================
    // GESTURES
    // ========================================================================

    pub fn begin_drag(&mut self, id: ItemId, index: usize) -> bool {
        self.begin();
        if self.scene.begin_handle_edit(id, index) {
            true
        } else {
            self.history.cancel_edit();
            false
        }
    }

    pub fn update_drag(&mut self, p: Pos2) -> bool {
        let moved = self.scene.update_handle_edit(p);
        if moved {
            self.scene.flush_pending_update();
        }
        moved
    }

    pub fn end_drag(&mut self) -> bool {
        if !self.scene.is_dragging() {
            return false;
        }
        let changed = self.scene.end_handle_edit();
        self.finish(changed)
    }

    pub fn cancel_drag(&mut self) {
        if !self.scene.is_dragging() {
            return;
        }
        self.scene.cancel_handle_edit();
        self.scene.flush_pending_update();
        self.history.cancel_edit();
    }

    pub fn begin_move(&mut self) {
        if self.moving.is_some() {
            return;
        }
        self.begin();
        self.moving = Some(false);
    }

    pub fn update_move(&mut self, delta: Vec2) -> bool {
        let Some(moved) = self.moving.as_mut() else {
            return false;
        };
        if !self.scene.move_selection(delta) {
            return false;
        }
        *moved = true;
        self.scene.flush_pending_update();
        true
    }

    pub fn end_move(&mut self) -> bool {
        match self.moving.take() {
            Some(changed) => self.finish(changed),
            None => false,
        }
    }

    pub fn insert_handle(&mut self, id: ItemId, segment: usize, p: Pos2) -> bool {
        self.bracket(|scene| scene.insert_handle(id, segment, p))
    }

    pub fn delete_handle(&mut self, id: ItemId, index: usize) -> bool {
        self.bracket(|scene| scene.delete_handle(id, index))
    }

    pub fn set_edge_mode(&mut self, id: ItemId, mode: EditMode) -> bool {
        self.bracket(|scene| scene.set_edge_mode(id, mode))
    }

    pub fn grid_construct(&mut self, model: &dyn AutomatonModel, clear: bool) -> usize {
        let mut placed = 0;
        self.bracket(|scene| {
            placed = scene.grid_construct(model, clear);
            placed > 0
        });
        placed
    }

    pub fn layout(
        &mut self,
        model: &dyn AutomatonModel,
        mode: LayoutMode,
        poll: &mut dyn FnMut() -> bool,
    ) -> LayoutOutcome<()> {
        self.begin();
        match self.scene.layout_external(model, mode, poll) {
            Ok(()) => {
                self.finish(true);
                Ok(())
            }
            Err(e) => {
                log::warn!("layout failed: {}", e);
                self.history.cancel_edit();
                Err(e)
            }
        }
    }

    /// Apply layout output produced elsewhere (e.g. on a worker thread) as one undoable edit.
    pub fn apply_layout(
        &mut self,
        model: &dyn AutomatonModel,
        mode: LayoutMode,
        output: &str,
    ) -> LayoutOutcome<()> {
        self.begin();
        match self.scene.apply_plain(model, mode, output) {
            Ok(()) => {
                self.finish(true);
                Ok(())
            }
            Err(e) => {
                log::warn!("layout output rejected: {}", e);
                self.history.cancel_edit();
                Err(e)
            }
        }
    }

    // ========================================================================
    // HISTORY
    // ========================================================================

    pub fn can_undo(&self) -> bool {
        !self.scene.is_dragging() && self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        !self.scene.is_dragging() && self.history.can_redo()
    }

    pub fn undo(&mut self, model: &dyn AutomatonModel) -> bool {
        if self.scene.is_dragging() {
            return false;
        }
        let Some(snapshot) = self.history.undo(self.scene.snapshot()) else {
            return false;
        };
        self.apply(model, &snapshot);
        true
    }

    pub fn redo(&mut self, model: &dyn AutomatonModel) -> bool {
        if self.scene.is_dragging() {
            return false;
        }
        let Some(snapshot) = self.history.redo() else {
            return false;
        };
        self.apply(model, &snapshot);
        true
    }

    fn apply(&mut self, model: &dyn AutomatonModel, snapshot: &Snapshot) {
        self.scene.restore(model, snapshot);
        self.scene.flush_pending_update();
        self.scene.set_modified(true);
    }

    // ========================================================================
    // PERSISTENCE
    // ========================================================================

    /// Load a representation, forgetting any undo history.
    pub fn read(&mut self, model: &dyn AutomatonModel, source: &str) -> PersistResult<()> {
        self.history.clear();
        self.moving = None;
        self.scene.read(model, source)
    }

    pub fn write(&mut self, model: &dyn AutomatonModel) -> String {
        let text = self.scene.write(model);
        self.scene.set_modified(false);
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::fsm::{Automaton, TransKey};
    use crate::item::node;

    fn setup() -> (Automaton, HistoryPool<Snapshot>, Diagram) {
        let mut model = Automaton::new("Test");
        model.add_state("s1");
        model.add_state("s2");
        let go = model.add_event("go");
        model.add_transition(TransKey::new(1, go, 2));
        let mut scene = Scene::new(EngineConfig::default());
        scene.grid_construct(&model, true);
        scene.flush_pending_update();
        let pool = HistoryPool::default();
        let diagram = Diagram::new(scene, &pool);
        (model, pool, diagram)
    }

    #[test]
    fn test_move_then_undo_redo() {
        let (model, _pool, mut d) = setup();
        let id = d.scene().node_id(1).expect("node");
        d.scene_mut().select(id, false);
        d.begin_move();
        assert!(d.update_move(Vec2::new(10.0, 0.0)));
        assert!(d.end_move());
        assert_eq!(d.scene().node(1).map(|n| n.origin()), Some(Pos2::new(60.0, 50.0)));

        assert!(d.undo(&model));
        assert_eq!(d.scene().node(1).map(|n| n.origin()), Some(Pos2::new(50.0, 50.0)));
        assert!(d.can_redo());
        assert!(d.redo(&model));
        assert_eq!(d.scene().node(1).map(|n| n.origin()), Some(Pos2::new(60.0, 50.0)));
    }

    #[test]
    fn test_empty_move_records_nothing() {
        let (_model, pool, mut d) = setup();
        d.begin_move();
        assert!(!d.update_move(Vec2::new(5.0, 5.0)));
        assert!(!d.end_move());
        assert_eq!(pool.total(), 0);
        assert!(!d.can_undo());
    }

    #[test]
    fn test_drag_without_change_is_cancelled() {
        let (_model, pool, mut d) = setup();
        let id = d.scene().node_id(1).expect("node");
        d.scene_mut().select(id, false);
        assert!(d.begin_drag(id, 0));
        assert!(!d.can_undo());
        assert!(!d.end_drag());
        assert_eq!(pool.total(), 0);
    }

    #[test]
    fn test_corner_drag_undo() {
        let (model, _pool, mut d) = setup();
        let id = d.scene().node_id(1).expect("node");
        d.scene_mut().select(id, false);
        let before = d.scene().snapshot();
        assert!(d.begin_drag(id, 2));
        assert!(d.update_drag(Pos2::new(90.0, 90.0)));
        assert!(d.end_drag());
        assert_ne!(d.scene().snapshot(), before);
        assert!(d.undo(&model));
        assert_eq!(d.scene().snapshot(), before);
    }

    #[test]
    fn test_cancelled_drag_restores() {
        let (_model, pool, mut d) = setup();
        let id = d.scene().node_id(1).expect("node");
        d.scene_mut().select(id, false);
        let before = d.scene().node(1).map(|n| n.base().to_vec());
        assert!(d.begin_drag(id, 2));
        d.update_drag(Pos2::new(90.0, 90.0));
        d.cancel_drag();
        assert_eq!(d.scene().node(1).map(|n| n.base().to_vec()), before);
        assert_eq!(pool.total(), 0);
    }

    #[test]
    fn test_mode_change_is_undoable() {
        let (model, _pool, mut d) = setup();
        let id = d.scene().edge_id(&TransKey::new(1, 1, 2)).expect("edge");
        assert!(d.set_edge_mode(id, EditMode::Spline));
        assert!(!d.set_edge_mode(id, EditMode::Spline));
        assert_eq!(d.history().len(), 1);
        assert!(d.undo(&model));
        let mode = d.scene().item(id).and_then(|i| i.as_edge()).map(|e| e.mode);
        assert_eq!(mode, Some(EditMode::Line));
    }

    #[test]
    fn test_read_clears_history() {
        let (model, _pool, mut d) = setup();
        let id = d.scene().edge_id(&TransKey::new(1, 1, 2)).expect("edge");
        d.set_edge_mode(id, EditMode::Polygon);
        let text = d.write(&model);
        assert!(!d.scene().is_modified());
        d.read(&model, &text).expect("should read");
        assert!(!d.can_undo());
        assert_eq!(d.scene().node(1).map(|n| node::radius(n.base())), Some(Vec2::splat(20.0)));
    }

    #[test]
    fn test_histories_share_the_pool() {
        let (model, pool, mut a) = setup();
        let mut b = Diagram::new(Scene::new(EngineConfig::default()), &pool);
        let id = a.scene().edge_id(&TransKey::new(1, 1, 2)).expect("edge");
        a.set_edge_mode(id, EditMode::Spline);
        assert_eq!(b.grid_construct(&model, true), 3);
        assert_eq!(pool.total(), 2);
        drop(b);
        assert_eq!(pool.total(), 1);
    }

    const PLAIN: &str = "graph 1 3 1
node s1 0.5 0.5 0.4 0.4 s1 solid ellipse black lightgrey
node s2 2.5 0.5 0.4 0.4 s2 solid ellipse black lightgrey
edge s1 s2 4 0.7 0.5 1.2 0.5 1.8 0.5 2.3 0.5 go 1.5 0.7 solid black
stop
";

    #[test]
    fn test_apply_layout_is_undoable() {
        let (model, _pool, mut d) = setup();
        let before = d.scene().snapshot();
        d.apply_layout(&model, LayoutMode::Full, PLAIN).expect("applies");
        assert_eq!(d.scene().node(2).map(|n| n.origin()), Some(Pos2::new(250.0, -50.0)));
        assert_eq!(d.history().len(), 1);
        assert!(d.undo(&model));
        assert_eq!(d.scene().snapshot(), before);
    }

    #[test]
    fn test_rejected_layout_records_nothing() {
        let (model, _pool, mut d) = setup();
        let before = d.scene().snapshot();
        assert!(d.apply_layout(&model, LayoutMode::Full, "graph 1 3 1\n").is_err());
        assert_eq!(d.scene().snapshot(), before);
        assert!(!d.can_undo());
        assert_eq!(d.history().depth(), 0);
    }

    #[test]
    fn test_failed_layout_run_records_nothing() {
        let (model, pool, _) = setup();
        let mut config = EngineConfig::default();
        config.layout.program = "/nonexistent/statecanvas-dot".to_string();
        let mut scene = Scene::new(config);
        scene.grid_construct(&model, true);
        scene.flush_pending_update();
        let mut d = Diagram::new(scene, &pool);
        let before = d.scene().snapshot();
        assert!(d.layout(&model, LayoutMode::Full, &mut || false).is_err());
        assert_eq!(d.scene().snapshot(), before);
        assert!(!d.can_undo());
    }
}
