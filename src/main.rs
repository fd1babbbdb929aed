//! statecanvas GUI - Automaton diagram editor
//! Interactive canvas for arranging states and shaping transitions

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use eframe::egui;
use egui::{Color32, Pos2, Rect, Stroke, Vec2};

use statecanvas::config::EngineConfig;
use statecanvas::fsm::{Automaton, AutomatonModel, StateId, TransKey};
use statecanvas::geometry::CubicSegment;
use statecanvas::history::HistoryPool;
use statecanvas::item::{EditMode, ElementRef, ItemId};
use statecanvas::layout::{self, LayoutError, LayoutMode, LayoutOutcome, LayoutRunner};
use statecanvas::persist;
use statecanvas::render::{Emphasis, Surface};
use statecanvas::scene::{ElementDelta, Hit, Scene, SceneEvent, Snapshot};
use statecanvas::Diagram;

fn statecanvas_icon() -> egui::IconData {
    // Generated 64x64 icon: dark background, two rings joined by an arc.
    let w: u32 = 64;
    let h: u32 = 64;
    let mut rgba = vec![0u8; (w * h * 4) as usize];
    let centers = [(18.0f32, 40.0f32), (46.0f32, 40.0f32)];
    let (r_outer, r_inner) = (11.0f32, 8.0f32);

    for y in 0..h {
        for x in 0..w {
            let (fx, fy) = (x as f32, y as f32);
            let mut px = [20u8, 24, 30, 255];

            for (cx, cy) in centers {
                let d = ((fx - cx).powi(2) + (fy - cy).powi(2)).sqrt();
                if d >= r_inner && d <= r_outer {
                    let t = (fy / (h as f32 - 1.0)).clamp(0.0, 1.0);
                    px = [(240.0 - 40.0 * t) as u8, (140.0 - 30.0 * t) as u8, 40, 255];
                } else if d < r_inner {
                    px = [34, 40, 52, 255];
                }
            }

            // Arc above the rings
            let d = ((fx - 32.0).powi(2) + (fy - 40.0).powi(2)).sqrt();
            if fy < 30.0 && (d - 22.0).abs() < 1.5 {
                px = [160, 175, 195, 255];
            }

            let idx = ((y * w + x) * 4) as usize;
            rgba[idx..idx + 4].copy_from_slice(&px);
        }
    }

    egui::IconData {
        rgba,
        width: w,
        height: h,
    }
}

fn config_path() -> Option<PathBuf> {
    std::env::var("STATECANVAS_CONFIG").ok().map(PathBuf::from)
}

fn main() -> eframe::Result<()> {
    env_logger::init();

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1400.0, 900.0])
            .with_title("statecanvas - Automaton Editor")
            .with_icon(statecanvas_icon()),
        ..Default::default()
    };

    eframe::run_native(
        "statecanvas",
        options,
        Box::new(|cc| Ok(Box::new(EditorApp::new(cc)))),
    )
}

/// Pointer gesture on the canvas.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Gesture {
    Idle,
    Handle,
    Move { last: Pos2 },
    Connect,
    Select { from: Pos2, to: Pos2, additive: bool },
}

/// Graphviz run on a worker thread; its output is applied on the UI thread.
struct PendingLayout {
    mode: LayoutMode,
    cancel: Arc<AtomicBool>,
    result: mpsc::Receiver<LayoutOutcome<String>>,
}

struct EditorApp {
    config: EngineConfig,
    model: Automaton,
    /// Shared undo budget; every diagram draws from it
    pool: HistoryPool<Snapshot>,
    diagram: Diagram,
    path: Option<PathBuf>,
    zoom: f32,
    pan_offset: Vec2,
    gesture: Gesture,
    new_state_name: String,
    new_event_name: String,
    status: Option<String>,
    error_message: Option<String>,
    window_title: String,
    layout: Option<PendingLayout>,
}

impl EditorApp {
    fn new(_cc: &eframe::CreationContext<'_>) -> Self {
        let config = match config_path() {
            Some(path) => EngineConfig::load(&path).unwrap_or_else(|e| {
                log::warn!("{}; using defaults", e);
                EngineConfig::default()
            }),
            None => EngineConfig::default(),
        };
        let pool = HistoryPool::new(config.history_ceiling);
        let model = sample_automaton();
        let mut scene = Scene::new(config.clone());
        scene.grid_construct(&model, true);
        scene.flush_pending_update();
        scene.set_modified(false);
        let diagram = Diagram::new(scene, &pool);
        Self {
            config,
            model,
            pool,
            diagram,
            path: None,
            zoom: 1.0,
            pan_offset: Vec2::ZERO,
            gesture: Gesture::Idle,
            new_state_name: String::new(),
            new_event_name: String::new(),
            status: None,
            error_message: None,
            window_title: String::new(),
            layout: None,
        }
    }

    fn title(&self) -> String {
        let name = self
            .path
            .as_ref()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.model.name.clone());
        let dirty = if self.diagram.scene().is_modified() { " *" } else { "" };
        format!("statecanvas - {}{}", name, dirty)
    }

    // ========================================================================
    // FILES
    // ========================================================================

    fn new_document(&mut self) {
        self.discard_layout();
        self.model = sample_automaton();
        let mut scene = Scene::new(self.config.clone());
        scene.grid_construct(&self.model, true);
        scene.flush_pending_update();
        scene.set_modified(false);
        self.diagram = Diagram::new(scene, &self.pool);
        self.path = None;
        self.gesture = Gesture::Idle;
    }

    fn open(&mut self, path: PathBuf) {
        let loaded = persist::read_file(&path).and_then(|text| {
            let repr = persist::parse_representation(&text)?;
            Ok((text, repr))
        });
        match loaded {
            Ok((text, repr)) => {
                self.discard_layout();
                let name = path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default();
                self.model = repr.to_automaton(&name);
                if let Err(e) = self.diagram.read(&self.model, &text) {
                    self.error_message = Some(e.to_string());
                    return;
                }
                self.status = Some(format!("Opened {}", path.display()));
                self.error_message = None;
                self.path = Some(path);
                self.gesture = Gesture::Idle;
            }
            Err(e) => self.error_message = Some(e.to_string()),
        }
    }

    fn save(&mut self, path: PathBuf) {
        let text = self.diagram.write(&self.model);
        match persist::write_file(&path, &text) {
            Ok(()) => {
                self.status = Some(format!("Saved {}", path.display()));
                self.path = Some(path);
            }
            Err(e) => {
                self.diagram.scene_mut().set_modified(true);
                self.error_message = Some(e.to_string());
            }
        }
    }

    // ========================================================================
    // MODEL EDITS
    // ========================================================================

    fn notify(&mut self, delta: ElementDelta) {
        let result = self.diagram.scene_mut().reconcile(&self.model, delta);
        if !result.consistent {
            self.status = Some(format!("{} items out of step with the automaton", result.missing));
        }
        self.diagram.scene_mut().flush_pending_update();
    }

    fn add_state(&mut self) {
        let name = self.new_state_name.trim().to_string();
        if name.is_empty() || self.model.state_by_name(&name).is_some() {
            return;
        }
        let id = self.model.add_state(name);
        self.new_state_name.clear();
        self.notify(ElementDelta::StateInserted(id));
    }

    fn add_event(&mut self) {
        let name = self.new_event_name.trim().to_string();
        if name.is_empty() {
            return;
        }
        let id = self.model.add_event(name);
        self.model.default_event = Some(id);
        self.new_event_name.clear();
    }

    fn selected_elements(&self) -> Vec<ElementRef> {
        let scene = self.diagram.scene();
        scene
            .selection()
            .into_iter()
            .filter_map(|id| scene.item(id).map(|item| item.element()))
            .collect()
    }

    fn delete_selection(&mut self) {
        for element in self.selected_elements() {
            match element {
                ElementRef::State(state) => {
                    if self.model.remove_state(state) {
                        self.notify(ElementDelta::StateRemoved(state));
                    }
                }
                ElementRef::Transition(key) => {
                    if self.model.remove_transition(&key) {
                        self.notify(ElementDelta::TransitionRemoved(key));
                    }
                }
            }
        }
    }

    fn toggle_flag(&mut self, state: StateId, initial: bool) {
        let Some(info) = self.model.state(state) else {
            return;
        };
        if initial {
            let on = !info.initial;
            self.model.set_initial(state, on);
        } else {
            let on = !info.marked;
            self.model.set_marked(state, on);
        }
        self.notify(ElementDelta::PropertyChanged(ElementRef::State(state)));
    }

    fn run_layout(&mut self, mode: LayoutMode) {
        if self.layout.is_some() {
            return;
        }
        let scene = self.diagram.scene();
        let source = layout::write_dot(scene, &self.model, mode, scene.config().layout.rankdir);
        let runner = LayoutRunner::from_config(&scene.config().layout);
        let cancel = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel();
        let flag = Arc::clone(&cancel);
        thread::spawn(move || {
            let result = runner.run(&source, mode, &mut || flag.load(Ordering::Relaxed));
            let _ = tx.send(result);
        });
        self.status = Some("Layout running (Esc cancels)".to_string());
        self.error_message = None;
        self.layout = Some(PendingLayout {
            mode,
            cancel,
            result: rx,
        });
    }

    /// Stop a running layout whose output no longer fits the open drawing.
    fn discard_layout(&mut self) {
        self.cancel_layout();
        self.layout = None;
    }

    fn cancel_layout(&mut self) {
        if let Some(pending) = &self.layout {
            pending.cancel.store(true, Ordering::Relaxed);
        }
    }

    /// Pick up a finished layout run, if any.
    fn poll_layout(&mut self, ctx: &egui::Context) {
        let Some(pending) = &self.layout else {
            return;
        };
        let outcome = match pending.result.try_recv() {
            Ok(outcome) => outcome,
            Err(mpsc::TryRecvError::Empty) => {
                ctx.request_repaint_after(Duration::from_millis(50));
                return;
            }
            Err(mpsc::TryRecvError::Disconnected) => {
                Err(LayoutError::Unresolved("layout worker stopped".to_string()))
            }
        };
        let mode = pending.mode;
        self.layout = None;
        match outcome.and_then(|output| self.diagram.apply_layout(&self.model, mode, &output)) {
            Ok(()) => self.status = Some("Layout applied".to_string()),
            Err(LayoutError::Cancelled) => self.status = Some("Layout cancelled".to_string()),
            Err(e) => self.error_message = Some(e.to_string()),
        }
    }

    // ========================================================================
    // CANVAS
    // ========================================================================

    fn to_screen(&self, rect: Rect, p: Pos2) -> Pos2 {
        rect.center() + self.pan_offset + p.to_vec2() * self.zoom
    }

    fn to_scene(&self, rect: Rect, p: Pos2) -> Pos2 {
        ((p - rect.center() - self.pan_offset) / self.zoom).to_pos2()
    }

    fn handle_pointer(&mut self, ctx: &egui::Context, response: &egui::Response, rect: Rect) {
        let modifiers = ctx.input(|i| i.modifiers);
        let Some(screen) = response.interact_pointer_pos().or(response.hover_pos()) else {
            return;
        };
        let p = self.to_scene(rect, screen);

        let hit = self.diagram.scene().hit_test(p);
        if response.double_clicked() {
            match hit {
                Some(Hit::Handle { item, index }) => {
                    self.diagram.delete_handle(item, index);
                }
                Some(Hit::Edge { item, segment }) => {
                    self.diagram.insert_handle(item, segment, p);
                }
                _ => {}
            }
            return;
        }

        if response.drag_started_by(egui::PointerButton::Primary) {
            self.gesture = match hit {
                Some(Hit::Handle { item, index }) if self.diagram.begin_drag(item, index) => {
                    Gesture::Handle
                }
                Some(Hit::Node(id)) if modifiers.shift => {
                    let state = self.state_of(id);
                    match state {
                        Some(state) if self.diagram.scene_mut().begin_edge_creation(state, p) => {
                            Gesture::Connect
                        }
                        _ => Gesture::Idle,
                    }
                }
                Some(Hit::Node(id)) => {
                    if !self.diagram.scene().item(id).is_some_and(|i| i.is_selected()) {
                        self.diagram.scene_mut().select(id, modifiers.command);
                    }
                    self.diagram.begin_move();
                    Gesture::Move { last: p }
                }
                Some(Hit::Edge { item, .. }) => {
                    self.diagram.scene_mut().select(item, modifiers.command);
                    Gesture::Idle
                }
                _ => Gesture::Select {
                    from: p,
                    to: p,
                    additive: modifiers.command,
                },
            };
        } else if response.dragged_by(egui::PointerButton::Primary) {
            match &mut self.gesture {
                Gesture::Handle => {
                    self.diagram.update_drag(p);
                }
                Gesture::Move { last } => {
                    let delta = p - *last;
                    *last = p;
                    self.diagram.update_move(delta);
                }
                Gesture::Connect => {
                    self.diagram.scene_mut().update_edge_creation(p);
                    self.diagram.scene_mut().flush_pending_update();
                }
                Gesture::Select { to, .. } => *to = p,
                Gesture::Idle => {}
            }
        } else if response.drag_stopped_by(egui::PointerButton::Primary) {
            match self.gesture {
                Gesture::Handle => {
                    self.diagram.end_drag();
                }
                Gesture::Move { .. } => {
                    self.diagram.end_move();
                }
                Gesture::Connect => {
                    let placed = self
                        .diagram
                        .scene_mut()
                        .finish_edge_creation(&mut self.model, p);
                    self.diagram.scene_mut().flush_pending_update();
                    if placed.is_none() {
                        self.status = Some("Transition rejected (pick an event first)".to_string());
                    }
                }
                Gesture::Select { from, to, additive } => {
                    self.diagram
                        .scene_mut()
                        .select_in_rect(Rect::from_two_pos(from, to), additive);
                }
                Gesture::Idle => {}
            }
            self.gesture = Gesture::Idle;
        } else if response.clicked() {
            match hit {
                Some(Hit::Node(id)) | Some(Hit::Edge { item: id, .. }) => {
                    if modifiers.command {
                        self.diagram.scene_mut().toggle_selected(id);
                    } else {
                        self.diagram.scene_mut().select(id, false);
                    }
                }
                Some(Hit::Handle { .. }) => {}
                None => self.diagram.scene_mut().clear_selection(),
            }
        }

        // Panning with the secondary button
        if response.dragged_by(egui::PointerButton::Secondary) {
            self.pan_offset += response.drag_delta();
        }
    }

    fn cancel_gesture(&mut self) {
        match self.gesture {
            Gesture::Handle => self.diagram.cancel_drag(),
            Gesture::Move { .. } => {
                self.diagram.end_move();
            }
            Gesture::Connect => {
                self.diagram.scene_mut().cancel_edge_creation();
                self.diagram.scene_mut().flush_pending_update();
            }
            _ => {}
        }
        self.gesture = Gesture::Idle;
    }

    fn state_of(&self, id: ItemId) -> Option<StateId> {
        self.diagram
            .scene()
            .item(id)
            .and_then(|i| i.as_node())
            .map(|n| n.state)
    }

    fn handle_keys(&mut self, ctx: &egui::Context) {
        let (undo, redo, delete, escape, select_all) = ctx.input(|i| {
            let cmd = i.modifiers.command;
            (
                cmd && !i.modifiers.shift && i.key_pressed(egui::Key::Z),
                cmd && (i.key_pressed(egui::Key::Y) || (i.modifiers.shift && i.key_pressed(egui::Key::Z))),
                i.key_pressed(egui::Key::Delete),
                i.key_pressed(egui::Key::Escape),
                cmd && i.key_pressed(egui::Key::A),
            )
        });
        if ctx.wants_keyboard_input() {
            return;
        }
        if escape {
            self.cancel_layout();
            self.cancel_gesture();
        }
        if undo {
            self.diagram.undo(&self.model);
        }
        if redo {
            self.diagram.redo(&self.model);
        }
        if delete && self.gesture == Gesture::Idle {
            self.delete_selection();
        }
        if select_all {
            self.diagram.scene_mut().select_all();
        }
    }

    fn edge_mode_panel(&mut self, ui: &mut egui::Ui) {
        let edges: Vec<(ItemId, EditMode)> = self
            .diagram
            .scene()
            .selection()
            .into_iter()
            .filter_map(|id| {
                let mode = self.diagram.scene().item(id)?.as_edge()?.mode;
                Some((id, mode))
            })
            .collect();
        let Some((_, first)) = edges.first().copied() else {
            return;
        };
        let mut mode = first;
        egui::ComboBox::from_label("Edge mode")
            .selected_text(mode.as_str())
            .show_ui(ui, |ui| {
                for m in EditMode::ALL {
                    ui.selectable_value(&mut mode, m, m.as_str());
                }
            });
        if mode != first {
            for (id, _) in edges {
                self.diagram.set_edge_mode(id, mode);
            }
        }
    }

    fn model_panel(&mut self, ui: &mut egui::Ui) {
        ui.heading(&self.model.name);
        ui.separator();

        ui.label("States");
        let states = self.model.states();
        let mut toggle: Option<(StateId, bool)> = None;
        egui::ScrollArea::vertical()
            .id_salt("states")
            .max_height(220.0)
            .show(ui, |ui| {
                for state in &states {
                    let Some(info) = self.model.state(*state) else {
                        continue;
                    };
                    ui.horizontal(|ui| {
                        ui.label(format!("{} ({})", info.name, state));
                        if ui.selectable_label(info.initial, "init").clicked() {
                            toggle = Some((*state, true));
                        }
                        if ui.selectable_label(info.marked, "marked").clicked() {
                            toggle = Some((*state, false));
                        }
                    });
                }
            });
        if let Some((state, initial)) = toggle {
            self.toggle_flag(state, initial);
        }
        ui.horizontal(|ui| {
            let edit = ui.text_edit_singleline(&mut self.new_state_name);
            let enter = edit.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter));
            if ui.button("➕ State").clicked() || enter {
                self.add_state();
            }
        });

        ui.separator();
        ui.label("Events");
        let events: Vec<(u32, String)> = self
            .model
            .events()
            .map(|(id, name)| (id, name.to_string()))
            .collect();
        let mut chosen = self.model.default_event;
        for (id, name) in &events {
            ui.radio_value(&mut chosen, Some(*id), name);
        }
        self.model.default_event = chosen;
        ui.horizontal(|ui| {
            ui.text_edit_singleline(&mut self.new_event_name);
            if ui.button("➕ Event").clicked() {
                self.add_event();
            }
        });
        ui.small("Shift-drag from a state to draw a transition with the chosen event.");

        ui.separator();
        self.edge_mode_panel(ui);
        if ui.button("🗑 Delete selection").clicked() {
            self.delete_selection();
        }

        ui.separator();
        let scene = self.diagram.scene();
        ui.label(format!(
            "{} states, {} transitions drawn",
            scene.node_count(),
            scene.edge_count()
        ));
        if !scene.is_consistent() {
            ui.colored_label(Color32::YELLOW, "⚠ Drawing out of step with the automaton");
            if ui.button("Repair").clicked() {
                self.notify(ElementDelta::All);
            }
        }
    }

    fn canvas(&mut self, ctx: &egui::Context, ui: &mut egui::Ui) {
        let (response, painter) = ui.allocate_painter(ui.available_size(), egui::Sense::click_and_drag());
        let rect = response.rect;

        let scroll_delta = ctx.input(|i| i.raw_scroll_delta);
        if response.hovered() && scroll_delta.y != 0.0 {
            self.zoom = (self.zoom + scroll_delta.y * 0.001).clamp(0.3, 3.0);
        }

        self.handle_pointer(ctx, &response, rect);
        self.diagram.scene_mut().flush_pending_update();

        let visible = Rect::from_two_pos(self.to_scene(rect, rect.min), self.to_scene(rect, rect.max));
        self.diagram.scene_mut().set_viewport(visible);

        painter.rect_filled(rect, 0.0, Color32::from_rgb(25, 28, 32));
        draw_grid(&painter, rect, self.zoom, self.pan_offset);

        let mut surface = PainterSurface {
            painter: &painter,
            offset: rect.center().to_vec2() + self.pan_offset,
            zoom: self.zoom,
        };
        self.diagram.scene().render(&self.model, &mut surface);

        if let Gesture::Select { from, to, .. } = self.gesture {
            let band = Rect::from_two_pos(self.to_screen(rect, from), self.to_screen(rect, to));
            painter.rect_stroke(band, 0.0, Stroke::new(1.0, Color32::from_rgb(100, 160, 220)));
        }
    }
}

impl eframe::App for EditorApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.poll_layout(ctx);
        egui::TopBottomPanel::top("menu_bar").show(ctx, |ui| {
            egui::menu::bar(ui, |ui| {
                ui.menu_button("File", |ui| {
                    if ui.button("➕ New").clicked() {
                        self.new_document();
                        ui.close_menu();
                    }
                    ui.separator();
                    if ui.button("📂 Open...").clicked() {
                        if let Some(path) = rfd::FileDialog::new()
                            .add_filter("Representation", &["rep", "txt"])
                            .pick_file()
                        {
                            self.open(path);
                        }
                        ui.close_menu();
                    }
                    if ui.button("💾 Save").clicked() {
                        let path = self.path.clone().or_else(|| {
                            rfd::FileDialog::new()
                                .add_filter("Representation", &["rep"])
                                .save_file()
                        });
                        if let Some(path) = path {
                            self.save(path);
                        }
                        ui.close_menu();
                    }
                    if ui.button("💾 Save As...").clicked() {
                        if let Some(path) = rfd::FileDialog::new()
                            .add_filter("Representation", &["rep"])
                            .save_file()
                        {
                            self.save(path);
                        }
                        ui.close_menu();
                    }
                    ui.separator();
                    if ui.button("Quit").clicked() {
                        ctx.send_viewport_cmd(egui::ViewportCommand::Close);
                    }
                });
                ui.menu_button("Edit", |ui| {
                    if ui
                        .add_enabled(self.diagram.can_undo(), egui::Button::new("↶ Undo"))
                        .clicked()
                    {
                        self.diagram.undo(&self.model);
                        ui.close_menu();
                    }
                    if ui
                        .add_enabled(self.diagram.can_redo(), egui::Button::new("↷ Redo"))
                        .clicked()
                    {
                        self.diagram.redo(&self.model);
                        ui.close_menu();
                    }
                    ui.separator();
                    if ui.button("Select All").clicked() {
                        self.diagram.scene_mut().select_all();
                        ui.close_menu();
                    }
                });
                ui.menu_button("Layout", |ui| {
                    if ui.button("▦ Grid").clicked() {
                        self.diagram.grid_construct(&self.model, true);
                        ui.close_menu();
                    }
                    if ui.button("Place missing items").clicked() {
                        self.diagram.grid_construct(&self.model, false);
                        ui.close_menu();
                    }
                    ui.separator();
                    let idle = self.layout.is_none();
                    if ui
                        .add_enabled(idle, egui::Button::new("Graphviz: states and transitions"))
                        .clicked()
                    {
                        self.run_layout(LayoutMode::Full);
                        ui.close_menu();
                    }
                    if ui
                        .add_enabled(idle, egui::Button::new("Graphviz: transitions only"))
                        .clicked()
                    {
                        self.run_layout(LayoutMode::EdgesOnly);
                        ui.close_menu();
                    }
                    if !idle && ui.button("⏹ Cancel layout").clicked() {
                        self.cancel_layout();
                        ui.close_menu();
                    }
                });
                ui.menu_button("View", |ui| {
                    if ui.button("Reset Zoom").clicked() {
                        self.zoom = 1.0;
                        self.pan_offset = Vec2::ZERO;
                        ui.close_menu();
                    }
                    if ui.button("Fit Drawing").clicked() {
                        let bounds = self.diagram.scene().bounding_rect();
                        if bounds.is_positive() {
                            self.zoom = 1.0;
                            self.pan_offset = -bounds.center().to_vec2();
                        }
                        ui.close_menu();
                    }
                });
            });
        });

        egui::TopBottomPanel::bottom("status_bar").show(ctx, |ui| {
            ui.horizontal(|ui| {
                if let Some(error) = &self.error_message {
                    ui.colored_label(Color32::RED, format!("❌ {}", error));
                } else if let Some(status) = &self.status {
                    ui.label(status);
                }
                ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                    ui.label(format!("zoom {:.0}%", self.zoom * 100.0));
                    ui.label(format!("undo {}/{}", self.pool.total(), self.pool.ceiling()));
                });
            });
        });

        egui::SidePanel::left("model_panel")
            .default_width(260.0)
            .show(ctx, |ui| self.model_panel(ui));

        egui::CentralPanel::default().show(ctx, |ui| self.canvas(ctx, ui));

        self.handle_keys(ctx);

        for event in self.diagram.scene_mut().take_events() {
            if let SceneEvent::ItemModified(element) = event {
                log::trace!("modified {:?}", element);
            }
        }
        let title = self.title();
        if title != self.window_title {
            ctx.send_viewport_cmd(egui::ViewportCommand::Title(title.clone()));
            self.window_title = title;
        }
    }
}

// ============================================================================
// PAINTING
// ============================================================================

struct PainterSurface<'a> {
    painter: &'a egui::Painter,
    offset: Vec2,
    zoom: f32,
}

impl PainterSurface<'_> {
    fn map(&self, p: Pos2) -> Pos2 {
        (p.to_vec2() * self.zoom).to_pos2() + self.offset
    }

    fn color(emphasis: Emphasis) -> Color32 {
        match emphasis {
            Emphasis::Normal => Color32::from_rgb(160, 175, 195),
            Emphasis::Selected => Color32::from_rgb(255, 220, 120),
            Emphasis::Highlighted => Color32::from_rgb(100, 220, 100),
            Emphasis::Muted => Color32::from_rgb(90, 100, 115),
            Emphasis::Pending => Color32::from_rgb(100, 160, 220),
        }
    }
}

impl Surface for PainterSurface<'_> {
    fn stroke_curve(&mut self, segments: &[CubicSegment], emphasis: Emphasis) {
        let stroke = Stroke::new(1.5 * self.zoom, Self::color(emphasis));
        for seg in segments {
            let points = seg.map(|p| self.map(p));
            self.painter.add(egui::epaint::CubicBezierShape::from_points_stroke(
                points,
                false,
                Color32::TRANSPARENT,
                stroke,
            ));
        }
    }

    fn polygon(&mut self, points: &[Pos2], filled: bool, emphasis: Emphasis) {
        let points: Vec<Pos2> = points.iter().map(|p| self.map(*p)).collect();
        let color = Self::color(emphasis);
        if filled && points.len() == 3 {
            self.painter
                .add(egui::Shape::convex_polygon(points, color, Stroke::NONE));
        } else if filled {
            self.painter.add(egui::Shape::convex_polygon(
                points,
                Color32::from_rgb(40, 55, 75),
                Stroke::new(2.0 * self.zoom, color),
            ));
        } else {
            self.painter
                .add(egui::Shape::closed_line(points, Stroke::new(1.0 * self.zoom, color)));
        }
    }

    fn line(&mut self, from: Pos2, to: Pos2, emphasis: Emphasis) {
        self.painter.line_segment(
            [self.map(from), self.map(to)],
            Stroke::new(1.5 * self.zoom, Self::color(emphasis)),
        );
    }

    fn text(&mut self, at: Pos2, text: &str, emphasis: Emphasis) {
        let color = match emphasis {
            Emphasis::Normal => Color32::WHITE,
            other => Self::color(other),
        };
        self.painter.text(
            self.map(at),
            egui::Align2::CENTER_CENTER,
            text,
            egui::FontId::proportional(12.0 * self.zoom),
            color,
        );
    }

    fn handle(&mut self, at: Pos2, fixed: bool) {
        let rect = Rect::from_center_size(self.map(at), Vec2::splat(7.0));
        if fixed {
            self.painter
                .rect_stroke(rect, 0.0, Stroke::new(1.0, Color32::GRAY));
        } else {
            self.painter.rect_filled(rect, 0.0, Color32::WHITE);
            self.painter
                .rect_stroke(rect, 0.0, Stroke::new(1.0, Color32::BLACK));
        }
    }
}

fn draw_grid(painter: &egui::Painter, rect: Rect, zoom: f32, offset: Vec2) {
    let grid_size = 50.0 * zoom;
    let grid_color = Color32::from_rgba_unmultiplied(100, 100, 100, 30);
    let origin = rect.center() + offset;

    let start_x = ((rect.left() - origin.x) / grid_size).floor() * grid_size + origin.x;
    let start_y = ((rect.top() - origin.y) / grid_size).floor() * grid_size + origin.y;

    let mut x = start_x;
    while x < rect.right() {
        painter.line_segment(
            [egui::pos2(x, rect.top()), egui::pos2(x, rect.bottom())],
            Stroke::new(1.0, grid_color),
        );
        x += grid_size;
    }

    let mut y = start_y;
    while y < rect.bottom() {
        painter.line_segment(
            [egui::pos2(rect.left(), y), egui::pos2(rect.right(), y)],
            Stroke::new(1.0, grid_color),
        );
        y += grid_size;
    }
}

/// Starting document: a small two-event cycle.
fn sample_automaton() -> Automaton {
    let mut a = Automaton::new("Untitled");
    let idle = a.add_state("idle");
    let busy = a.add_state("busy");
    let done = a.add_state("done");
    let start = a.add_event("start");
    let finish = a.add_event("finish");
    let reset = a.add_event("reset");
    a.add_transition(TransKey::new(idle, start, busy));
    a.add_transition(TransKey::new(busy, finish, done));
    a.add_transition(TransKey::new(done, reset, idle));
    a.add_transition(TransKey::new(busy, start, busy));
    a.set_initial(idle, true);
    a.set_marked(done, true);
    a.default_event = Some(start);
    a
}
