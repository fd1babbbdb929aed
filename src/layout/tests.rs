//! Unit tests for the Graphviz round trip

use std::path::PathBuf;
use std::time::Duration;

use egui::pos2;

use crate::config::{EngineConfig, RankDir};
use crate::fsm::{Automaton, TransKey};
use crate::item::edge::{self, EditMode};
use crate::item::node;
use crate::layout::{parse_plain, write_dot, LayoutError, LayoutMode, LayoutRunner};
use crate::scene::Scene;

const PLAIN: &str = "graph 1 3.5 1.2
node s1 0.5 0.6 0.4 0.4 s1 solid ellipse black lightgrey
node s2 2.5 0.6 0.4 0.4 s2 solid doublecircle black lightgrey
node i1 0.05 0.6 0.05 0.05 \"\" invis point black lightgrey
edge i1 s1 4 0.05 0.6 0.1 0.6 0.2 0.6 0.3 0.6 solid black
edge s1 s2 4 0.7 0.6 1.2 0.7 1.8 0.7 2.3 0.6 go 1.5 0.8 solid black
stop
";

fn model() -> Automaton {
    let mut a = Automaton::new("Test");
    a.add_state("s1");
    a.add_state("s2");
    let go = a.add_event("go");
    a.add_transition(TransKey::new(1, go, 2));
    a.set_initial(1, true);
    a.set_marked(2, true);
    a
}

fn scene(model: &Automaton) -> Scene {
    let mut scene = Scene::new(EngineConfig::default());
    scene.grid_construct(model, true);
    scene.flush_pending_update();
    scene.set_modified(false);
    scene
}

fn close(a: egui::Pos2, b: egui::Pos2) -> bool {
    (a - b).length() < 1e-3
}

#[test]
fn test_dot_text_full() {
    let model = model();
    let scene = scene(&model);
    let dot = write_dot(&scene, &model, LayoutMode::Full, RankDir::LR);
    assert!(dot.starts_with("digraph"));
    assert!(dot.contains("rankdir=LR"));
    assert!(dot.contains("s1 -> s2 [label=\"go\"];"));
    assert!(dot.contains("i1 -> s1;"));
    assert!(dot.contains("shape=doublecircle"));
    assert!(!dot.contains("pos="));
}

#[test]
fn test_dot_text_pins_states_for_edge_routing() {
    let model = model();
    let scene = scene(&model);
    let dot = write_dot(&scene, &model, LayoutMode::EdgesOnly, RankDir::TB);
    // s1 sits at (50, 50), i.e. half an inch right and half an inch down
    assert!(dot.contains("pos=\"0.5,-0.5!\""), "{}", dot);
    assert!(dot.contains("rankdir=TB"));
}

#[test]
fn test_parse_plain_records() {
    let layout = parse_plain(PLAIN).expect("should parse");
    assert!(close(layout.size.to_pos2(), pos2(350.0, 120.0)));
    assert_eq!(layout.nodes.len(), 3);
    assert_eq!(layout.nodes[2].name, "i1");
    assert!(close(layout.nodes[0].center, pos2(50.0, -60.0)));
    assert_eq!(layout.edges.len(), 2);
    assert_eq!(layout.edges[0].label, None);
    let (label, at) = layout.edges[1].label.clone().expect("label");
    assert_eq!(label, "go");
    assert!(close(at, pos2(150.0, -80.0)));
    assert_eq!(layout.edges[1].points.len(), 4);
}

#[test]
fn test_parse_plain_rejects_broken_chain() {
    let text = "graph 1 1 1\nedge a b 3 0 0 1 1 2 2 solid black\nstop\n";
    assert!(matches!(parse_plain(text), Err(LayoutError::Parse { line: 2, .. })));
}

#[test]
fn test_parse_plain_requires_stop() {
    assert!(matches!(
        parse_plain("graph 1 1 1\n"),
        Err(LayoutError::Parse { .. })
    ));
}

#[test]
fn test_parse_plain_quoted_names() {
    let text = "graph 1 1 1\nnode \"a \\\"b\\\"\" 0 0 1 1 x solid ellipse black white\nstop\n";
    let layout = parse_plain(text).expect("should parse");
    assert_eq!(layout.nodes[0].name, "a \"b\"");
}

#[test]
fn test_apply_full_layout() {
    let model = model();
    let mut scene = scene(&model);
    scene
        .apply_plain(&model, LayoutMode::Full, PLAIN)
        .expect("should apply");

    let s1 = scene.node(1).expect("s1");
    assert!(close(s1.origin(), pos2(50.0, -60.0)));
    assert!(close(s1.base()[node::INIT_SOURCE], pos2(-45.0, 0.0)));
    assert!(close(scene.node(2).expect("s2").origin(), pos2(250.0, -60.0)));

    let e = scene.edge(&TransKey::new(1, 1, 2)).expect("edge");
    assert_eq!(e.as_edge().map(|e| e.mode), Some(EditMode::Free));
    assert_eq!(e.base().len(), edge::MIN_POINTS);
    assert!(close(e.origin(), s1.origin()));
    // reported label position relative to the imported chain's midpoint
    assert!(close(e.base()[edge::LABEL], pos2(0.0, -12.5)));
    assert!(scene.is_modified());
    assert!(!scene.has_pending_update());
}

#[test]
fn test_muted_edges_stay_muted() {
    let model = model();
    let mut scene = scene(&model);
    let id = scene.edge_id(&TransKey::new(1, 1, 2)).expect("edge");
    scene.set_edge_mode(id, EditMode::Muted);
    scene
        .apply_plain(&model, LayoutMode::Full, PLAIN)
        .expect("should apply");
    let e = scene.edge(&TransKey::new(1, 1, 2)).expect("edge");
    assert_eq!(e.as_edge().map(|e| e.mode), Some(EditMode::Muted));
}

#[test]
fn test_edges_only_keeps_states() {
    let model = model();
    let mut scene = scene(&model);
    let before = scene.node(1).expect("s1").origin();
    scene
        .apply_plain(&model, LayoutMode::EdgesOnly, PLAIN)
        .expect("should apply");
    assert_eq!(scene.node(1).expect("s1").origin(), before);
    let e = scene.edge(&TransKey::new(1, 1, 2)).expect("edge");
    assert_eq!(e.as_edge().map(|e| e.mode), Some(EditMode::Free));
}

#[test]
fn test_unresolved_layout_leaves_scene_untouched() {
    let model = model();
    let mut scene = scene(&model);
    let before = scene.snapshot();
    let missing_edge: String = PLAIN
        .lines()
        .filter(|l| !l.starts_with("edge s1"))
        .map(|l| format!("{}\n", l))
        .collect();
    assert!(matches!(
        scene.apply_plain(&model, LayoutMode::Full, &missing_edge),
        Err(LayoutError::Unresolved(_))
    ));
    let unknown_event = PLAIN.replace(" go ", " stop_it ");
    assert!(matches!(
        scene.apply_plain(&model, LayoutMode::Full, &unknown_event),
        Err(LayoutError::Unresolved(_))
    ));
    assert_eq!(scene.snapshot(), before);
    assert!(!scene.is_modified());
}

#[test]
fn test_runner_missing_program() {
    let runner = LayoutRunner {
        program: PathBuf::from("/nonexistent/statecanvas-dot"),
        timeout: Duration::from_secs(1),
        poll_interval: Duration::from_millis(5),
    };
    let result = runner.run("digraph {}", LayoutMode::Full, &mut || false);
    assert!(matches!(result, Err(LayoutError::Spawn { .. })));
}

#[cfg(unix)]
#[test]
fn test_runner_reports_failure_exit() {
    let runner = LayoutRunner {
        program: PathBuf::from("false"),
        timeout: Duration::from_secs(5),
        poll_interval: Duration::from_millis(5),
    };
    let result = runner.run("digraph {}", LayoutMode::Full, &mut || false);
    assert!(matches!(result, Err(LayoutError::Exit { .. })));
}

#[test]
fn test_runner_args() {
    assert_eq!(LayoutRunner::args(LayoutMode::Full), ["-Tplain"]);
    assert!(LayoutRunner::args(LayoutMode::EdgesOnly).contains(&"-n"));
}

#[cfg(unix)]
fn sleeper(dir: &tempfile::TempDir) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.path().join("slow-dot");
    std::fs::write(&path, "#!/bin/sh\nexec sleep 5\n").expect("write script");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
        .expect("make executable");
    path
}

#[cfg(unix)]
fn slow_scene(model: &Automaton, program: &std::path::Path, timeout_ms: u64) -> Scene {
    let mut config = EngineConfig::default();
    config.layout.program = program.display().to_string();
    config.layout.timeout_ms = timeout_ms;
    config.layout.poll_interval_ms = 5;
    let mut scene = Scene::new(config);
    scene.grid_construct(model, true);
    scene.flush_pending_update();
    scene.set_modified(false);
    scene
}

#[cfg(unix)]
#[test]
fn test_runner_cancel_kills_child() {
    let dir = tempfile::tempdir().expect("temp dir");
    let runner = LayoutRunner {
        program: sleeper(&dir),
        timeout: Duration::from_secs(30),
        poll_interval: Duration::from_millis(5),
    };
    let started = std::time::Instant::now();
    let mut polls = 0;
    let result = runner.run("digraph {}", LayoutMode::Full, &mut || {
        polls += 1;
        polls > 3
    });
    assert!(matches!(result, Err(LayoutError::Cancelled)));
    assert!(started.elapsed() < Duration::from_secs(4));
}

#[cfg(unix)]
#[test]
fn test_runner_timeout_kills_child() {
    let dir = tempfile::tempdir().expect("temp dir");
    let runner = LayoutRunner {
        program: sleeper(&dir),
        timeout: Duration::from_millis(100),
        poll_interval: Duration::from_millis(5),
    };
    let started = std::time::Instant::now();
    let result = runner.run("digraph {}", LayoutMode::Full, &mut || false);
    assert!(matches!(result, Err(LayoutError::Timeout(t)) if t == Duration::from_millis(100)));
    assert!(started.elapsed() < Duration::from_secs(4));
}

#[cfg(unix)]
#[test]
fn test_cancelled_or_timed_out_layout_leaves_scene_untouched() {
    let dir = tempfile::tempdir().expect("temp dir");
    let program = sleeper(&dir);
    let model = model();

    let mut scene = slow_scene(&model, &program, 30_000);
    let before = scene.snapshot();
    let result = scene.layout_external(&model, LayoutMode::Full, &mut || true);
    assert!(matches!(result, Err(LayoutError::Cancelled)));
    assert_eq!(scene.snapshot(), before);
    assert!(!scene.is_modified());

    let mut scene = slow_scene(&model, &program, 100);
    let before = scene.snapshot();
    let result = scene.layout_external(&model, LayoutMode::EdgesOnly, &mut || false);
    assert!(matches!(result, Err(LayoutError::Timeout(_))));
    assert_eq!(scene.snapshot(), before);
    assert!(!scene.is_modified());
}
