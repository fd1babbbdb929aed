//! Unit tests for the persisted representation

use egui::pos2;

use crate::config::EngineConfig;
use crate::fsm::{Automaton, AutomatonModel, TransKey};
use crate::item::edge::{self, EditMode};
use crate::item::node;
use crate::persist::{parse_representation, write_representation, PersistError, TransRecord};
use crate::scene::Scene;

const SAMPLE: &str = r#"
<Representation>
<States>
<State> 1 50 50 <Points> 0 0 20 20 -50 0 -20 0 </Points> </State>
<State> 2 150.5 -50 <Points> 0 0 25 15 -60 0 -25 0 </Points> </State>
</States>
<TransRel>
<Trans> 1 "go" 2 Polygon 50 50 <Points> 0 -10 0 0 20 0 40 0 60 0 80 0 100 0 </Points> </Trans>
</TransRel>
</Representation>
"#;

fn model() -> Automaton {
    let mut a = Automaton::new("Test");
    a.add_state("s1");
    a.add_state("s2");
    let go = a.add_event("go");
    a.add_transition(TransKey::new(1, go, 2));
    a
}

#[test]
fn test_parse_sample() {
    let repr = parse_representation(SAMPLE).expect("should parse");
    assert_eq!(repr.states.len(), 2);
    assert_eq!(repr.states[1].id, 2);
    assert_eq!(repr.states[1].origin, pos2(150.5, -50.0));
    assert_eq!(repr.states[1].points.len(), 4);

    let t = &repr.transitions[0];
    assert_eq!((t.source, t.event.as_str(), t.target), (1, "go", 2));
    assert_eq!(t.mode, Some(EditMode::Polygon));
    assert_eq!(t.points.len(), 7);
}

#[test]
fn test_parse_empty_sections() {
    let repr = parse_representation("<Representation> </Representation>").expect("should parse");
    assert!(repr.states.is_empty());
    assert!(repr.transitions.is_empty());
}

#[test]
fn test_extra_fields_are_skipped() {
    let text = r#"<Representation><States>
        <State> 3 1 2 <Points> 0 0 10 10 </Points> legacy 7 <Style> "bold" 1 </Style> </State>
        </States><TransRel>
        <Trans> 3 "a b" 3 1 2 <Points> </Points> 0.5 </Trans>
        </TransRel></Representation>"#;
    let repr = parse_representation(text).expect("should parse");
    assert_eq!(repr.states[0].points, vec![pos2(0.0, 0.0), pos2(10.0, 10.0)]);
    assert_eq!(repr.transitions[0].event, "a b");
    assert_eq!(repr.transitions[0].mode, None);
    assert!(repr.transitions[0].points.is_empty());
}

#[test]
fn test_odd_coordinate_count_reads_as_empty() {
    let text = "<Representation><States><State> 1 0 0 <Points> 1 2 3 </Points> </State></States></Representation>";
    let repr = parse_representation(text).expect("should parse");
    assert!(repr.states[0].points.is_empty());
}

#[test]
fn test_grammar_error() {
    let result = parse_representation("<Representation><States><State> 1 </States>");
    assert!(matches!(result, Err(PersistError::Grammar(_))));
}

#[test]
fn test_state_index_overflow() {
    let text = "<Representation><States><State> 99999999999 0 0 <Points> </Points> </State></States></Representation>";
    assert!(matches!(
        parse_representation(text),
        Err(PersistError::Syntax { line: 1, .. })
    ));
}

#[test]
fn test_event_names_are_escaped() {
    let mut repr = parse_representation(SAMPLE).expect("should parse");
    repr.transitions.push(TransRecord {
        source: 1,
        event: r#"say "hi" \o/"#.to_string(),
        target: 1,
        mode: None,
        origin: pos2(0.0, 0.0),
        points: Vec::new(),
    });
    let again = parse_representation(&write_representation(&repr)).expect("should parse");
    assert_eq!(again, repr);
}

#[test]
fn test_float_text_round_trip() {
    let mut repr = parse_representation(SAMPLE).expect("should parse");
    repr.states[0].origin = pos2(0.1 + 0.2, -1.0 / 3.0);
    repr.states[0].points[1] = pos2(1e-7, 12345.678);
    let again = parse_representation(&write_representation(&repr)).expect("should parse");
    assert_eq!(
        again.states[0].origin.x.to_bits(),
        repr.states[0].origin.x.to_bits()
    );
    assert_eq!(again, repr);
}

#[test]
fn test_stand_in_automaton() {
    let mut repr = parse_representation(SAMPLE).expect("should parse");
    repr.transitions.push(TransRecord {
        source: 2,
        event: "go".to_string(),
        target: 7,
        mode: None,
        origin: pos2(0.0, 0.0),
        points: Vec::new(),
    });
    let a = repr.to_automaton("sample");
    assert_eq!(a.states(), vec![1, 2]);
    assert_eq!(a.state_name(2).as_deref(), Some("s2"));
    assert_eq!(a.transitions(), vec![TransKey::new(1, 1, 2)]);

    let mut scene = Scene::new(EngineConfig::default());
    scene.read(&a, SAMPLE).expect("should read");
    assert!(scene.is_consistent());
}

#[test]
fn test_scene_read_resolves_and_drops() {
    let model = model();
    let text = SAMPLE.replace(
        "</TransRel>",
        "<Trans> 1 \"missing\" 2 50 50 <Points> </Points> </Trans>\n</TransRel>",
    );
    let text = text.replace(
        "</States>",
        "<State> 9 0 0 <Points> 0 0 20 20 -50 0 -20 0 </Points> </State>\n</States>",
    );
    let mut scene = Scene::new(EngineConfig::default());
    scene.read(&model, &text).expect("should read");
    assert_eq!(scene.node_count(), 2);
    assert_eq!(scene.edge_count(), 1);
    assert!(scene.is_consistent());
    assert!(!scene.is_modified());
    let e = scene.edge(&TransKey::new(1, 1, 2)).expect("edge");
    assert_eq!(e.as_edge().map(|e| e.mode), Some(EditMode::Polygon));
}

#[test]
fn test_scene_read_keeps_first_of_duplicate_states() {
    let model = model();
    let text = SAMPLE.replace(
        "</States>",
        "<State> 1 400 400 <Points> 0 0 30 30 -50 0 -30 0 </Points> </State>\n</States>",
    );
    let mut scene = Scene::new(EngineConfig::default());
    scene.read(&model, &text).expect("should read");
    assert_eq!(scene.node_count(), 2);
    assert_eq!(scene.len(), scene.node_count() + scene.edge_count());
    assert_eq!(scene.node(1).map(|n| n.origin()), Some(pos2(50.0, 50.0)));
    assert!(scene.is_consistent());
}

#[test]
fn test_scene_read_short_lists_get_defaults() {
    let model = model();
    let text = r#"<Representation><States>
        <State> 1 0 0 <Points> 0 0 </Points> </State>
        <State> 2 200 0 <Points> </Points> </State>
        </States><TransRel>
        <Trans> 1 "go" 2 0 0 <Points> 0 0 1 1 </Points> </Trans>
        </TransRel></Representation>"#;
    let mut scene = Scene::new(EngineConfig::default());
    scene.read(&model, text).expect("should read");
    let radius = EngineConfig::default().default_radius();
    assert_eq!(scene.node(1).map(|n| n.base().to_vec()), Some(node::default_base(radius)));
    let e = scene.edge(&TransKey::new(1, 1, 2)).expect("edge");
    assert_eq!(e.base().len(), edge::MIN_POINTS);
    assert_eq!(e.as_edge().map(|e| e.mode), Some(EditMode::Line));
}

#[test]
fn test_scene_read_failure_clears() {
    let model = model();
    let mut scene = Scene::new(EngineConfig::default());
    scene.grid_construct(&model, true);
    assert!(scene.read(&model, "<Representation>").is_err());
    assert!(scene.is_empty());
}

#[test]
fn test_scene_write_read_is_bit_exact() {
    let mut model = model();
    model.set_initial(1, true);
    let loop_key = TransKey::new(2, 1, 2);
    model.add_transition(loop_key);
    let mut scene = Scene::new(EngineConfig::default());
    scene.grid_construct(&model, true);
    scene.flush_pending_update();
    let e = scene.edge_id(&TransKey::new(1, 1, 2)).expect("edge");
    scene.set_edge_mode(e, EditMode::Spline);
    scene.insert_handle(e, 0, pos2(100.0, 90.0));
    scene.flush_pending_update();

    let before = scene.snapshot();
    let text = scene.write(&model);
    scene.clear();
    scene.read(&model, &text).expect("should read");
    let after = scene.snapshot();
    assert_eq!(after, before);
    for (a, b) in after.edges.iter().zip(before.edges.iter()) {
        for (p, q) in a.base.iter().zip(b.base.iter()) {
            assert_eq!((p.x.to_bits(), p.y.to_bits()), (q.x.to_bits(), q.y.to_bits()));
        }
    }
}
