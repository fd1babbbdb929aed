//! statecanvas CLI - batch layout of persisted diagrams

use std::env;
use std::path::Path;
use std::process;

use statecanvas::config::EngineConfig;
use statecanvas::fsm::AutomatonModel;
use statecanvas::layout::LayoutMode;
use statecanvas::persist;
use statecanvas::scene::Scene;

fn usage() {
    println!("statecanvas CLI - diagram layout");
    println!("Usage: statecanvas-cli <file> [check|grid|dot|edges] [--config <file.json>]");
    println!();
    println!("  check   report what the file contains (default)");
    println!("  grid    re-place every item on a grid and print the result");
    println!("  dot     lay out states and transitions with Graphviz");
    println!("  edges   keep state positions, route transitions with Graphviz");
}

fn run(args: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let filename = &args[1];
    let mut command = "check";
    let mut config = EngineConfig::default();
    let mut rest = args[2..].iter();
    while let Some(arg) = rest.next() {
        match arg.as_str() {
            "--config" => {
                let path = rest.next().ok_or("--config needs a file")?;
                config = EngineConfig::load(Path::new(path))?;
            }
            other => command = other,
        }
    }

    let text = persist::read_file(Path::new(filename))?;
    let repr = persist::parse_representation(&text)?;
    let name = Path::new(filename)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "diagram".to_string());
    let model = repr.to_automaton(&name);
    let mut scene = Scene::new(config);
    scene.read(&model, &text)?;

    match command {
        "check" => {
            println!("✅ {}", filename);
            println!("  States: {}", scene.node_count());
            println!("  Transitions: {}", scene.edge_count());
            for key in model.transitions() {
                let event = model.event_name(key.event).unwrap_or_default();
                println!("    {} --> {} : {}", key.source, key.target, event);
            }
            let bounds = scene.bounding_rect();
            if bounds.is_positive() {
                println!("  Bounds: {:?} .. {:?}", bounds.min, bounds.max);
            }
            return Ok(());
        }
        "grid" => {
            scene.grid_construct(&model, true);
            scene.flush_pending_update();
        }
        "dot" | "edges" => {
            let mode = if command == "dot" {
                LayoutMode::Full
            } else {
                LayoutMode::EdgesOnly
            };
            scene.layout_external(&model, mode, &mut || false)?;
        }
        other => return Err(format!("unknown command '{}'", other).into()),
    }
    print!("{}", scene.write(&model));
    Ok(())
}

fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        usage();
        return;
    }
    if let Err(e) = run(&args) {
        eprintln!("❌ {}", e);
        process::exit(1);
    }
}
