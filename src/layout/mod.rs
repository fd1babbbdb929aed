//! External layout
//! Round trip through Graphviz: write a dot graph, run the tool, read `-Tplain` back
//!
//! Two modes: [`LayoutMode::Full`] lets `dot` place the states and route the edges;
//! [`LayoutMode::EdgesOnly`] pins every state at its current position and runs `neato -n` to
//! route the edges only. A layout is applied only when the tool exits cleanly and every
//! record of its output resolves; otherwise the scene is left as it was.

use std::fmt::Write as _;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use egui::{Pos2, Vec2};
use pest::Parser;
use pest_derive::Parser;
use thiserror::Error;

use crate::config::{LayoutConfig, RankDir};
use crate::fsm::{AutomatonModel, StateId, TransKey};
use crate::item::edge::{self, EditMode};
use crate::item::node;
use crate::scene::Scene;

#[cfg(test)]
mod tests;

/// Scene units per Graphviz inch, used in both directions.
pub const UNITS_PER_INCH: f32 = 100.0;

#[derive(Parser)]
#[grammar = "layout/plain.pest"]
pub struct PlainParser;

#[derive(Error, Debug)]
pub enum LayoutError {
    #[error("Failed to spawn layout program '{program}': {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Layout I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Layout program exited with {code:?}: {stderr}")]
    Exit { code: Option<i32>, stderr: String },
    #[error("Layout output parse error: {0}")]
    Grammar(#[from] pest::error::Error<Rule>),
    #[error("Invalid layout output at line {line}: {message}")]
    Parse { line: usize, message: String },
    #[error("Layout output does not cover {0}")]
    Unresolved(String),
    #[error("Layout cancelled")]
    Cancelled,
    #[error("Layout timed out after {0:?}")]
    Timeout(Duration),
}

pub type LayoutOutcome<T> = Result<T, LayoutError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutMode {
    /// Place states and route edges
    Full,
    /// Keep state positions, route edges
    EdgesOnly,
}

fn to_inches(p: Pos2) -> (f32, f32) {
    (p.x / UNITS_PER_INCH, -p.y / UNITS_PER_INCH)
}

fn from_inches(x: f32, y: f32) -> Pos2 {
    Pos2::new(x * UNITS_PER_INCH, -y * UNITS_PER_INCH)
}

fn quote(text: &str) -> String {
    format!("\"{}\"", text.replace('\\', "\\\\").replace('"', "\\\""))
}

fn state_name(id: StateId) -> String {
    format!("s{}", id)
}

fn initial_name(id: StateId) -> String {
    format!("i{}", id)
}

// ============================================================================
// DOT OUTPUT
// ============================================================================

/// Describe the scene's states and transitions as a dot graph.
pub fn write_dot(
    scene: &Scene,
    model: &dyn AutomatonModel,
    mode: LayoutMode,
    rankdir: RankDir,
) -> String {
    let rankdir = match rankdir {
        RankDir::LR => "LR",
        RankDir::TB => "TB",
    };
    let mut out = String::from("digraph statecanvas {\n");
    let _ = writeln!(out, "  graph [rankdir={}, nodesep=0.5, ranksep=0.6, splines=true];", rankdir);
    out.push_str("  node [shape=ellipse, fixedsize=true, fontsize=10];\n");
    out.push_str("  edge [fontsize=10, arrowsize=0.6];\n");

    let mut states = model.states();
    states.sort_unstable();
    for state in states {
        let Some(item) = scene.node(state) else {
            continue;
        };
        let r = node::radius(item.base());
        let label = model.state_name(state).unwrap_or_default();
        let shape = if model.is_marked(state) {
            "doublecircle"
        } else {
            "ellipse"
        };
        let _ = write!(
            out,
            "  {} [label={}, shape={}, width={}, height={}",
            state_name(state),
            quote(&label),
            shape,
            2.0 * r.x / UNITS_PER_INCH,
            2.0 * r.y / UNITS_PER_INCH
        );
        if mode == LayoutMode::EdgesOnly {
            let (x, y) = to_inches(item.origin());
            let _ = write!(out, ", pos=\"{},{}!\"", x, y);
        }
        out.push_str("];\n");

        if model.is_initial(state) {
            let _ = write!(out, "  {} [shape=point, style=invis", initial_name(state));
            if mode == LayoutMode::EdgesOnly {
                let source = item.origin() + item.base()[node::INIT_SOURCE].to_vec2();
                let (x, y) = to_inches(source);
                let _ = write!(out, ", pos=\"{},{}!\"", x, y);
            }
            out.push_str("];\n");
            let _ = writeln!(out, "  {} -> {};", initial_name(state), state_name(state));
        }
    }

    for key in model.transitions() {
        if scene.edge(&key).is_none() {
            continue;
        }
        let label = model.event_name(key.event).unwrap_or_default();
        let _ = writeln!(
            out,
            "  {} -> {} [label={}];",
            state_name(key.source),
            state_name(key.target),
            quote(&label)
        );
    }
    out.push_str("}\n");
    out
}

// ============================================================================
// PLAIN INPUT
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct PlainNode {
    pub name: String,
    /// Center in scene units
    pub center: Pos2,
    /// Full extent in scene units
    pub size: Vec2,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlainEdge {
    pub tail: String,
    pub head: String,
    /// Bézier control points in scene units, `3k + 1` of them
    pub points: Vec<Pos2>,
    pub label: Option<(String, Pos2)>,
}

/// Parsed `-Tplain` output.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PlainLayout {
    pub size: Vec2,
    pub nodes: Vec<PlainNode>,
    pub edges: Vec<PlainEdge>,
}

struct Record<'a> {
    line: usize,
    keyword: &'a str,
    fields: Vec<String>,
}

impl Record<'_> {
    fn error(&self, message: impl Into<String>) -> LayoutError {
        LayoutError::Parse {
            line: self.line,
            message: message.into(),
        }
    }

    fn field(&self, index: usize) -> LayoutOutcome<&str> {
        self.fields
            .get(index)
            .map(String::as_str)
            .ok_or_else(|| self.error(format!("'{}' record is missing field {}", self.keyword, index + 1)))
    }

    fn number(&self, index: usize) -> LayoutOutcome<f32> {
        let text = self.field(index)?;
        text.parse()
            .map_err(|_| self.error(format!("invalid number '{}'", text)))
    }
}

fn unquote(text: &str) -> String {
    match text.strip_prefix('"').and_then(|t| t.strip_suffix('"')) {
        Some(inner) => {
            let mut out = String::with_capacity(inner.len());
            let mut chars = inner.chars();
            while let Some(c) = chars.next() {
                if c == '\\' {
                    if let Some(next) = chars.next() {
                        if next != '\n' {
                            out.push(next);
                        }
                    }
                } else {
                    out.push(c);
                }
            }
            out
        }
        None => text.to_string(),
    }
}

pub fn parse_plain(source: &str) -> LayoutOutcome<PlainLayout> {
    let mut layout = PlainLayout::default();
    let mut stopped = false;
    let pairs = PlainParser::parse(Rule::plain, source)?;
    for pair in pairs.flatten().filter(|p| p.as_rule() == Rule::record) {
        let line = pair.as_span().start_pos().line_col().0;
        let mut inner = pair.into_inner();
        let Some(keyword) = inner.next() else {
            continue;
        };
        let record = Record {
            line,
            keyword: keyword.as_str(),
            fields: inner.map(|f| unquote(f.as_str())).collect(),
        };
        if stopped {
            return Err(record.error("record after 'stop'"));
        }
        match record.keyword {
            "graph" => {
                layout.size = Vec2::new(record.number(1)?, record.number(2)?) * UNITS_PER_INCH;
            }
            "node" => layout.nodes.push(PlainNode {
                name: record.field(0)?.to_string(),
                center: from_inches(record.number(1)?, record.number(2)?),
                size: Vec2::new(record.number(3)?, record.number(4)?) * UNITS_PER_INCH,
            }),
            "edge" => layout.edges.push(parse_edge(&record)?),
            "stop" => stopped = true,
            other => return Err(record.error(format!("unknown record '{}'", other))),
        }
    }
    if !stopped {
        return Err(LayoutError::Parse {
            line: source.lines().count(),
            message: "missing 'stop' record".to_string(),
        });
    }
    Ok(layout)
}

fn parse_edge(record: &Record<'_>) -> LayoutOutcome<PlainEdge> {
    let tail = record.field(0)?.to_string();
    let head = record.field(1)?.to_string();
    let n: usize = record
        .field(2)?
        .parse()
        .map_err(|_| record.error("invalid point count"))?;
    if n < 4 || (n - 1) % 3 != 0 {
        return Err(record.error(format!("{} control points do not form a Bézier chain", n)));
    }
    let points = (0..n)
        .map(|i| Ok(from_inches(record.number(3 + 2 * i)?, record.number(4 + 2 * i)?)))
        .collect::<LayoutOutcome<Vec<Pos2>>>()?;
    // remaining fields: [label xl yl] style color
    let rest = 3 + 2 * n;
    let label = if record.fields.len() >= rest + 5 {
        Some((
            record.field(rest)?.to_string(),
            from_inches(record.number(rest + 1)?, record.number(rest + 2)?),
        ))
    } else {
        None
    };
    Ok(PlainEdge {
        tail,
        head,
        points,
        label,
    })
}

// ============================================================================
// RUNNING THE TOOL
// ============================================================================

/// Runs the layout program on a temporary input file.
#[derive(Debug, Clone)]
pub struct LayoutRunner {
    pub program: PathBuf,
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl LayoutRunner {
    pub fn from_config(config: &LayoutConfig) -> Self {
        Self {
            program: config.program_path(),
            timeout: Duration::from_millis(config.timeout_ms),
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
        }
    }

    pub fn args(mode: LayoutMode) -> &'static [&'static str] {
        match mode {
            LayoutMode::Full => &["-Tplain"],
            LayoutMode::EdgesOnly => &["-Kneato", "-n", "-s1", "-Tplain"],
        }
    }

    /// Run the tool on `source` and return its standard output.
    ///
    /// `poll` is called between checks on the child; returning `true` cancels the run. The
    /// child is killed on cancellation and on timeout.
    pub fn run(
        &self,
        source: &str,
        mode: LayoutMode,
        poll: &mut dyn FnMut() -> bool,
    ) -> LayoutOutcome<String> {
        let mut input = tempfile::Builder::new()
            .prefix("statecanvas-")
            .suffix(".dot")
            .tempfile()?;
        input.write_all(source.as_bytes())?;
        input.flush()?;

        log::info!(
            "running {} {} on {}",
            self.program.display(),
            Self::args(mode).join(" "),
            input.path().display()
        );
        let mut child = Command::new(&self.program)
            .args(Self::args(mode))
            .arg(input.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| LayoutError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let started = Instant::now();
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if poll() {
                log::info!("layout cancelled");
                kill(&mut child);
                return Err(LayoutError::Cancelled);
            }
            if started.elapsed() >= self.timeout {
                log::warn!("layout timed out after {:?}", self.timeout);
                kill(&mut child);
                return Err(LayoutError::Timeout(self.timeout));
            }
            thread::sleep(self.poll_interval);
        };

        let out = join(stdout);
        if !status.success() {
            return Err(LayoutError::Exit {
                code: status.code(),
                stderr: join(stderr).trim().to_string(),
            });
        }
        Ok(out)
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<thread::JoinHandle<String>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = String::new();
            let _ = pipe.read_to_string(&mut buf);
            buf
        })
    })
}

fn join(handle: Option<thread::JoinHandle<String>>) -> String {
    handle
        .map(|h| h.join().unwrap_or_default())
        .unwrap_or_default()
}

fn kill(child: &mut Child) {
    if let Err(e) = child.kill() {
        log::debug!("kill failed: {}", e);
    }
    let _ = child.wait();
}

// ============================================================================
// APPLYING A LAYOUT
// ============================================================================

/// Geometry resolved against the scene, ready to apply.
#[derive(Debug, Default)]
struct Placement {
    nodes: Vec<(StateId, Pos2)>,
    initial_sources: Vec<(StateId, Pos2)>,
    edges: Vec<(TransKey, Vec<Pos2>, Option<Pos2>)>,
}

fn parse_state_name(name: &str, prefix: char) -> Option<StateId> {
    name.strip_prefix(prefix)?.parse().ok()
}

fn resolve(
    layout: &PlainLayout,
    scene: &Scene,
    model: &dyn AutomatonModel,
    mode: LayoutMode,
) -> LayoutOutcome<Placement> {
    let mut placement = Placement::default();
    for n in &layout.nodes {
        if let Some(state) = parse_state_name(&n.name, 's') {
            if scene.node(state).is_some() {
                placement.nodes.push((state, n.center));
            }
        } else if let Some(state) = parse_state_name(&n.name, 'i') {
            placement.initial_sources.push((state, n.center));
        }
    }
    if mode == LayoutMode::Full {
        for state in model.states() {
            if scene.node(state).is_some() && !placement.nodes.iter().any(|(s, _)| *s == state) {
                return Err(LayoutError::Unresolved(format!("state {}", state)));
            }
        }
    } else {
        placement.nodes.clear();
        placement.initial_sources.clear();
    }

    for e in &layout.edges {
        let (Some(source), Some(target)) = (
            parse_state_name(&e.tail, 's'),
            parse_state_name(&e.head, 's'),
        ) else {
            continue;
        };
        let Some((label, label_pos)) = &e.label else {
            return Err(LayoutError::Unresolved(format!("unlabelled edge {} -> {}", e.tail, e.head)));
        };
        let Some(event) = model.event_index(label) else {
            return Err(LayoutError::Unresolved(format!("event '{}'", label)));
        };
        let key = TransKey::new(source, event, target);
        if scene.edge(&key).is_none() {
            return Err(LayoutError::Unresolved(format!("transition {:?}", key)));
        }
        placement.edges.push((key, e.points.clone(), Some(*label_pos)));
    }
    for key in model.transitions() {
        if scene.edge(&key).is_some() && !placement.edges.iter().any(|(k, _, _)| *k == key) {
            return Err(LayoutError::Unresolved(format!("transition {:?}", key)));
        }
    }
    Ok(placement)
}

/// Edge base points for a Bézier chain in scene coordinates.
fn chain_base(points: &[Pos2], source: Pos2, target: Pos2, label: Option<Pos2>, label_offset: f32) -> Vec<Pos2> {
    let offset = -source.to_vec2();
    let mut base = Vec::with_capacity(points.len() + 3);
    base.push(Pos2::ZERO);
    base.push(Pos2::ZERO);
    base.extend(points.iter().map(|p| *p + offset));
    base.push(target + offset);
    base[edge::LABEL] = match label {
        Some(l) => (l + offset - edge::midpoint(&base)).to_pos2(),
        None => Pos2::new(0.0, -label_offset),
    };
    base
}

impl Scene {
    /// Run the external layout tool and apply its result. On any failure the scene is left
    /// untouched.
    pub fn layout_external(
        &mut self,
        model: &dyn AutomatonModel,
        mode: LayoutMode,
        poll: &mut dyn FnMut() -> bool,
    ) -> LayoutOutcome<()> {
        let config = self.config().layout.clone();
        let source = write_dot(self, model, mode, config.rankdir);
        let output = LayoutRunner::from_config(&config).run(&source, mode, poll)?;
        self.apply_plain(model, mode, &output)
    }

    /// Apply `-Tplain` output, all or nothing.
    pub fn apply_plain(
        &mut self,
        model: &dyn AutomatonModel,
        mode: LayoutMode,
        output: &str,
    ) -> LayoutOutcome<()> {
        let layout = parse_plain(output)?;
        let placement = resolve(&layout, self, model, mode)?;

        for (state, center) in &placement.nodes {
            self.set_node_origin(*state, *center);
        }
        let label_offset = self.config().label_offset;
        for (state, source) in &placement.initial_sources {
            let origin = self.node(*state).map(|n| n.origin());
            if let Some(origin) = origin {
                self.set_initial_source(*state, *source - origin.to_vec2());
            }
        }
        for (key, points, label) in &placement.edges {
            let (Some(src), Some(tgt)) = (
                self.node(key.source).map(|n| n.origin()),
                self.node(key.target).map(|n| n.origin()),
            ) else {
                continue;
            };
            let edit_mode = match self.edge(key).and_then(|e| e.as_edge()).map(|e| e.mode) {
                Some(EditMode::Muted) => EditMode::Muted,
                _ => EditMode::Free,
            };
            let base = chain_base(points, src, tgt, *label, label_offset);
            self.set_edge_geometry(key, edit_mode, base);
        }
        self.mark_all_modified();
        self.flush_pending_update();
        log::info!(
            "applied layout: {} states, {} edges",
            placement.nodes.len(),
            placement.edges.len()
        );
        Ok(())
    }
}
