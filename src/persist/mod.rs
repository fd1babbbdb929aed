//! Persisted representation
//! Reads and writes the per-diagram text format
//!
//! ```text
//! <Representation>
//! <States>
//! <State> 1 50 50 <Points> 0 0 20 20 -50 0 -20 0 </Points> </State>
//! </States>
//! <TransRel>
//! <Trans> 1 "go" 2 Line 50 50 <Points> 0 -10 0 0 20 0 ... </Points> </Trans>
//! </TransRel>
//! </Representation>
//! ```
//!
//! Reading is permissive: unknown trailing tokens and nested sections in an entry are skipped,
//! and point lists that cannot describe the item fall back to its default geometry. Writing
//! emits only the fields above.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use egui::Pos2;
use pest::Parser;
use pest_derive::Parser;
use thiserror::Error;

use crate::fsm::{Automaton, AutomatonModel, StateId, TransKey};
use crate::item::edge::EditMode;
use crate::scene::{EdgeRecord, NodeRecord, Scene, Snapshot};

#[cfg(test)]
mod tests;

#[derive(Parser)]
#[grammar = "persist/representation.pest"]
pub struct RepresentationParser;

#[derive(Error, Debug)]
pub enum PersistError {
    #[error("Representation parse error: {0}")]
    Grammar(#[from] pest::error::Error<Rule>),
    #[error("Invalid representation at line {line}: {message}")]
    Syntax { line: usize, message: String },
    #[error("Could not access '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type PersistResult<T> = Result<T, PersistError>;

type Pair<'a> = pest::iterators::Pair<'a, Rule>;

#[derive(Debug, Clone, PartialEq)]
pub struct StateRecord {
    pub id: StateId,
    pub origin: Pos2,
    pub points: Vec<Pos2>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransRecord {
    pub source: StateId,
    pub event: String,
    pub target: StateId,
    pub mode: Option<EditMode>,
    pub origin: Pos2,
    pub points: Vec<Pos2>,
}

/// Parsed file contents, before any model lookup.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Representation {
    pub states: Vec<StateRecord>,
    pub transitions: Vec<TransRecord>,
}

// ============================================================================
// READING
// ============================================================================

pub fn parse_representation(source: &str) -> PersistResult<Representation> {
    let mut repr = Representation::default();
    let pairs = RepresentationParser::parse(Rule::representation, source)?;
    for pair in pairs.flatten() {
        match pair.as_rule() {
            Rule::state => repr.states.push(parse_state(pair)?),
            Rule::trans => repr.transitions.push(parse_trans(pair)?),
            _ => {}
        }
    }
    Ok(repr)
}

fn syntax(pair: &Pair<'_>, message: impl Into<String>) -> PersistError {
    PersistError::Syntax {
        line: pair.as_span().start_pos().line_col().0,
        message: message.into(),
    }
}

fn next_pair<'a>(
    inner: &mut pest::iterators::Pairs<'a, Rule>,
    parent: &Pair<'a>,
    what: &str,
) -> PersistResult<Pair<'a>> {
    inner
        .next()
        .ok_or_else(|| syntax(parent, format!("missing {}", what)))
}

fn parse_id(pair: &Pair<'_>) -> PersistResult<StateId> {
    pair.as_str()
        .parse()
        .map_err(|_| syntax(pair, format!("state index '{}' out of range", pair.as_str())))
}

fn parse_number(pair: &Pair<'_>) -> PersistResult<f32> {
    pair.as_str()
        .parse()
        .map_err(|_| syntax(pair, format!("invalid number '{}'", pair.as_str())))
}

fn parse_origin<'a>(
    inner: &mut pest::iterators::Pairs<'a, Rule>,
    parent: &Pair<'a>,
) -> PersistResult<Pos2> {
    let x = parse_number(&next_pair(inner, parent, "x")?)?;
    let y = parse_number(&next_pair(inner, parent, "y")?)?;
    Ok(Pos2::new(x, y))
}

/// A coordinate list with a dangling value is malformed and read as empty.
fn parse_points(pair: Pair<'_>) -> PersistResult<Vec<Pos2>> {
    let values = pair
        .clone()
        .into_inner()
        .map(|n| parse_number(&n))
        .collect::<PersistResult<Vec<f32>>>()?;
    if values.len() % 2 != 0 {
        log::debug!(
            "odd coordinate count at line {}",
            pair.as_span().start_pos().line_col().0
        );
        return Ok(Vec::new());
    }
    Ok(values
        .chunks_exact(2)
        .map(|c| Pos2::new(c[0], c[1]))
        .collect())
}

fn parse_state(pair: Pair<'_>) -> PersistResult<StateRecord> {
    let mut inner = pair.clone().into_inner();
    let id = parse_id(&next_pair(&mut inner, &pair, "state index")?)?;
    let origin = parse_origin(&mut inner, &pair)?;
    let points = parse_points(next_pair(&mut inner, &pair, "point list")?)?;
    Ok(StateRecord { id, origin, points })
}

fn unescape(pair: Pair<'_>) -> String {
    let mut out = String::new();
    for piece in pair.into_inner().flat_map(|inner| inner.into_inner()) {
        match piece.as_rule() {
            Rule::escaped => out.push_str(&piece.as_str()[1..]),
            _ => out.push_str(piece.as_str()),
        }
    }
    out
}

fn parse_trans(pair: Pair<'_>) -> PersistResult<TransRecord> {
    let mut inner = pair.clone().into_inner();
    let source = parse_id(&next_pair(&mut inner, &pair, "source index")?)?;
    let event = unescape(next_pair(&mut inner, &pair, "event")?);
    let target = parse_id(&next_pair(&mut inner, &pair, "target index")?)?;

    let mut next = next_pair(&mut inner, &pair, "origin")?;
    let mut mode = None;
    if next.as_rule() == Rule::mode {
        mode = EditMode::parse(next.as_str());
        next = next_pair(&mut inner, &pair, "origin")?;
    }
    let x = parse_number(&next)?;
    let y = parse_number(&next_pair(&mut inner, &pair, "y")?)?;
    let points = parse_points(next_pair(&mut inner, &pair, "point list")?)?;
    Ok(TransRecord {
        source,
        event,
        target,
        mode,
        origin: Pos2::new(x, y),
        points,
    })
}

// ============================================================================
// WRITING
// ============================================================================

fn write_points(out: &mut String, points: &[Pos2]) {
    out.push_str("<Points>");
    for p in points {
        let _ = write!(out, " {} {}", p.x, p.y);
    }
    out.push_str(" </Points>");
}

fn escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

pub fn write_representation(repr: &Representation) -> String {
    let mut out = String::from("<Representation>\n<States>\n");
    for s in &repr.states {
        let _ = write!(out, "<State> {} {} {} ", s.id, s.origin.x, s.origin.y);
        write_points(&mut out, &s.points);
        out.push_str(" </State>\n");
    }
    out.push_str("</States>\n<TransRel>\n");
    for t in &repr.transitions {
        let _ = write!(out, "<Trans> {} \"{}\" {} ", t.source, escape(&t.event), t.target);
        if let Some(mode) = t.mode {
            let _ = write!(out, "{} ", mode);
        }
        let _ = write!(out, "{} {} ", t.origin.x, t.origin.y);
        write_points(&mut out, &t.points);
        out.push_str(" </Trans>\n");
    }
    out.push_str("</TransRel>\n</Representation>\n");
    out
}

// ============================================================================
// MODEL RESOLUTION
// ============================================================================

impl Representation {
    /// Capture a scene snapshot, naming events through `model`. Edges whose event has no
    /// name cannot be read back and are left out.
    pub fn from_snapshot(snapshot: &Snapshot, model: &dyn AutomatonModel) -> Self {
        let states = snapshot
            .nodes
            .iter()
            .map(|n| StateRecord {
                id: n.state,
                origin: n.origin,
                points: n.base.clone(),
            })
            .collect();
        let transitions = snapshot
            .edges
            .iter()
            .filter_map(|e| {
                let Some(event) = model.event_name(e.key.event) else {
                    log::warn!("transition {:?} has no event name; not written", e.key);
                    return None;
                };
                Some(TransRecord {
                    source: e.key.source,
                    event,
                    target: e.key.target,
                    mode: Some(e.mode),
                    origin: e.origin,
                    points: e.base.clone(),
                })
            })
            .collect();
        Self {
            states,
            transitions,
        }
    }

    /// Resolve event names through `model`. Unknown events are dropped; a missing mode tag
    /// is filled by `default_mode`.
    pub fn to_snapshot(
        &self,
        model: &dyn AutomatonModel,
        default_mode: impl Fn(&TransKey) -> EditMode,
    ) -> Snapshot {
        let nodes = self
            .states
            .iter()
            .map(|s| NodeRecord {
                state: s.id,
                origin: s.origin,
                base: s.points.clone(),
            })
            .collect();
        let edges = self
            .transitions
            .iter()
            .filter_map(|t| {
                let Some(event) = model.event_index(&t.event) else {
                    log::debug!("dropping transition with unknown event '{}'", t.event);
                    return None;
                };
                let key = TransKey::new(t.source, event, t.target);
                Some(EdgeRecord {
                    key,
                    mode: t.mode.unwrap_or_else(|| default_mode(&key)),
                    origin: t.origin,
                    base: t.points.clone(),
                })
            })
            .collect();
        Snapshot { nodes, edges }
    }

    /// A stand-in automaton for a file opened without its owner: every listed state (named
    /// `s<id>`), every event symbol, and the transitions between listed states.
    pub fn to_automaton(&self, name: &str) -> Automaton {
        let mut automaton = Automaton::new(name);
        for s in &self.states {
            automaton.insert_state(s.id, format!("s{}", s.id));
        }
        for t in &self.transitions {
            let event = automaton.add_event(t.event.clone());
            if !automaton.add_transition(TransKey::new(t.source, event, t.target)) {
                log::debug!("skipping transition {} -> {} of unlisted state", t.source, t.target);
            }
        }
        automaton
    }
}

pub fn read_file(path: &Path) -> PersistResult<String> {
    fs::read_to_string(path).map_err(|source| PersistError::Io {
        path: path.to_path_buf(),
        source,
    })
}

pub fn write_file(path: &Path, text: &str) -> PersistResult<()> {
    fs::write(path, text).map_err(|source| PersistError::Io {
        path: path.to_path_buf(),
        source,
    })
}

impl Scene {
    /// Replace the scene with the contents of `source`. On a parse failure the scene is left
    /// empty.
    pub fn read(&mut self, model: &dyn AutomatonModel, source: &str) -> PersistResult<()> {
        let repr = match parse_representation(source) {
            Ok(repr) => repr,
            Err(e) => {
                log::warn!("could not read representation: {}", e);
                self.clear();
                return Err(e);
            }
        };
        let snapshot = repr.to_snapshot(model, |key| self.default_mode(key));
        self.restore(model, &snapshot);
        self.flush_pending_update();
        self.set_modified(false);
        log::info!(
            "read {} nodes and {} edges",
            self.node_count(),
            self.edge_count()
        );
        Ok(())
    }

    pub fn write(&self, model: &dyn AutomatonModel) -> String {
        write_representation(&Representation::from_snapshot(&self.snapshot(), model))
    }
}
