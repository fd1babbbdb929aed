//! statecanvas - Interactive automaton diagrams
//! Editable state/transition drawings kept in step with an automaton, with Bézier transition
//! editing, node anchoring, undo and Graphviz layout

pub mod config;
pub mod document;
pub mod fsm;
pub mod geometry;
pub mod history;
pub mod item;
pub mod layout;
pub mod persist;
pub mod render;
pub mod scene;
pub mod spline;
pub mod style;

pub use config::EngineConfig;
pub use document::Diagram;
pub use fsm::{Automaton, AutomatonModel, EventId, StateId, TransKey};
pub use history::{EditHistory, HistoryPool};
pub use item::{EditMode, ElementRef, Item, ItemId};
pub use layout::{LayoutError, LayoutMode};
pub use persist::{parse_representation, PersistError};
pub use render::{Emphasis, Surface};
pub use scene::{ElementDelta, Scene, SceneEvent, Snapshot};
