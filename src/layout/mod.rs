pub mod engine;
pub mod grid;
pub mod model;

pub use engine::{LayoutEngine, OverlayOutcome};
pub use model::{
    Breakpoint, GridLayout, LayoutState, Permissions, Placement, Position, Widget, WidgetDraft,
    WidgetPatch,
};
