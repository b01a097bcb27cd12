//! Canvas side of the dashboard: grid projection and the reconciler that
//! keeps it bound to the layout manager.

pub mod grid;
pub mod reconciler;

pub use grid::{derive_grid_items, materialize, GridItem, MaterializedComponent};
pub use reconciler::{
    classify_empty, BindingState, CanvasReconciler, EmptyListKind, InteractionOutcome,
    ReconcileOutcome,
};
