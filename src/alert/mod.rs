//! Alert engine: rule variants, evaluation, lifecycle, persistence.

/// Evaluation, action invocation and lifecycle.
pub mod engine;
/// Alert documents and rule variants.
pub mod rules;
/// Typed alert persistence.
pub mod store;

pub use engine::{ActionPolicy, AlertEngine, AlertEngineBuilder, EngineConfig, Lifecycle};
pub use rules::{Alert, AlertAction, AlertKind, AlertRule};
pub use store::{AlertStore, LoadedAlert};
