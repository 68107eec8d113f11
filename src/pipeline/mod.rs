//! Event pipeline: change-feed consumption and per-event dispatch.

/// Change-feed polling and document routing.
pub mod consumer;
/// Per-event alert evaluation, actions and lifecycle.
pub mod dispatcher;

pub use consumer::{register_device_tokens, Change, ChangeBatch, ChangeFeedConsumer, ConsumerConfig, PollOutcome};
pub use dispatcher::{AlertFailure, DispatchReport, DispatchStage, EventDispatcher};
