//! Generic indicators: reducers, their registry and the orchestration around them

pub mod functions;
pub mod indicator;
pub mod missing;
pub mod registry;
pub mod templates;

pub use functions::{Reducer, ReducerContext};
pub use indicator::{compute_batch, GenericIndicator, PendingIndex, Qualifier};
pub use missing::MissingPolicy;
pub use templates::{IndicatorMetadata, TemplateScope};
