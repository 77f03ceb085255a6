mod backend;
mod backends;
mod registry;
mod result;

pub use backend::{
    EngineRuntime, EngineSession, RefinementRequest, SizingParams, TemplateSpec,
    DEFAULT_BASE_SIZE, DEFAULT_REFINEMENT_FACTOR,
};
pub use backends::{ProcessRuntime, ProcessSession, StubRuntime, StubSession};
pub use registry::{EngineFactory, EngineRegistry};
pub use result::{translation, EngineDetection};
