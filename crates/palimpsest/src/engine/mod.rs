//! Engine subsystem: collaborator traits, language profiles, and the pool
//! that owns the single live engine instance.

pub mod pool;
pub mod profile;
pub mod traits;

pub use pool::{EngineHandle, EnginePool};
pub use profile::{EngineParams, ScriptClass, script_class};
pub use traits::{ConfidenceScale, EngineFactory, EngineOutput, RecognitionEngine};
