// LLM abstraction layer

pub mod google;
pub mod model;
pub mod provider;
pub mod schema;

pub use model::{Grounded, ResearchModel};
pub use provider::*;
pub use schema::{Structured, SynthesisReport};
