//! Story generation: prompt assembly, the generation backend, and the
//! per-chat pipeline that ties buffer, media, generation, and delivery
//! together.

pub mod generator;
pub mod pipeline;
pub mod prompt;
