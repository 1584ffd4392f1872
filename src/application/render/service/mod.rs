mod delimiters;
pub(crate) mod diagram;
pub(crate) mod math;
pub(crate) mod mermaid;
pub(crate) mod sanitize;

pub use math::KatexTypesetter;
pub use mermaid::{MermaidCliRenderer, MermaidRenderError};
