//! Processing nodes
//!
//! Nodes that reshape data or render text.

mod edit_fields;
mod template_file;
mod transform;

pub use edit_fields::EditFieldsExecutor;
pub use template_file::TemplateExecutor;
pub use transform::TransformExecutor;
