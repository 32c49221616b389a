pub mod catalog;
pub mod upstream;

pub use catalog::{AuthShape, Candidate, ModelCatalog, Mode, Provider, WireFormat};
pub use upstream::{AttemptError, ChatBackend, ChatPrompt, UpstreamClient, UpstreamSettings};
