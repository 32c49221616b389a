mod handler;
mod model;

pub use handler::{models, status};
