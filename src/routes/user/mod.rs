mod handler;
mod model;

pub use handler::{auth, history};
