mod handler;
mod model;

pub use handler::{grant, set_maintenance};
