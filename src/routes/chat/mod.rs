mod handler;
mod model;

pub use handler::chat;
