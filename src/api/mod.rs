pub mod client;
pub mod events;
pub mod models;

pub use client::BackendClient;
pub use events::PlayerEvent;
