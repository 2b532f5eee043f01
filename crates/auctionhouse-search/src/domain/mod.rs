//! Domain layer for the Search context.

pub mod events;
pub mod items;
