pub mod args;
pub mod op;
pub mod ops;

pub use ops::{Connect, Identity, Init, Members, Serve, Version};
