// Public (no auth) → Protected (access gate)
pub mod app;
pub mod public;

pub use public::{health, root};
