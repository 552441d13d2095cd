pub mod internal;
pub mod queue;
pub mod system;
