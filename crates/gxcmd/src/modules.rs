//! Interfaces to the collaborators of the command processor.
pub mod memory;
pub mod render;
pub mod shader;
