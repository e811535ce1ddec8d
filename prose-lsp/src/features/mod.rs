pub mod code_actions;
pub mod commands;
pub mod diagnostics;
