/// Dispatch schema, commands, and endpoints
pub mod handlers;
/// Keyboard and message rendering
pub mod views;
