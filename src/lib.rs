// Public API - data types, the engine and its collaborators
pub mod config;
pub mod deviation;
pub mod export;
pub mod range;
pub mod state;
pub mod topology;
pub mod trace;

// Probing internals are public so other transports can be plugged in
pub mod probe;

// Binary support
pub mod cli;
pub mod logging;
