// Library interface for cryptoscope modules
// This allows tests and other binaries to import modules

pub mod analysis;
pub mod models;
pub mod news;
pub mod server;
pub mod storage;
