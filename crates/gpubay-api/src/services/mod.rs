//! External service clients.

pub mod settlement;
