//! Domain model module declarations.

pub mod event;
pub mod reaction;
pub mod session;
