pub mod sqlite_pragma;
pub mod threads;
pub mod runtime;
