pub mod import;
pub mod session;
