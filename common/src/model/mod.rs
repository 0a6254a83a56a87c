pub mod column;
pub mod join;
