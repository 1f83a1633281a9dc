pub mod lifecycle;
pub mod periodic;
