pub mod api;
pub mod upstream;
