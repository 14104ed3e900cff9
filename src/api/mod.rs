pub mod lib;
pub mod models;
