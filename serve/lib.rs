#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]
pub mod api;
pub mod artifact;
pub mod cache;
pub mod config;
pub mod infer;
pub mod labels;
pub mod memory;
pub mod model;
pub mod pipeline;
pub mod schema;
#[path = "../shared/files.rs"]
pub mod shared_files;
pub mod shared {
    pub use super::shared_files as files;
}
