pub mod batch;
pub mod config;
pub mod enrich;
pub mod format;
pub mod models;
pub mod normalize;
pub mod pipeline;
pub mod publish;
pub mod sanitize;
pub mod source;
pub mod state;

/// Current version of the pipeline logic. Bumped when output documents change
/// shape enough that a re-run is worth suggesting.
pub const PIPELINE_VERSION: i32 = 1;
