pub mod custom_columns;
pub mod error;
pub mod normalize;
pub mod pipeline;

pub use error::{CaptureError, Result};
pub use normalize::Shell;
pub use pipeline::CapturePipeline;
