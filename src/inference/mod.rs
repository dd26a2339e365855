pub mod task;
pub mod text_pipeline;
