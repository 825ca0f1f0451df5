pub mod builtin;
pub mod pipeline;
pub mod preprocessor;

pub use builtin::BuiltinDeps;
pub use pipeline::PreprocessorPipeline;
pub use preprocessor::MessagePreprocessor;
