pub mod factory;
pub mod gemini;
pub mod openai;

pub use factory::{create_provider, create_provider_with};
pub use gemini::GeminiProvider;
pub use openai::OpenAIProvider;
