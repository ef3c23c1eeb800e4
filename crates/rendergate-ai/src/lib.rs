pub mod collaborators;
pub mod factory;
pub mod generation;
pub mod openai_compatible;
pub mod provider;

pub use collaborators::{GatewayAuditor, GatewayVisionJudge};
pub use factory::ProviderFactory;
pub use generation::{GatewayAssetGenerator, GatewayGeneratorConfig};
pub use openai_compatible::{OpenAICompatibleConfig, OpenAICompatibleProvider};
pub use provider::{ModelProvider, ModelRequest, ModelResponse, ModelResult};
