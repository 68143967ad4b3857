use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use an_core::{CompletionModel, EmbeddingModel, Error, Result};

use crate::Config;

pub mod dummy;
pub mod openai;

pub use dummy::DummyModel;
pub use openai::OpenAiModel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum ModelKind {
    #[default]
    OpenAi,
    Dummy,
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelKind::OpenAi => write!(f, "open-ai"),
            ModelKind::Dummy => write!(f, "dummy"),
        }
    }
}

impl FromStr for ModelKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().replace(['-', '_'], "").as_str() {
            "openai" => Ok(ModelKind::OpenAi),
            "dummy" => Ok(ModelKind::Dummy),
            other => Err(Error::Config(format!("Unknown model: {}", other))),
        }
    }
}

/// One backend seen through both model traits.
#[derive(Clone)]
pub struct Models {
    pub embedding: Arc<dyn EmbeddingModel>,
    pub completion: Arc<dyn CompletionModel>,
}

impl fmt::Debug for Models {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Models")
            .field("embedding", &self.embedding.name())
            .field("completion", &self.completion.name())
            .finish()
    }
}

pub fn create_model(kind: ModelKind, config: Config) -> Result<Models> {
    tracing::debug!("Creating {} model", kind);
    match kind {
        ModelKind::OpenAi => {
            let model = Arc::new(OpenAiModel::new(config)?);
            Ok(Models {
                embedding: model.clone(),
                completion: model,
            })
        }
        ModelKind::Dummy => {
            let model = Arc::new(DummyModel::new());
            Ok(Models {
                embedding: model.clone(),
                completion: model,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_kind_from_str() {
        assert_eq!("OpenAI".parse::<ModelKind>().unwrap(), ModelKind::OpenAi);
        assert_eq!("open-ai".parse::<ModelKind>().unwrap(), ModelKind::OpenAi);
        assert_eq!("dummy".parse::<ModelKind>().unwrap(), ModelKind::Dummy);
        assert!("deepseek".parse::<ModelKind>().is_err());
    }

    #[test]
    fn test_create_model() {
        let models = create_model(ModelKind::Dummy, Config::default()).unwrap();
        assert_eq!(models.embedding.name(), "Dummy");
        assert_eq!(models.completion.name(), "Dummy");

        assert!(create_model(ModelKind::OpenAi, Config::default()).is_err());
        let models = create_model(
            ModelKind::OpenAi,
            Config {
                api_key: Some("sk-test".to_string()),
                ..Config::default()
            },
        )
        .unwrap();
        assert_eq!(models.completion.name(), "gpt-3.5-turbo");
    }
}
