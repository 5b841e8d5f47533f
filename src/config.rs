//! Configuração do scriptorium carregada a partir de `scriptorium.toml`.
//!
//! A struct [`Config`] contém todos os parâmetros configuráveis: retentativas,
//! circuit breaker, limites de qualidade, tabela de fallback e logging.
//! Valores não presentes no arquivo usam defaults sensíveis.
//! A variável de ambiente `ANTHROPIC_API_KEY` tem precedência sobre o arquivo.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;
use crate::generation::{AttemptBudget, SectionGenerator};
use crate::logging::LoggingConfig;
use crate::provider::{AnthropicClient, ModelId, ProviderSet, client};
use crate::quality::{LanguageToolCheck, QualityGate, QualityThresholds};
use crate::resilience::{BreakerConfig, BreakerRegistry, FallbackTable, RetryPolicy};

/// Arquivo procurado no diretório atual quando `--config` não é informado.
pub const DEFAULT_CONFIG_FILE: &str = "scriptorium.toml";

/// Configuração de nível superior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Chave da API Anthropic.
    #[serde(default)]
    pub api_key: String,

    /// Endpoint de mensagens da API Anthropic (útil para proxies e testes).
    #[serde(default = "default_anthropic_base_url")]
    pub anthropic_base_url: String,

    /// Limite de tokens de saída por chamada.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Tempo máximo total de uma chamada ao provedor, em segundos.
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,

    #[serde(default)]
    pub retry: RetrySection,

    #[serde(default)]
    pub breaker: BreakerSection,

    #[serde(default)]
    pub quality: QualitySection,

    /// Modelo primário → modelos alternativos, em ordem.
    #[serde(default = "default_fallbacks")]
    pub fallbacks: FallbackTable,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Seção `[retry]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySection {
    /// Retentativas após a primeira tentativa.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Esperas entre tentativas, em segundos; a última se repete.
    #[serde(default = "default_delays_secs")]
    pub delays_secs: Vec<u64>,
}

/// Seção `[breaker]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerSection {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    #[serde(default = "default_recovery_timeout_secs")]
    pub recovery_timeout_secs: u64,

    /// Tipos de falha que contam contra a saúde do provedor.
    #[serde(default = "default_expected_kinds")]
    pub expected: Vec<ErrorKind>,
}

/// Seção `[quality]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualitySection {
    #[serde(flatten)]
    pub thresholds: QualityThresholds,

    /// Serviço LanguageTool para contagem de erros gramaticais.
    #[serde(default)]
    pub languagetool_url: Option<String>,
}

fn default_anthropic_base_url() -> String {
    client::API_URL.to_string()
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_call_timeout_secs() -> u64 {
    120
}

fn default_max_retries() -> u32 {
    3
}

fn default_delays_secs() -> Vec<u64> {
    vec![1, 2, 4]
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_recovery_timeout_secs() -> u64 {
    60
}

fn default_expected_kinds() -> Vec<ErrorKind> {
    vec![
        ErrorKind::RateLimited,
        ErrorKind::Server,
        ErrorKind::Network,
        ErrorKind::Timeout,
    ]
}

// Cadeia padrão: opus → sonnet → haiku, tudo no provedor Anthropic.
fn default_fallbacks() -> FallbackTable {
    let opus = ModelId::new("anthropic", "claude-opus-4-6");
    let sonnet = ModelId::new("anthropic", "claude-sonnet-4-5");
    let haiku = ModelId::new("anthropic", "claude-haiku-4-5");
    FallbackTable::new()
        .with(opus, vec![sonnet.clone(), haiku.clone()])
        .with(sonnet, vec![haiku])
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            delays_secs: default_delays_secs(),
        }
    }
}

impl Default for BreakerSection {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_timeout_secs: default_recovery_timeout_secs(),
            expected: default_expected_kinds(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            anthropic_base_url: default_anthropic_base_url(),
            max_tokens: default_max_tokens(),
            call_timeout_secs: default_call_timeout_secs(),
            retry: RetrySection::default(),
            breaker: BreakerSection::default(),
            quality: QualitySection::default(),
            fallbacks: default_fallbacks(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Carrega a configuração de `path`, ou de `scriptorium.toml` no diretório
    /// atual. Um caminho explícito inexistente é erro; o arquivo padrão
    /// ausente resulta nos valores padrão.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let path = Path::new(DEFAULT_CONFIG_FILE);
                if path.exists() {
                    Self::from_file(path)?
                } else {
                    Self::default()
                }
            }
        };

        // Variável de ambiente tem precedência sobre o arquivo para a chave API.
        config.override_api_key(std::env::var("ANTHROPIC_API_KEY").ok());
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("invalid config file {}", path.display()))
    }

    fn override_api_key(&mut self, key: Option<String>) {
        if let Some(key) = key
            && !key.is_empty()
        {
            self.api_key = key;
        }
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry.max_retries,
            self.retry
                .delays_secs
                .iter()
                .map(|s| Duration::from_secs(*s))
                .collect(),
        )
    }

    pub fn breaker_config(&self) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: self.breaker.failure_threshold,
            recovery_timeout: Duration::from_secs(self.breaker.recovery_timeout_secs),
            expected: self.breaker.expected.iter().copied().collect(),
        }
    }

    /// Limite de chamadas ao provedor por seção, no pior caso, considerando a
    /// maior cadeia de fallback configurada.
    pub fn attempt_budget(&self) -> AttemptBudget {
        AttemptBudget {
            max_retries: self.retry.max_retries,
            chain_len: self.fallbacks.longest_chain(),
            max_regenerations: self.quality.thresholds.max_regenerations,
        }
    }

    /// Monta o gerador de seções com o cliente Anthropic e, se configurado,
    /// a checagem gramatical via LanguageTool.
    pub fn build_generator(&self) -> Result<SectionGenerator> {
        let client =
            AnthropicClient::with_base_url(self.api_key.clone(), self.anthropic_base_url.clone())
                .context("failed to build Anthropic client")?
                .with_max_tokens(self.max_tokens);
        let providers = ProviderSet::new().with(Arc::new(client));

        let mut gate = QualityGate::new(self.quality.thresholds.clone());
        if let Some(url) = &self.quality.languagetool_url {
            let check = LanguageToolCheck::new(url.as_str())
                .context("failed to build LanguageTool client")?;
            gate = gate.with_check(Arc::new(check));
        }

        let breakers = Arc::new(BreakerRegistry::new(self.breaker_config()));
        Ok(SectionGenerator::new(
            providers,
            self.fallbacks.clone(),
            breakers,
            self.retry_policy(),
            gate,
        )
        .with_call_timeout(self.call_timeout()))
    }
}
