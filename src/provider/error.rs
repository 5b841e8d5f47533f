//! Tipos de erro para chamadas a provedores de modelos de linguagem.
//!
//! Define [`ProviderError`] com variantes para rate limiting, erros da API,
//! erros de rede e timeout. Cada variante é classificada via [`Classify`]
//! para que o circuit breaker saiba se a falha indica um provedor doente.

use std::time::Duration;

use thiserror::Error;

use crate::error::{Classify, ErrorKind};

/// Erros que podem ocorrer ao chamar um provedor.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// O servidor retornou HTTP 429 (rate limit).
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    /// Erro retornado pela API (ex.: 401 chave inválida, 500 erro interno).
    #[error("API error (status {status}): {message}")]
    ApiError { status: u16, message: String },

    /// Falha de rede subjacente (DNS, conexão recusada).
    #[error("network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    /// A chamada excedeu o tempo limite total configurado.
    #[error("request timed out after {}s", after.as_secs())]
    Timeout { after: Duration },

    /// Nenhum provedor registrado com este nome.
    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    /// A resposta chegou mas não continha texto utilizável.
    #[error("empty completion from {0}")]
    EmptyCompletion(String),
}

impl Classify for ProviderError {
    fn kind(&self) -> ErrorKind {
        match self {
            ProviderError::RateLimited { .. } => ErrorKind::RateLimited,
            ProviderError::ApiError { status, .. } if *status >= 500 => ErrorKind::Server,
            ProviderError::ApiError { .. } => ErrorKind::Client,
            ProviderError::NetworkError(e) if e.is_timeout() => ErrorKind::Timeout,
            ProviderError::NetworkError(_) => ErrorKind::Network,
            ProviderError::Timeout { .. } => ErrorKind::Timeout,
            ProviderError::UnknownProvider(_) => ErrorKind::Configuration,
            ProviderError::EmptyCompletion(_) => ErrorKind::Server,
        }
    }
}
