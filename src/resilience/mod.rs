pub mod circuit_breaker;
pub mod fallback;
pub mod retry;

pub use circuit_breaker::{
    BreakerConfig, BreakerRegistry, CallError, CircuitBreaker, CircuitBreakerState, CircuitState,
};
pub use fallback::FallbackTable;
pub use retry::{RetryPolicy, RetryStrategy};

#[cfg(test)]
pub(crate) mod test_support {
    use crate::error::{Classify, ErrorKind};

    /// Minimal classified error for exercising the breaker and retry loop.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct FakeError {
        pub kind: ErrorKind,
        pub message: &'static str,
    }

    impl FakeError {
        pub fn server(message: &'static str) -> Self {
            Self {
                kind: ErrorKind::Server,
                message,
            }
        }

        pub fn client(message: &'static str) -> Self {
            Self {
                kind: ErrorKind::Client,
                message,
            }
        }
    }

    impl std::fmt::Display for FakeError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str(self.message)
        }
    }

    impl std::error::Error for FakeError {}

    impl Classify for FakeError {
        fn kind(&self) -> ErrorKind {
            self.kind
        }
    }
}
