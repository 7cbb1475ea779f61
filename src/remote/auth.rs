use async_trait::async_trait;

use super::RemoteError;

/// Source of bearer tokens for backend and realtime requests. Acquisition is
/// owned by an external identity provider; `None` means no auth header.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn bearer_token(&self) -> Result<Option<String>, RemoteError>;
}

/// Fixed token, typically read from settings or the environment.
#[derive(Debug, Clone, Default)]
pub struct StaticToken(Option<String>);

impl StaticToken {
    pub fn new(token: Option<String>) -> Self {
        Self(token.filter(|value| !value.trim().is_empty()))
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn bearer_token(&self) -> Result<Option<String>, RemoteError> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn blank_static_token_means_no_auth() {
        assert_eq!(StaticToken::new(Some("  ".into())).bearer_token().await.unwrap(), None);
        assert_eq!(
            StaticToken::new(Some("abc".into())).bearer_token().await.unwrap(),
            Some("abc".to_string())
        );
    }
}
