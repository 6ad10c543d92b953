//! Gateway selection for the CLI.

use async_trait::async_trait;
use fieldsync_core::{Entity, GatewayError, HttpGateway, Record, RemoteGateway};

use crate::config::SyncConfig;

/// The HTTP gateway when a server is configured, otherwise a gateway that is
/// permanently offline so every write takes the local path.
pub enum CliGateway {
    Http(HttpGateway),
    Detached,
}

impl CliGateway {
    pub fn from_config(config: &SyncConfig) -> Result<Self, GatewayError> {
        match &config.server_url {
            Some(url) => Ok(CliGateway::Http(HttpGateway::new(
                url.clone(),
                config.api_key.clone(),
                config.request_timeout(),
            )?)),
            None => Ok(CliGateway::Detached),
        }
    }

    fn detached() -> GatewayError {
        GatewayError::Unavailable("no sync server configured".to_string())
    }
}

#[async_trait]
impl RemoteGateway for CliGateway {
    async fn get_all<T: Entity>(&self) -> Result<Vec<Record<T>>, GatewayError> {
        match self {
            CliGateway::Http(http) => http.get_all::<T>().await,
            CliGateway::Detached => Err(Self::detached()),
        }
    }

    async fn get_by_id<T: Entity>(&self, id: &str) -> Result<Record<T>, GatewayError> {
        match self {
            CliGateway::Http(http) => http.get_by_id::<T>(id).await,
            CliGateway::Detached => Err(Self::detached()),
        }
    }

    async fn create<T: Entity>(&self, payload: &T) -> Result<Record<T>, GatewayError> {
        match self {
            CliGateway::Http(http) => http.create(payload).await,
            CliGateway::Detached => Err(Self::detached()),
        }
    }

    async fn update<T: Entity>(
        &self,
        id: &str,
        patch: &T::Patch,
    ) -> Result<Record<T>, GatewayError> {
        match self {
            CliGateway::Http(http) => http.update::<T>(id, patch).await,
            CliGateway::Detached => Err(Self::detached()),
        }
    }

    async fn delete<T: Entity>(&self, id: &str) -> Result<(), GatewayError> {
        match self {
            CliGateway::Http(http) => http.delete::<T>(id).await,
            CliGateway::Detached => Err(Self::detached()),
        }
    }

    async fn ping(&self) -> bool {
        match self {
            CliGateway::Http(http) => http.ping().await,
            CliGateway::Detached => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldsync_core::Account;

    #[tokio::test]
    async fn test_detached_gateway_is_offline() {
        let gateway = CliGateway::from_config(&SyncConfig::default()).unwrap();
        assert!(matches!(gateway, CliGateway::Detached));
        assert!(!gateway.ping().await);
        assert!(matches!(
            gateway.create(&Account::new("Acme")).await,
            Err(GatewayError::Unavailable(_))
        ));
    }

    #[test]
    fn test_configured_server_uses_http() {
        let config = SyncConfig {
            server_url: Some("http://localhost:8080".to_string()),
            ..Default::default()
        };
        let gateway = CliGateway::from_config(&config).unwrap();
        match gateway {
            CliGateway::Http(http) => assert_eq!(http.server_url(), "http://localhost:8080"),
            CliGateway::Detached => panic!("expected http gateway"),
        }
    }
}
