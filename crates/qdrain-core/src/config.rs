//! Connection settings taken from the environment.

use aws_sdk_sqs::config::Credentials;

pub const ACCESS_KEY_ID: &str = "AWS_ACCESS_KEY_ID";
pub const SECRET_ACCESS_KEY: &str = "AWS_SECRET_ACCESS_KEY";
pub const SESSION_TOKEN: &str = "AWS_SESSION_TOKEN";

pub const DEFAULT_REGION: &str = "us-west-2";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing connection credentials: {0} is not set")]
    MissingCredential(&'static str),
}

/// Everything needed to talk to the queue service.
#[derive(Clone, Debug)]
pub struct Settings {
    pub region: String,
    /// Overrides the service endpoint, e.g. `http://localhost:4566` for LocalStack
    pub endpoint_url: Option<String>,
    pub credentials: Credentials,
}

impl Settings {
    /// Reads credentials from the process environment.
    pub fn from_env(region: Option<&str>, endpoint_url: Option<&str>) -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok(), region, endpoint_url)
    }

    /// Reads credentials through `lookup`; both the access key id and the
    /// secret key must be present and non-empty.
    pub fn from_lookup<F>(
        lookup: F,
        region: Option<&str>,
        endpoint_url: Option<&str>,
    ) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &'static str| {
            lookup(name)
                .filter(|v| !v.is_empty())
                .ok_or(ConfigError::MissingCredential(name))
        };

        let key_id = required(ACCESS_KEY_ID)?;
        let secret = required(SECRET_ACCESS_KEY)?;
        let token = lookup(SESSION_TOKEN).filter(|v| !v.is_empty());

        Ok(Self {
            region: region.unwrap_or(DEFAULT_REGION).to_string(),
            endpoint_url: endpoint_url.map(str::to_string),
            credentials: Credentials::new(key_id, secret, token, None, "environment"),
        })
    }

    /// Builds the SDK configuration. No network calls are made here.
    pub async fn load(&self) -> aws_config::SdkConfig {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(self.region.clone()))
            .credentials_provider(self.credentials.clone());

        if let Some(endpoint) = &self.endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }

        loader.load().await
    }
}
