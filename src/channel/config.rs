use secrecy::{ExposeSecret, SecretString};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;

use crate::channel::consts::{AUTHORIZATION_HEADER, BASE_URL, DEFAULT_AGENT, GUIDE_VOICE_API_KEY};

pub struct ChannelConfig {
    base_url: String,
    api_key: SecretString,
    agent: String,
}

pub struct ChannelConfigBuilder {
    config: ChannelConfig,
}

impl ChannelConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: ChannelConfig::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.config.base_url = base_url.to_string();
        self
    }

    pub fn with_api_key(mut self, api_key: &str) -> Self {
        self.config.api_key = SecretString::from(api_key.to_string());
        self
    }

    pub fn with_agent(mut self, agent: &str) -> Self {
        self.config.agent = agent.to_string();
        self
    }

    pub fn build(self) -> ChannelConfig {
        self.config
    }
}

impl Default for ChannelConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelConfig {
    /// Defaults: public endpoint, API key from the environment.
    pub fn new() -> Self {
        Self {
            base_url: BASE_URL.to_string(),
            api_key: std::env::var(GUIDE_VOICE_API_KEY)
                .unwrap_or_else(|_| "".to_string())
                .into(),
            agent: DEFAULT_AGENT.to_string(),
        }
    }

    pub fn builder() -> ChannelConfigBuilder {
        ChannelConfigBuilder::new()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn agent(&self) -> &str {
        &self.agent
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self::new()
    }
}

pub fn build_request(config: &ChannelConfig) -> tokio_tungstenite::tungstenite::Result<Request> {
    let mut request = format!("{}/session?agent={}", config.base_url, config.agent)
        .into_client_request()?;
    request.headers_mut().insert(
        AUTHORIZATION_HEADER,
        format!("Bearer {}", config.api_key.expose_secret())
            .as_str()
            .parse()?,
    );
    Ok(request)
}
