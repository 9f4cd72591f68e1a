use anyhow::Error;
use clap::Parser;
use serde::Deserialize;

#[derive(Parser, Debug)]
#[command(version)]
pub struct Cli {
    #[clap(long, default_value = "callkeeper.toml")]
    pub conf: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Config {
    pub http_addr: String,
    pub log_level: Option<String>,
    pub log_file: Option<String>,
    /// Externally reachable base URL used for recording status callbacks and
    /// the internal upsert endpoints. When unset it is derived per-request
    /// from forwarded headers.
    pub public_base_url: Option<String>,
    /// Numbers owned by the business, used to tell the business side of a
    /// call from the customer side. Compared by last ten digits.
    pub business_numbers: Vec<String>,
    pub twilio: TwilioConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: String,
    pub api_base: String,
    /// Upper bound on how many child legs are fetched per discovery pass.
    pub related_legs_limit: usize,
    pub http_timeout_secs: u64,
}

impl Default for TwilioConfig {
    fn default() -> Self {
        Self {
            account_sid: String::new(),
            auth_token: String::new(),
            api_base: "https://api.twilio.com".to_string(),
            related_legs_limit: 20,
            http_timeout_secs: 10,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_addr: "0.0.0.0:8080".to_string(),
            log_level: Some("info".to_string()),
            log_file: None,
            public_base_url: None,
            business_numbers: vec![],
            twilio: TwilioConfig::default(),
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self, Error> {
        let config = toml::from_str(
            &std::fs::read_to_string(path).map_err(|e| anyhow::anyhow!("{}: {}", e, path))?,
        )?;
        Ok(config)
    }

    /// Environment variables take precedence over the config file so
    /// credentials never have to live on disk.
    pub fn apply_env(&mut self) {
        if let Ok(sid) = std::env::var("TWILIO_ACCOUNT_SID") {
            self.twilio.account_sid = sid;
        }
        if let Ok(token) = std::env::var("TWILIO_AUTH_TOKEN") {
            self.twilio.auth_token = token;
        }
        if let Ok(base) = std::env::var("PUBLIC_BASE_URL") {
            self.public_base_url = Some(base);
        }
        if let Ok(numbers) = std::env::var("BUSINESS_NUMBERS") {
            self.business_numbers = numbers
                .split(',')
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty())
                .collect();
        }
    }
}
