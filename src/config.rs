use anyhow::Result;
use dotenvy::dotenv;
use ipnet::IpNet;
use std::env;
use std::net::IpAddr;

#[derive(Debug, Clone)]
pub struct Config {
    pub server_port: u16,
    pub database_url: String,
    pub bank_code: String,
    pub currency: String,
    pub switch_url: String,
    pub switch_api_key: String,
    pub accounts_service_url: String,
    pub poll_attempts: u32,
    pub poll_interval_ms: u64,
    pub allowed_webhook_ips: AllowedIps,
}

/// Source filter for inbound webhook deliveries.
#[derive(Debug, Clone)]
pub enum AllowedIps {
    Any,
    Cidrs(Vec<IpNet>),
}

impl AllowedIps {
    pub fn permits(&self, addr: IpAddr) -> bool {
        match self {
            AllowedIps::Any => true,
            AllowedIps::Cidrs(cidrs) => cidrs.iter().any(|net| net.contains(&addr)),
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok(); // Load .env file if present

        let allowed_webhook_ips =
            parse_allowed_ips(&env::var("ALLOWED_IPS").unwrap_or_else(|_| "*".to_string()))?;

        Ok(Config {
            server_port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()?,
            database_url: env::var("DATABASE_URL")?,
            bank_code: env::var("BANK_CODE").unwrap_or_else(|_| "BANTEC".to_string()),
            currency: env::var("CURRENCY").unwrap_or_else(|_| "USD".to_string()),
            switch_url: env::var("SWITCH_URL")
                .unwrap_or_else(|_| "http://localhost:8081".to_string()),
            switch_api_key: env::var("SWITCH_API_KEY")?,
            accounts_service_url: env::var("ACCOUNTS_SERVICE_URL")?,
            poll_attempts: env::var("POLL_ATTEMPTS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()?,
            poll_interval_ms: env::var("POLL_INTERVAL_MS")
                .unwrap_or_else(|_| "1500".to_string())
                .parse()?,
            allowed_webhook_ips,
        })
    }
}

fn parse_allowed_ips(raw: &str) -> anyhow::Result<AllowedIps> {
    let value = raw.trim();
    if value == "*" {
        return Ok(AllowedIps::Any);
    }

    let cidrs = value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::parse::<IpNet>)
        .collect::<Result<Vec<_>, _>>()?;

    if cidrs.is_empty() {
        anyhow::bail!("ALLOWED_IPS must be '*' or a comma-separated list of CIDRs");
    }

    Ok(AllowedIps::Cidrs(cidrs))
}
