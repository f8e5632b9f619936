use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
    pub verify_ttl_hours: i64,
}

/// S3-compatible bucket used for avatars.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub endpoint: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
    /// Base URL clients use to fetch objects; defaults to the endpoint.
    pub public_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MailConfig {
    /// `None` disables SMTP and verification links are only logged.
    pub smtp_host: Option<String>,
    pub smtp_port: u16,
    pub username: String,
    pub password: String,
    pub from_address: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub public_base_url: String,
    pub rate_limit_seconds: u64,
    /// Key the rate limiter on `X-Forwarded-For`/`X-Real-IP`. Only safe
    /// behind a proxy that overwrites those headers.
    pub trust_proxy_headers: bool,
    pub jwt: JwtConfig,
    pub storage: StorageConfig,
    pub mail: MailConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = required("DATABASE_URL")?;
        let public_base_url = env_or("PUBLIC_BASE_URL", "http://localhost:8080");

        let jwt = JwtConfig {
            secret: required("JWT_SECRET")?,
            issuer: env_or("JWT_ISSUER", "contactbook"),
            audience: env_or("JWT_AUDIENCE", "contactbook-users"),
            ttl_minutes: parsed_or("JWT_TTL_MINUTES", 30),
            verify_ttl_hours: parsed_or("JWT_VERIFY_TTL_HOURS", 24),
        };

        let endpoint = required("MINIO_ENDPOINT")?;
        let storage = StorageConfig {
            public_url: env_or("MINIO_PUBLIC_URL", &endpoint),
            endpoint,
            bucket: required("MINIO_BUCKET")?,
            access_key: required("MINIO_ACCESS_KEY")?,
            secret_key: required("MINIO_SECRET_KEY")?,
            region: env_or("MINIO_REGION", "us-east-1"),
        };

        let username = env_or("SMTP_USERNAME", "");
        let mail = MailConfig {
            smtp_host: std::env::var("SMTP_HOST").ok().filter(|h| !h.is_empty()),
            smtp_port: parsed_or("SMTP_PORT", 587),
            password: env_or("SMTP_PASSWORD", ""),
            from_address: env_or("MAIL_FROM", &username),
            username,
        };

        Ok(Self {
            database_url,
            public_base_url,
            rate_limit_seconds: parsed_or("RATE_LIMIT_SECONDS", 5),
            trust_proxy_headers: parsed_or("TRUST_PROXY_HEADERS", false),
            jwt,
            storage,
            mail,
        })
    }
}

fn required(key: &str) -> anyhow::Result<String> {
    std::env::var(key).with_context(|| format!("{key} must be set"))
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parsed_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}
