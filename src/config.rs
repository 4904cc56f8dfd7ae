use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Full connection URL; takes precedence over the individual parts.
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub name: String,
    pub ssl_mode: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub endpoint: String,
    pub region: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    /// Provider domain used to build public object URLs.
    pub public_domain: String,
    pub force_path_style: bool,
    pub upload_timeout_secs: u64,
}

impl StorageConfig {
    /// Endpoint with an explicit scheme; bare hosts are assumed to be https.
    pub fn endpoint_url(&self) -> String {
        if self.endpoint.contains("://") {
            self.endpoint.clone()
        } else {
            format!("https://{}", self.endpoint)
        }
    }

    /// Public URL of an object uploaded with public-read visibility.
    pub fn public_url(&self, key: &str) -> String {
        format!(
            "https://{}.{}.{}/{}",
            self.bucket, self.region, self.public_domain, key
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub max_upload_bytes: u64,
    pub default_image_uri: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &'static str| lookup(key).ok_or(ConfigError::Missing(key));
        let or_default = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.into());

        let url = lookup("DATABASE_URL");
        // The individual parts are only mandatory when no URL is given.
        let part = |key: &'static str| match &url {
            Some(_) => Ok(lookup(key).unwrap_or_default()),
            None => required(key),
        };

        let database = DatabaseConfig {
            host: part("DB_ADDR")?,
            port: parse(&lookup, "DB_PORT", 5432)?,
            user: part("DB_USER")?,
            password: part("DB_PASSWORD")?,
            name: part("DB_NAME")?,
            ssl_mode: or_default("DB_SSLMODE", "require"),
            max_connections: parse(&lookup, "DB_MAX_CONNECTIONS", 10)?,
            url,
        };

        let storage = StorageConfig {
            endpoint: required("SPACE_ENDPOINT")?,
            region: required("DO_SPACE_REGION")?,
            bucket: required("DO_SPACE_NAME")?,
            access_key: required("ACCESS_KEY")?,
            secret_key: required("SECRET_KEY")?,
            public_domain: or_default("SPACE_DOMAIN", "digitaloceanspaces.com"),
            force_path_style: parse(&lookup, "SPACE_FORCE_PATH_STYLE", false)?,
            upload_timeout_secs: parse(&lookup, "UPLOAD_TIMEOUT_SECS", 30)?,
        };

        let port = match lookup("APP_PORT").or_else(|| lookup("PORT")) {
            Some(v) => v.parse().map_err(|_| ConfigError::Invalid {
                key: "APP_PORT",
                value: v,
            })?,
            None => 8080,
        };

        Ok(Self {
            host: or_default("APP_HOST", "0.0.0.0"),
            port,
            database,
            storage,
            max_upload_bytes: parse(&lookup, "MAX_UPLOAD_BYTES", 10 * 1024 * 1024)?,
            default_image_uri: lookup("DEFAULT_IMAGE_URI").unwrap_or_default(),
        })
    }
}

fn parse<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        Some(v) => v
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value: v }),
        None => Ok(default),
    }
}
