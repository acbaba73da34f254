/// Server configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS`.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`). Commit endpoints
    /// are exempt and use `commit_timeout_secs` instead.
    pub request_timeout_secs: u64,
    /// Longest a commit may run before it is cancelled, in seconds
    /// (default: `300`). The caller still receives the commit report.
    pub commit_timeout_secs: u64,
    /// How long committed and cancelled sessions are kept, in seconds
    /// (default: `3600`).
    pub session_retention_secs: u64,
    /// Largest accepted request body in bytes (default: 10 MiB).
    pub max_upload_bytes: usize,
    /// PostgreSQL URL. When unset the server keeps catalogs and records in
    /// memory.
    pub database_url: Option<String>,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                  | Default                   |
    /// |--------------------------|---------------------------|
    /// | `HOST`                   | `0.0.0.0`                 |
    /// | `PORT`                   | `3000`                    |
    /// | `CORS_ORIGINS`           | `http://localhost:5173`   |
    /// | `REQUEST_TIMEOUT_SECS`   | `30`                      |
    /// | `COMMIT_TIMEOUT_SECS`    | `300`                     |
    /// | `SESSION_RETENTION_SECS` | `3600`                    |
    /// | `MAX_UPLOAD_BYTES`       | `10485760`                |
    /// | `DATABASE_URL`           | unset (in-memory backend) |
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "3000".into())
            .parse()
            .expect("PORT must be a valid u16");

        let cors_origins = parse_origins(
            &std::env::var("CORS_ORIGINS").unwrap_or_else(|_| "http://localhost:5173".into()),
        );

        let request_timeout_secs: u64 = std::env::var("REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("REQUEST_TIMEOUT_SECS must be a valid u64");

        let commit_timeout_secs: u64 = std::env::var("COMMIT_TIMEOUT_SECS")
            .unwrap_or_else(|_| "300".into())
            .parse()
            .expect("COMMIT_TIMEOUT_SECS must be a valid u64");

        let session_retention_secs: u64 = std::env::var("SESSION_RETENTION_SECS")
            .unwrap_or_else(|_| "3600".into())
            .parse()
            .expect("SESSION_RETENTION_SECS must be a valid u64");

        let max_upload_bytes: usize = std::env::var("MAX_UPLOAD_BYTES")
            .unwrap_or_else(|_| "10485760".into())
            .parse()
            .expect("MAX_UPLOAD_BYTES must be a valid usize");

        let database_url = std::env::var("DATABASE_URL")
            .ok()
            .filter(|url| !url.trim().is_empty());

        Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            commit_timeout_secs,
            session_retention_secs,
            max_upload_bytes,
            database_url,
        }
    }
}

fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
