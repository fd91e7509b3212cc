use crate::errors::ConnectionError;

/// Connection configuration, resolved once at startup and handed to
/// [`connect`](crate::connect).
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// MongoDB connection string.
    pub uri: String,
    /// Application name reported to the server, visible in server logs.
    pub app_name: Option<String>,
}

impl DbConfig {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            app_name: None,
        }
    }

    /// Read the connection string from the process environment, loading a
    /// `.env` file first if one is present. `MONGODB_URI` wins over the
    /// `DATABASE_URL` fallback. The URI is not validated here; a malformed
    /// value surfaces later as a connection error.
    pub fn from_env() -> Result<Self, ConnectionError> {
        dotenvy::dotenv().ok();

        let uri = resolve_uri(|key| std::env::var(key).ok())?;
        Ok(Self::new(uri))
    }

    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = Some(name.into());
        self
    }
}

fn resolve_uri<F>(get: F) -> Result<String, ConnectionError>
where
    F: Fn(&str) -> Option<String>,
{
    get("MONGODB_URI")
        .or_else(|| get("DATABASE_URL"))
        .ok_or(ConnectionError::MissingUri)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mongodb_uri_wins_over_fallback() {
        let uri = resolve_uri(|key| match key {
            "MONGODB_URI" => Some("mongodb://primary".to_string()),
            "DATABASE_URL" => Some("mongodb://fallback".to_string()),
            _ => None,
        })
        .unwrap();

        assert_eq!(uri, "mongodb://primary");
    }

    #[test]
    fn test_database_url_fallback() {
        let uri = resolve_uri(|key| match key {
            "DATABASE_URL" => Some("mongodb://fallback".to_string()),
            _ => None,
        })
        .unwrap();

        assert_eq!(uri, "mongodb://fallback");
    }

    #[test]
    fn test_missing_uri_is_an_error() {
        match resolve_uri(|_| None) {
            Err(ConnectionError::MissingUri) => {}
            other => panic!("Expected MissingUri, got {other:?}"),
        }
    }

    #[test]
    fn test_builder_sets_app_name() {
        let config = DbConfig::new("mongodb://localhost:27017").app_name("mongoline");
        assert_eq!(config.app_name.as_deref(), Some("mongoline"));
    }
}
