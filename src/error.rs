use serde::Serialize;

/// Service-wide error type. Every fallible function returns `Result<T, AppError>`.
/// Serializes as `{ error, kind }` so HTTP callers get structured error bodies.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Expired or invalid mail credential. Carries a remediation hint.
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Credential is valid but lacks the required permission scope.
    #[error("Permission error: {0}")]
    Scope(String),

    /// Mail provider search/fetch failure (non-auth).
    #[error("Mail provider error: {0}")]
    Provider(String),

    /// Malformed or undecodable model response.
    #[error("Model response error: {0}")]
    Model(String),

    #[error("{0}")]
    Internal(String),
}

impl AppError {
    /// Stable machine-readable kind tag, used in serialized error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Database(_) => "database",
            AppError::Pool(_) => "pool",
            AppError::NotFound(_) => "not_found",
            AppError::Validation(_) => "validation",
            AppError::Io(_) => "io",
            AppError::Serde(_) => "serde",
            AppError::Http(_) => "http",
            AppError::Auth(_) => "auth",
            AppError::Scope(_) => "scope",
            AppError::Provider(_) => "provider",
            AppError::Model(_) => "model",
            AppError::Internal(_) => "internal",
        }
    }
}

impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut s = serializer.serialize_struct("AppError", 2)?;
        s.serialize_field("error", &self.to_string())?;
        s.serialize_field("kind", self.kind())?;
        s.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_tags() {
        assert_eq!(AppError::Auth("token expired".into()).kind(), "auth");
        assert_eq!(AppError::Scope("missing scope".into()).kind(), "scope");
        assert_eq!(AppError::Provider("search failed".into()).kind(), "provider");
    }

    #[test]
    fn test_serializes_with_error_and_kind() {
        let err = AppError::Validation("bad status".into());
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "validation");
        assert_eq!(json["error"], "Validation error: bad status");
    }
}
