use thiserror::Error;

pub type Result<T> = std::result::Result<T, PlanetError>;

#[derive(Error, Debug)]
pub enum PlanetError {
    #[error("{record}: cannot parse {field} value {value:?}")]
    Parse {
        record: String,
        field: &'static str,
        value: String,
    },

    #[error("Could not find system {0}")]
    NotFound(String),

    #[error("redirect chain starting at {start} exceeded {limit} hops")]
    RedirectLoop { start: String, limit: usize },

    #[error("{document}: could not find {field} field")]
    MissingField {
        document: String,
        field: &'static str,
    },

    #[error("{context}")]
    RemoteUnavailable {
        context: String,
        #[source]
        source: anyhow::Error,
    },
}

impl PlanetError {
    pub fn remote(context: impl Into<String>, source: anyhow::Error) -> Self {
        Self::RemoteUnavailable {
            context: context.into(),
            source,
        }
    }

    /// Record-level failures are reported per record; everything else stops the batch.
    pub fn is_record_level(&self) -> bool {
        matches!(self, Self::MissingField { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_error_keeps_source_chain() {
        let error = PlanetError::remote("fetch Sol", anyhow::anyhow!("HTTP 503"));
        assert_eq!(error.to_string(), "fetch Sol");
        let source = std::error::Error::source(&error).expect("source");
        assert_eq!(source.to_string(), "HTTP 503");
        assert!(!error.is_record_level());
    }

    #[test]
    fn missing_field_is_record_level() {
        let error = PlanetError::MissingField {
            document: "Sol".to_string(),
            field: "image",
        };
        assert!(error.is_record_level());
        assert_eq!(error.to_string(), "Sol: could not find image field");
    }
}
