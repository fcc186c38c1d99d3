//! Conversions from external infrastructure errors into domain errors.

use livlink_domain::LivError;
use reqwest::Error as HttpError;
use url::ParseError as UrlError;

/// Error newtype that keeps conversions on the infrastructure side and can be
/// converted back into the domain error.
#[derive(Debug)]
pub struct InfraError(pub LivError);

impl From<InfraError> for LivError {
    fn from(value: InfraError) -> Self {
        value.0
    }
}

impl From<LivError> for InfraError {
    fn from(value: LivError) -> Self {
        InfraError(value)
    }
}

trait IntoLivError {
    fn into_liv(self) -> LivError;
}

/* -------------------------------------------------------------------------- */
/* reqwest::Error → LivError */
/* -------------------------------------------------------------------------- */

impl IntoLivError for HttpError {
    fn into_liv(self) -> LivError {
        if self.is_timeout() {
            return LivError::Timeout("HTTP request timed out".into());
        }

        if self.is_connect() {
            return LivError::Connection(format!("HTTP connection failure: {self}"));
        }

        if self.is_builder() {
            return LivError::Internal(format!("invalid HTTP request: {self}"));
        }

        if self.is_decode() {
            return LivError::Serialization(format!("invalid response body: {self}"));
        }

        // Request and body errors happen mid-flight and are worth a retry
        LivError::Connection(format!("HTTP transport error: {self}"))
    }
}

impl From<HttpError> for InfraError {
    fn from(value: HttpError) -> Self {
        InfraError(value.into_liv())
    }
}

/* -------------------------------------------------------------------------- */
/* url::ParseError → LivError */
/* -------------------------------------------------------------------------- */

impl IntoLivError for UrlError {
    fn into_liv(self) -> LivError {
        LivError::Config(format!("invalid service URL: {self}"))
    }
}

impl From<UrlError> for InfraError {
    fn from(value: UrlError) -> Self {
        InfraError(value.into_liv())
    }
}
