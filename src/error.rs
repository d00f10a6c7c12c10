use crate::di::{PackageName, ProviderKey};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Provider already registered: {key}")]
    DuplicateProvider { key: ProviderKey },

    #[error("Provider not found: {key}")]
    ProviderNotFound { key: ProviderKey },

    #[error("Provider {key} produces {registered}, requested as {requested}")]
    ProviderTypeMismatch {
        key: ProviderKey,
        registered: &'static str,
        requested: &'static str,
    },

    #[error("Failed to instantiate {key}: {source}")]
    Instantiation {
        key: ProviderKey,
        #[source]
        source: SharedError,
    },

    #[error("Instantiation cycle detected: {cycle}")]
    InstantiationCycle { cycle: String },

    #[error("Initializer already registered for package {package}")]
    DuplicateInitializer { package: PackageName },

    #[error("Initializer {package} references unknown package {missing}")]
    UnknownInitializer {
        package: PackageName,
        missing: PackageName,
    },

    #[error("Initializer ordering cycle: {}", join_cycle(.packages))]
    InitializerCycle { packages: Vec<PackageName> },

    #[error("Initializer {package} failed: {source}")]
    Initializer {
        package: PackageName,
        #[source]
        source: anyhow::Error,
    },

    #[error("Interceptor already registered: {name}")]
    DuplicateInterceptor { name: String },

    #[error("Interceptor ordering cycle: {}", .names.join(" -> "))]
    InterceptorCycle { names: Vec<String> },

    #[error("{what} called after the server started running")]
    RegistrationClosed { what: String },

    #[error("Invalid configuration for {key}: {message}")]
    Config { key: String, message: String },

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Listener {role} stopped serving: {message}")]
    Serve { role: String, message: String },

    #[error("Key {key:?} already bound to a handler")]
    DuplicateKeyHandler { key: String },

    #[error("Debug handler already registered: {path}")]
    DuplicateDebugHandler { path: String },

    #[error(transparent)]
    Lifecycle(#[from] crate::lifecycle::LifecycleError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn join_cycle(packages: &[PackageName]) -> String {
    packages
        .iter()
        .map(PackageName::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// A provider failure that can be handed to every caller of a memoized singleton.
#[derive(Clone)]
pub struct SharedError(Arc<anyhow::Error>);

impl SharedError {
    pub fn new(error: anyhow::Error) -> Self {
        Self(Arc::new(error))
    }

    pub fn inner(&self) -> &anyhow::Error {
        &self.0
    }
}

impl fmt::Debug for SharedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl fmt::Display for SharedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#}", self.0)
    }
}

impl std::error::Error for SharedError {}

impl axum::response::IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            Error::ProviderNotFound { .. } => axum::http::StatusCode::NOT_FOUND,
            Error::RegistrationClosed { .. } => axum::http::StatusCode::CONFLICT,
            _ => axum::http::StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}
