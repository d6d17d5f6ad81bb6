//! Error types for minikube

use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Unsupported driver: {0}")]
    UnsupportedDriver(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Machine does not exist: {0}")]
    HostNotFound(String),

    #[error("{0}")]
    Retriable(Box<Error>),

    #[error(
        "Service {namespace}/{name} does not have a node port. To have one assigned automatically, \
         the service type must be NodePort or LoadBalancer, but this service is of type {service_type}."
    )]
    MissingNodePort {
        namespace: String,
        name: String,
        service_type: String,
    },

    #[error(transparent)]
    Multi(MultiError),

    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Command failed: {0}")]
    Command(String),

    #[error("Unrecognized output: {0}")]
    UnrecognizedOutput(String),

    #[error("Endpoint for service is not ready yet: {0}")]
    NotReady(String),

    #[error("Certificate error: {0}")]
    Certificate(#[from] rcgen::Error),

    #[error("Template error: {0}")]
    Template(#[from] minijinja::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Download error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Wrap an error so callers know a retry is appropriate
    pub fn retriable(err: impl Into<Error>) -> Self {
        match err.into() {
            e @ Error::Retriable(_) => e,
            e => Error::Retriable(Box::new(e)),
        }
    }

    /// True if this error, or the error it annotates, is marked retriable
    pub fn is_retriable(&self) -> bool {
        match self {
            Error::Retriable(_) => true,
            Error::Context { source, .. } => source.is_retriable(),
            _ => false,
        }
    }

    pub fn is_missing_node_port(&self) -> bool {
        match self {
            Error::MissingNodePort { .. } => true,
            Error::Context { source, .. } => source.is_missing_node_port(),
            _ => false,
        }
    }

    pub fn is_unsupported_driver(&self) -> bool {
        match self {
            Error::UnsupportedDriver(_) => true,
            Error::Context { source, .. } => source.is_unsupported_driver(),
            _ => false,
        }
    }

    pub fn context(self, context: impl Into<String>) -> Self {
        Error::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

/// Attach the failing operation to an error before it crosses a component boundary
pub trait ResultExt<T> {
    fn context(self, context: impl Into<String>) -> Result<T>;

    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().context(context))
    }

    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| e.into().context(f()))
    }
}

/// Independent failures collected so none of them is hidden by another
#[derive(Debug, Default)]
pub struct MultiError {
    pub errors: Vec<Error>,
}

impl MultiError {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, err: Error) {
        self.errors.push(err);
    }

    pub fn collect<T>(&mut self, result: Result<T>) {
        if let Err(e) = result {
            self.push(e);
        }
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// `Ok` when nothing was collected, else [`into_error`](Self::into_error)
    pub fn into_result(self) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self.into_error())
        }
    }

    /// The lone error when one was collected, the aggregate otherwise
    pub fn into_error(mut self) -> Error {
        if self.errors.len() == 1 {
            self.errors.remove(0)
        } else {
            Error::Multi(self)
        }
    }
}

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<String> = self.errors.iter().map(|e| e.to_string()).collect();
        write!(f, "{}", messages.join("\n"))
    }
}

impl std::error::Error for MultiError {}
