//! User code loading.
//!
//! A [`UserModule`] is a named set of [`Entrypoint`]s. Modules come either
//! from Rust closures ([`UserModule::builder`]) or from a script file
//! speaking the describe/call protocol ([`UserModule::load`]).

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::binder::{BoundArguments, Signature};
use crate::table::Table;

mod script;

pub use script::{ScriptOptions, CODE_DIRECTORY_ENV, MAIN_FILE_ENV, VISIBLE_ERROR_PREFIX};

pub const TRAIN: &str = "train";
pub const INFER: &str = "infer";

/// Failures while loading user code.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("code file not found: {path}")]
    NotFound { path: String },

    #[error("failed to start {path}: {source}")]
    Spawn {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("loading {path} failed: {message}")]
    Failed { path: String, message: String },

    #[error("invalid entrypoint manifest from {path}: {message}")]
    InvalidManifest { path: String, message: String },

    #[error("no {name} function found")]
    MissingEntrypoint { name: String },
}

/// Failure raised by user code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UserCodeError {
    /// Message meant for the participant.
    #[error("{0}")]
    Visible(String),

    /// Anything else, with its trace.
    #[error("user code failed:\n{0}")]
    Internal(String),
}

impl UserCodeError {
    pub fn trace(&self) -> &str {
        match self {
            Self::Visible(message) => message,
            Self::Internal(trace) => trace,
        }
    }
}

pub type UserResult<T> = Result<T, UserCodeError>;

/// A callable of a user module.
#[async_trait]
pub trait Entrypoint: Send + Sync {
    fn signature(&self) -> &Signature;

    async fn call(&self, arguments: BoundArguments) -> UserResult<Option<Table>>;
}

type EntrypointFn = dyn Fn(BoundArguments) -> UserResult<Option<Table>> + Send + Sync;

struct FnEntrypoint {
    signature: Signature,
    function: Box<EntrypointFn>,
}

#[async_trait]
impl Entrypoint for FnEntrypoint {
    fn signature(&self) -> &Signature {
        &self.signature
    }

    async fn call(&self, arguments: BoundArguments) -> UserResult<Option<Table>> {
        (self.function)(arguments)
    }
}

/// A loaded module.
#[derive(Clone)]
pub struct UserModule {
    origin: String,
    entrypoints: BTreeMap<String, Arc<dyn Entrypoint>>,
}

impl fmt::Debug for UserModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserModule")
            .field("origin", &self.origin)
            .field("entrypoints", &self.entrypoints.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl UserModule {
    pub fn builder(origin: impl Into<String>) -> UserModuleBuilder {
        UserModuleBuilder {
            module: Self {
                origin: origin.into(),
                entrypoints: BTreeMap::new(),
            },
        }
    }

    /// Load a script module from `path`.
    pub async fn load(path: &Path, options: &ScriptOptions) -> Result<Self, LoadError> {
        script::load(path, options).await
    }

    /// Where the module came from.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn entrypoint_names(&self) -> impl Iterator<Item = &str> {
        self.entrypoints.keys().map(String::as_str)
    }

    pub fn ensure_function(&self, name: &str) -> Result<Arc<dyn Entrypoint>, LoadError> {
        self.entrypoints
            .get(name)
            .cloned()
            .ok_or_else(|| LoadError::MissingEntrypoint {
                name: name.to_string(),
            })
    }
}

pub struct UserModuleBuilder {
    module: UserModule,
}

impl UserModuleBuilder {
    pub fn entrypoint<F>(mut self, name: impl Into<String>, signature: Signature, function: F) -> Self
    where
        F: Fn(BoundArguments) -> UserResult<Option<Table>> + Send + Sync + 'static,
    {
        self.module.entrypoints.insert(
            name.into(),
            Arc::new(FnEntrypoint {
                signature,
                function: Box::new(function),
            }),
        );
        self
    }

    pub fn with_entrypoint(mut self, name: impl Into<String>, entrypoint: Arc<dyn Entrypoint>) -> Self {
        self.module.entrypoints.insert(name.into(), entrypoint);
        self
    }

    pub fn build(self) -> UserModule {
        self.module
    }
}

/// The `train`/`infer` pair the time-series loop needs.
#[derive(Clone)]
pub struct Handler {
    pub train: Arc<dyn Entrypoint>,
    pub infer: Arc<dyn Entrypoint>,
}

impl Handler {
    pub fn from_module(module: &UserModule) -> Result<Self, LoadError> {
        Ok(Self {
            train: module.ensure_function(TRAIN)?,
            infer: module.ensure_function(INFER)?,
        })
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("train", self.train.signature())
            .field("infer", self.infer.signature())
            .finish()
    }
}
