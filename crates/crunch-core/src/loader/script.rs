//! Script modules.
//!
//! `<interpreter?> <file> describe` prints the manifest:
//!
//! ```json
//! { "entrypoints": { "infer": { "parameters": [ { "name": "X_test" } ] } } }
//! ```
//!
//! `<interpreter?> <file> call <name> --arguments <json> --output <file>`
//! runs one entrypoint. Tables travel as files referenced by
//! `{"$table": "<path>"}`; the entrypoint writes its result table, if any,
//! to the output path. A last stderr line of the form
//! `ParticipantVisibleError: <message>` marks a participant-visible failure.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map};
use tokio::process::Command;
use tracing::debug;

use super::{Entrypoint, LoadError, UserCodeError, UserModule, UserResult};
use crate::binder::{BoundArguments, FormalParameter, Signature, Value};
use crate::table::{read_table, write_table_as, Table, TableFormat};

pub const MAIN_FILE_ENV: &str = "CRUNCH_MAIN_FILE";
pub const CODE_DIRECTORY_ENV: &str = "CRUNCH_CODE_DIRECTORY";
pub const VISIBLE_ERROR_PREFIX: &str = "ParticipantVisibleError:";
const TABLE_REFERENCE: &str = "$table";

/// How script modules are run.
#[derive(Debug, Clone, Default)]
pub struct ScriptOptions {
    /// Program the file is passed to; the file is executed directly when unset.
    pub interpreter: Option<PathBuf>,

    /// File format used to hand tables over.
    pub table_format: TableFormat,
}

impl ScriptOptions {
    pub fn with_interpreter(mut self, interpreter: impl Into<PathBuf>) -> Self {
        self.interpreter = Some(interpreter.into());
        self
    }

    pub fn with_table_format(mut self, table_format: TableFormat) -> Self {
        self.table_format = table_format;
        self
    }
}

#[derive(Debug, Deserialize)]
struct Manifest {
    entrypoints: BTreeMap<String, ManifestEntry>,
}

#[derive(Debug, Deserialize)]
struct ManifestEntry {
    #[serde(default)]
    parameters: Vec<FormalParameter>,
}

#[derive(Debug)]
struct Script {
    path: PathBuf,
    directory: PathBuf,
    options: ScriptOptions,
}

impl Script {
    fn command(&self) -> Command {
        let mut command = match &self.options.interpreter {
            Some(interpreter) => {
                let mut command = Command::new(interpreter);
                command.arg(&self.path);
                command
            }
            None => Command::new(&self.path),
        };

        command
            .current_dir(&self.directory)
            .env(MAIN_FILE_ENV, &self.path)
            .env(CODE_DIRECTORY_ENV, &self.directory)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        command
    }
}

pub(super) async fn load(path: &Path, options: &ScriptOptions) -> Result<UserModule, LoadError> {
    let path = std::fs::canonicalize(path).map_err(|_| LoadError::NotFound {
        path: path.display().to_string(),
    })?;
    let directory = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let origin = path.display().to_string();

    let script = Arc::new(Script {
        path,
        directory,
        options: options.clone(),
    });

    let output = script
        .command()
        .arg("describe")
        .output()
        .await
        .map_err(|source| LoadError::Spawn {
            path: origin.clone(),
            source,
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(LoadError::Failed {
            path: origin,
            message: failure_message(&stderr, output.status),
        });
    }

    let manifest: Manifest =
        serde_json::from_slice(&output.stdout).map_err(|e| LoadError::InvalidManifest {
            path: origin.clone(),
            message: e.to_string(),
        })?;

    debug!(
        path = %origin,
        entrypoints = ?manifest.entrypoints.keys().collect::<Vec<_>>(),
        "loaded script module"
    );

    let mut builder = UserModule::builder(origin);
    for (name, entry) in manifest.entrypoints {
        let entrypoint = ScriptEntrypoint {
            script: Arc::clone(&script),
            name: name.clone(),
            signature: Signature::new(entry.parameters),
        };
        builder = builder.with_entrypoint(name, Arc::new(entrypoint));
    }

    Ok(builder.build())
}

struct ScriptEntrypoint {
    script: Arc<Script>,
    name: String,
    signature: Signature,
}

#[async_trait]
impl Entrypoint for ScriptEntrypoint {
    fn signature(&self) -> &Signature {
        &self.signature
    }

    async fn call(&self, arguments: BoundArguments) -> UserResult<Option<Table>> {
        let scratch = tempfile::Builder::new()
            .prefix("crunch-call-")
            .tempdir()
            .map_err(|e| UserCodeError::Internal(format!("cannot create scratch directory: {e}")))?;

        let format = self.script.options.table_format;
        let encoded = encode_arguments(&arguments, scratch.path(), format)?;
        let output_path = scratch.path().join(format!("output.{}", format.extension()));

        let output = self
            .script
            .command()
            .arg("call")
            .arg(&self.name)
            .arg("--arguments")
            .arg(encoded.to_string())
            .arg("--output")
            .arg(&output_path)
            .stdout(Stdio::inherit())
            .output()
            .await
            .map_err(|e| UserCodeError::Internal(format!("cannot run {}: {e}", self.name)))?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            return Err(classify_failure(&stderr, output.status));
        }
        if !stderr.is_empty() {
            eprint!("{stderr}");
        }

        if !output_path.exists() {
            return Ok(None);
        }

        read_table(&output_path)
            .map(Some)
            .map_err(|e| UserCodeError::Internal(format!("cannot read {} output: {e}", self.name)))
    }
}

fn encode_arguments(
    arguments: &BoundArguments,
    directory: &Path,
    format: TableFormat,
) -> UserResult<serde_json::Value> {
    let mut object = Map::new();

    for (name, value) in arguments.iter() {
        let encoded = match value {
            Value::Table(table) => {
                let path = directory.join(format!("{name}.{}", format.extension()));
                write_table_as(table, &path, format).map_err(|e| {
                    UserCodeError::Internal(format!("cannot hand over {name}: {e}"))
                })?;
                json!({ TABLE_REFERENCE: path.to_string_lossy() })
            }
            Value::Path(path) => json!(path.to_string_lossy()),
            Value::Text(text) => json!(text),
            Value::Integer(value) => json!(value),
            Value::Flag(value) => json!(value),
            Value::Columns(columns) => json!(columns),
            Value::ColumnNames(column_names) => json!(column_names.as_ref()),
            Value::Names(names) => json!(names),
        };
        object.insert(name.to_string(), encoded);
    }

    Ok(serde_json::Value::Object(object))
}

fn classify_failure(stderr: &str, status: ExitStatus) -> UserCodeError {
    let last = stderr.lines().rev().find(|line| !line.trim().is_empty());

    match last.and_then(|line| line.trim().strip_prefix(VISIBLE_ERROR_PREFIX)) {
        Some(message) => UserCodeError::Visible(message.trim().to_string()),
        None => UserCodeError::Internal(failure_message(stderr, status)),
    }
}

fn failure_message(stderr: &str, status: ExitStatus) -> String {
    let stderr = stderr.trim();
    if stderr.is_empty() {
        format!("exited with {status}")
    } else {
        stderr.to_string()
    }
}
