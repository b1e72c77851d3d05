//! Schema loading.

use std::path::Path;

use liveset_engine::{CollectionSchema, FieldDef, FieldType, Schema};

/// Schema used when no schema file is configured.
///
/// `todos` is an open collection for application data; `users` holds basic
/// auth credentials.
pub fn default_schema() -> Schema {
    Schema::new(1)
        .with_collection(CollectionSchema::new(
            "todos",
            vec![
                FieldDef::required("text", FieldType::String),
                FieldDef::optional("done", FieldType::Bool),
                FieldDef::optional("rank", FieldType::Int),
                FieldDef::optional("meta", FieldType::Json),
            ],
        ))
        .with_collection(
            CollectionSchema::new(
                "users",
                vec![
                    FieldDef::required("user", FieldType::String),
                    FieldDef::required("pass_hash", FieldType::String),
                ],
            )
            .strict(),
        )
}

/// Read a JSON schema file, or fall back to [`default_schema`].
pub fn load_schema(path: Option<&Path>) -> Result<Schema, SchemaError> {
    let Some(path) = path else {
        return Ok(default_schema());
    };

    let raw = std::fs::read_to_string(path).map_err(|source| SchemaError::Read {
        path: path.display().to_string(),
        source,
    })?;

    let mut schema: Schema = serde_json::from_str(&raw)?;

    // Collections are keyed by name; make sure the embedded names agree.
    for (name, collection) in schema.collections.iter_mut() {
        collection.name = name.clone();
    }

    tracing::info!(
        path = %path.display(),
        version = schema.version,
        collections = schema.collections.len(),
        "Loaded schema"
    );

    Ok(schema)
}

/// Schema loading errors.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("Failed to read schema file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Invalid schema file: {0}")]
    Parse(#[from] serde_json::Error),
}
