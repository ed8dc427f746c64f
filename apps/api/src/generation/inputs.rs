//! Builds the `inputs` map sent to the workflow engine.

use serde_json::{Map, Value};

use crate::documents::policy::RevisionScope;
use crate::errors::AppError;
use crate::generation::paragraphs::paragraph_at;
use crate::models::document::{Document, RevisionSettings};

/// Keys the service sets itself; form fields with these names are overwritten.
const RESERVED_KEYS: [&str; 2] = ["document_type", "language"];

fn form_fields(root: &Document) -> Result<Map<String, Value>, AppError> {
    match &root.form_data {
        Value::Object(map) => Ok(map.clone()),
        Value::Null => Ok(Map::new()),
        _ => Err(AppError::Validation(
            "form_data must be a JSON object".to_string(),
        )),
    }
}

fn is_filled(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
        _ => true,
    }
}

fn with_document_context(mut inputs: Map<String, Value>, root: &Document) -> Map<String, Value> {
    inputs.insert(
        "document_type".to_string(),
        Value::String(root.document_type.as_str().to_string()),
    );
    inputs.insert("language".to_string(), Value::String(root.language.clone()));
    inputs
}

/// Inputs for the initial generation: the stored form, optionally overridden
/// field by field. At least one filled form field is required.
pub fn generation_inputs(
    root: &Document,
    overrides: Option<Map<String, Value>>,
) -> Result<Map<String, Value>, AppError> {
    let mut inputs = form_fields(root)?;
    if let Some(overrides) = overrides {
        inputs.extend(overrides);
    }

    let has_field = inputs
        .iter()
        .any(|(k, v)| !RESERVED_KEYS.contains(&k.as_str()) && is_filled(v));
    if !has_field {
        return Err(AppError::Validation(
            "form_data is required before generation".to_string(),
        ));
    }

    Ok(with_document_context(inputs, root))
}

/// Inputs for a revision of `source`'s content.
pub fn revision_inputs(
    root: &Document,
    source: &Document,
    scope: RevisionScope,
    settings: &RevisionSettings,
) -> Result<Map<String, Value>, AppError> {
    if source.content.trim().is_empty() {
        return Err(AppError::Validation(
            "document has no content to revise".to_string(),
        ));
    }

    let mut inputs = form_fields(root)?;
    inputs.insert(
        "original_content".to_string(),
        Value::String(source.content.clone()),
    );
    inputs.insert("styles".to_string(), Value::String(settings.styles.join(", ")));
    inputs.insert(
        "word_control".to_string(),
        Value::String(settings.word_control.as_str().to_string()),
    );
    inputs.insert(
        "target_word_count".to_string(),
        settings
            .target_word_count
            .map(Value::from)
            .unwrap_or_else(|| Value::String(String::new())),
    );
    inputs.insert(
        "direction".to_string(),
        Value::String(settings.free_text_direction.clone()),
    );

    let paragraph = match scope {
        RevisionScope::Document => String::new(),
        RevisionScope::Paragraph { index } => paragraph_at(&source.content, index)?.to_string(),
    };
    inputs.insert("paragraph".to_string(), Value::String(paragraph));

    Ok(with_document_context(inputs, root))
}
