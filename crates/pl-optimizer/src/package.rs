//! The on-disk layout of a logged model.

use chrono::Utc;
use pl_model::Estimator;
use pl_types::PlResult;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::Path;
use uuid::Uuid;

/// Serialized estimator inside the model directory.
pub const MODEL_FILE: &str = "model.json";

/// Environment descriptors written next to the model. Promotion skips them.
pub const ENVIRONMENT_MANIFESTS: [&str; 3] = ["requirements.txt", "python_env.yaml", "conda.yaml"];

/// Column and class names the model was trained on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSchema {
    pub feature_names: Vec<String>,
    pub classes: Vec<String>,
}

fn yaml_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Write `model` and its descriptors into `dir` (created if missing).
///
/// Layout: `model.json`, `MLmodel`, `input_example.json` (when an example row
/// is given) and the [`ENVIRONMENT_MANIFESTS`].
pub fn write_model_dir<M: Estimator>(
    dir: &Path,
    model: &M,
    schema: &ModelSchema,
    run_id: &str,
    input_example: Option<&[f64]>,
) -> PlResult<()> {
    std::fs::create_dir_all(dir)?;
    std::fs::write(dir.join(MODEL_FILE), serde_json::to_vec_pretty(model)?)?;

    let inputs: Vec<_> = schema
        .feature_names
        .iter()
        .map(|name| json!({ "name": name, "type": "double" }))
        .collect();
    let artifact_path = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "model".to_string());
    let version = env!("CARGO_PKG_VERSION");

    let mut mlmodel = String::new();
    mlmodel.push_str(&format!("artifact_path: {artifact_path}\n"));
    mlmodel.push_str("flavors:\n");
    mlmodel.push_str("  plinth:\n");
    mlmodel.push_str(&format!("    estimator: {}\n", model.flavor()));
    mlmodel.push_str(&format!("    model_file: {MODEL_FILE}\n"));
    mlmodel.push_str(&format!("    classes: {}\n", serde_json::to_string(&schema.classes)?));
    mlmodel.push_str(&format!("    plinth_version: {version}\n"));
    mlmodel.push_str(&format!("model_uuid: {}\n", Uuid::new_v4().simple()));
    mlmodel.push_str(&format!("run_id: {run_id}\n"));
    if input_example.is_some() {
        mlmodel.push_str("saved_input_example_info:\n");
        mlmodel.push_str("  artifact_path: input_example.json\n");
        mlmodel.push_str("  type: dataframe\n");
        mlmodel.push_str("  pandas_orient: split\n");
    }
    mlmodel.push_str("signature:\n");
    mlmodel.push_str(&format!(
        "  inputs: {}\n",
        yaml_quote(&serde_json::to_string(&inputs)?)
    ));
    mlmodel.push_str(&format!(
        "  outputs: {}\n",
        yaml_quote(r#"[{"type": "long"}]"#)
    ));
    mlmodel.push_str(&format!(
        "utc_time_created: {}\n",
        yaml_quote(&Utc::now().format("%Y-%m-%d %H:%M:%S%.6f").to_string())
    ));
    std::fs::write(dir.join("MLmodel"), mlmodel)?;

    if let Some(row) = input_example {
        let example = json!({ "columns": schema.feature_names, "data": [row] });
        std::fs::write(dir.join("input_example.json"), serde_json::to_vec(&example)?)?;
    }

    std::fs::write(dir.join("requirements.txt"), format!("plinth=={version}\n"))?;
    std::fs::write(
        dir.join("python_env.yaml"),
        "python: 3.11\nbuild_dependencies:\n  - pip\ndependencies:\n  - -r requirements.txt\n",
    )?;
    std::fs::write(
        dir.join("conda.yaml"),
        format!(
            "name: plinth_env\nchannels:\n  - conda-forge\ndependencies:\n  - python=3.11\n  - pip\n  - pip:\n    - plinth=={version}\n"
        ),
    )?;
    Ok(())
}
