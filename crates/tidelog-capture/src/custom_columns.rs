//! Evaluates user-configured custom-column commands (§4.5).

use log::warn;
use tidelog_core::config::CustomColumnDefinition;
use tidelog_core::entry::CustomColumn;

/// Runs every configured `ColumnCommand` through the shell and captures its
/// trimmed stdout. A nonzero exit is logged but does not drop the column —
/// whatever the command printed is still recorded.
pub async fn evaluate_all(definitions: &[CustomColumnDefinition]) -> Vec<CustomColumn> {
    let mut columns = Vec::with_capacity(definitions.len());
    for definition in definitions {
        columns.push(evaluate_one(definition).await);
    }
    columns
}

async fn evaluate_one(definition: &CustomColumnDefinition) -> CustomColumn {
    let output = tokio::process::Command::new("sh")
        .arg("-c")
        .arg(&definition.column_command)
        .output()
        .await;

    let value = match output {
        Ok(output) => {
            if !output.status.success() {
                warn!(
                    "custom column {:?} exited with {:?}",
                    definition.column_name, output.status
                );
            }
            String::from_utf8_lossy(&output.stdout).trim().to_string()
        }
        Err(err) => {
            warn!("custom column {:?} failed to run: {err}", definition.column_name);
            String::new()
        }
    };

    CustomColumn { name: definition.column_name.clone(), value }
}
