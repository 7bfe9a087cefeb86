//! Turns a thread snapshot into the human-readable text returned to the
//! assistant: the final message, any plan/code sections, and table artifacts
//! rendered as delimited text.

use crate::wire::{Artifact, InteractionState, ThreadState};

const NO_ANSWER: &str = "No answer received from the query service.";

/// Render the response content for one interaction.
///
/// Artifact extraction never fails the call: artifacts that are not tables,
/// or whose data is malformed, are listed by identifier instead.
pub fn render_interaction(state: &ThreadState, interaction: &InteractionState) -> String {
    let mut text = interaction
        .assistant_actions
        .iter()
        .rev()
        .find_map(|a| a.message.as_deref().filter(|m| !m.is_empty()))
        .unwrap_or(NO_ANSWER)
        .to_string();

    append_section(&mut text, "Execution Plan", first_field(interaction, |a| a.plan.as_deref()));
    append_section(&mut text, "Executed Code", first_field(interaction, |a| a.code.as_deref()));
    append_section(
        &mut text,
        "Code Output",
        first_field(interaction, |a| a.code_output.as_deref()),
    );

    let identifiers: Vec<&str> = interaction
        .assistant_actions
        .iter()
        .flat_map(|a| a.artifact_identifiers.iter().map(String::as_str))
        .collect();

    let mut unrendered: Vec<&str> = Vec::new();
    if identifiers.is_empty() {
        // No explicit references; render whatever the response modified.
        for artifact in &state.modified_artifacts {
            append_artifact(&mut text, artifact, &mut unrendered);
        }
    } else {
        for id in identifiers {
            match state
                .modified_artifacts
                .iter()
                .find(|a| a.identifier.as_deref() == Some(id))
            {
                Some(artifact) => append_artifact(&mut text, artifact, &mut unrendered),
                None => unrendered.push(id),
            }
        }
    }

    if !unrendered.is_empty() {
        text.push_str(&format!(
            "\n\n**Artifacts Generated:** {}",
            unrendered.join(", ")
        ));
    }

    text
}

fn first_field<'a>(
    interaction: &'a InteractionState,
    field: impl Fn(&'a crate::wire::AssistantAction) -> Option<&'a str>,
) -> Option<&'a str> {
    interaction
        .assistant_actions
        .iter()
        .find_map(|a| field(a).filter(|s| !s.is_empty()))
}

fn append_section(text: &mut String, header: &str, section: Option<&str>) {
    if let Some(section) = section {
        text.push_str(&format!("\n\n**{}:**\n{}", header, section));
    }
}

fn append_artifact<'a>(text: &mut String, artifact: &'a Artifact, unrendered: &mut Vec<&'a str>) {
    match render_table(artifact) {
        Some(table) => {
            text.push_str("\n\n");
            text.push_str(&table);
        }
        None => {
            tracing::debug!(
                identifier = artifact.identifier.as_deref().unwrap_or("?"),
                artifact_type = artifact.artifact_type.as_deref().unwrap_or("?"),
                "Artifact not renderable as a table; listing identifier only"
            );
            if let Some(id) = artifact.identifier.as_deref() {
                unrendered.push(id);
            }
        }
    }
}

/// Render a table artifact as delimited text: header row, dash separator,
/// then data rows. Returns None for non-table or malformed artifacts.
pub fn render_table(artifact: &Artifact) -> Option<String> {
    if artifact.artifact_type.as_deref() != Some("table") {
        return None;
    }

    let rows = artifact.data.as_ref()?.as_array()?;
    let first = rows.first()?.as_object()?;
    let columns: Vec<&str> = first.keys().map(String::as_str).collect();
    if columns.is_empty() {
        return None;
    }

    let mut lines = Vec::with_capacity(rows.len() + 3);
    if let Some(title) = artifact.title.as_deref().filter(|t| !t.is_empty()) {
        lines.push(format!("**{}**", title));
    }
    lines.push(columns.join(" | "));
    lines.push(
        columns
            .iter()
            .map(|c| "-".repeat(c.len().max(3)))
            .collect::<Vec<_>>()
            .join(" | "),
    );

    for row in rows {
        let object = row.as_object()?;
        let cells: Vec<String> = columns
            .iter()
            .map(|c| match object.get(*c) {
                None | Some(serde_json::Value::Null) => String::new(),
                Some(serde_json::Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
            })
            .collect();
        lines.push(cells.join(" | "));
    }

    Some(lines.join("\n"))
}
