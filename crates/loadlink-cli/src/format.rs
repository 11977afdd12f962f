//! Output formatting for link events and discovery records.

use anyhow::Result;
use loadlink_core::{DiscoveryRecord, LinkEvent};

use crate::cli::OutputFormat;

/// Render an event for stdout, or `None` if the format skips it.
///
/// Text output carries only the data a user watches for; everything else
/// already goes to the log. JSON output carries every event, one per line.
pub fn format_event(event: &LinkEvent, format: OutputFormat) -> Result<Option<String>> {
    match format {
        OutputFormat::Json => Ok(Some(serde_json::to_string(event)?)),
        OutputFormat::Text => Ok(format_event_text(event)),
    }
}

fn format_event_text(event: &LinkEvent) -> Option<String> {
    match event {
        LinkEvent::Samples { values } => Some(format_values(values)),
        LinkEvent::Subscribed { id } => Some(format!("# streaming from {}", id)),
        LinkEvent::Disconnected { id } => Some(format!("# disconnected from {}", id)),
        _ => None,
    }
}

/// Space separated values, one notification per line.
pub fn format_values(values: &[i32]) -> String {
    values
        .iter()
        .map(i32::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Render a discovery record from a scan.
pub fn format_record(record: &DiscoveryRecord, is_target: bool, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => {
            let mut value = serde_json::to_value(record)?;
            value["target"] = serde_json::Value::Bool(is_target);
            Ok(serde_json::to_string(&value)?)
        }
        OutputFormat::Text if is_target => Ok(format!("{}\n  ^ target device\n", record)),
        OutputFormat::Text => Ok(format!("{}\n", record)),
    }
}
