//! Health-check directive rendering.

use crate::model::HealthMonitor;
use crate::render::codes::ExpectedCodesError;
use crate::render::dialect::{fill, DialectTables};

/// Render the health-check directives for a monitor.
///
/// Unknown monitor types render nothing. A template referencing `{codes}`
/// is skipped when the expected codes expand to an empty set.
pub fn health_lines(
    tables: &DialectTables,
    monitor: &HealthMonitor,
) -> Result<Vec<String>, ExpectedCodesError> {
    let templates = tables.health_for(monitor.monitor_type);
    if templates.is_empty() {
        return Ok(Vec::new());
    }

    let codes = if templates.iter().any(|t| t.contains("{codes}")) {
        tables
            .code_policy
            .expand(&monitor.expected_codes)?
            .join(tables.code_separator)
    } else {
        String::new()
    };

    let interval = (u64::from(monitor.delay) * 1000).to_string();
    let timeout = (u64::from(monitor.timeout) * 1000).to_string();
    let delay_s = monitor.delay.to_string();
    let timeout_s = monitor.timeout.to_string();
    let fall = monitor.max_retries.to_string();

    let vars = [
        ("interval", interval.as_str()),
        ("timeout", timeout.as_str()),
        ("delay_s", delay_s.as_str()),
        ("timeout_s", timeout_s.as_str()),
        ("fall", fall.as_str()),
        ("method", monitor.http_method.as_str()),
        ("path", monitor.url_path.as_str()),
        ("codes", codes.as_str()),
    ];

    Ok(templates
        .iter()
        .filter(|t| !(t.contains("{codes}") && codes.is_empty()))
        .map(|t| fill(t, &vars))
        .collect())
}
