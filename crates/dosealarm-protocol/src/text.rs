//! Alarm text rendering shared by every notifier.

use crate::MedicationSummary;

/// Text for a due (or repeated) alarm.
pub fn primary_message(medication: &MedicationSummary, user_name: Option<&str>) -> String {
    let text = format!(
        "Time to take {} of {}",
        medication.quantity, medication.name
    );
    with_user(text, user_name)
}

/// Text for a pre-reminder fired `offset_minutes` before the dose.
pub fn reminder_message(
    medication: &MedicationSummary,
    offset_minutes: u32,
    user_name: Option<&str>,
) -> String {
    let unit = if offset_minutes == 1 { "minute" } else { "minutes" };
    let text = format!(
        "In {offset_minutes} {unit} it will be time to take {} of {}",
        medication.quantity, medication.name
    );
    with_user(text, user_name)
}

fn with_user(text: String, user_name: Option<&str>) -> String {
    match user_name.map(str::trim) {
        Some(name) if !name.is_empty() => format!("{text}, {name}"),
        _ => text,
    }
}
