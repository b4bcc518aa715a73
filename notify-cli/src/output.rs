use campus_notify::{ConnectionStatus, LocalAlert, NotificationRecord};
#[cfg(feature = "colored-output")]
use colored::*;

pub struct OutputManager {
    colored: bool,
}

impl OutputManager {
    pub fn new(colored: bool) -> Self {
        Self { colored }
    }

    pub fn colored(&self) -> bool {
        self.colored
    }

    /// One line per record, newest first, unread records marked with `*`.
    pub fn format_records(&self, records: &[NotificationRecord]) -> String {
        if records.is_empty() {
            return "No notifications".to_string();
        }
        records
            .iter()
            .map(|record| self.format_record(record))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn format_record(&self, record: &NotificationRecord) -> String {
        let marker = if record.is_read() { " " } else { "*" };
        let id = format!("#{}", record.id);
        let mut line = format!(
            "{} {:>6}  {:<22} {}",
            marker,
            self.colorize(&id, Color::Cyan, false),
            record.kind.as_str(),
            self.colorize(&record.title, Color::Green, !record.is_read()),
        );
        if !record.message.is_empty() {
            line.push_str(" - ");
            line.push_str(&record.message);
        }
        if let Some(related) = record.related_entity_id {
            line.push_str(&format!(" (appointment {related})"));
        }
        line
    }

    pub fn format_unread(&self, count: u64) -> String {
        format!(
            "{} unread",
            self.colorize(&count.to_string(), Color::Yellow, true)
        )
    }

    pub fn format_alert(&self, alert: &LocalAlert) -> String {
        let header = self.colorize("New notification", Color::Yellow, true);
        if alert.body.is_empty() {
            format!("{header} #{}: {}", alert.data.notification_id, alert.title)
        } else {
            format!(
                "{header} #{}: {} - {}",
                alert.data.notification_id, alert.title, alert.body
            )
        }
    }

    pub fn format_status(&self, status: ConnectionStatus) -> String {
        let color = match status {
            ConnectionStatus::Connected => Color::Green,
            ConnectionStatus::Connecting | ConnectionStatus::Idle => Color::Blue,
            ConnectionStatus::Error => Color::Yellow,
        };
        format!("Live channel {}", self.colorize(status.as_str(), color, false))
    }

    fn colorize(&self, text: &str, color: Color, bold: bool) -> String {
        #[cfg(feature = "colored-output")]
        {
            if self.colored {
                let colored_text = match color {
                    Color::Green => text.green(),
                    Color::Yellow => text.yellow(),
                    Color::Blue => text.blue(),
                    Color::Cyan => text.cyan(),
                };
                if bold {
                    colored_text.bold().to_string()
                } else {
                    colored_text.to_string()
                }
            } else {
                text.to_string()
            }
        }

        #[cfg(not(feature = "colored-output"))]
        {
            let _ = (self.colored, color, bold);
            text.to_string()
        }
    }
}

#[derive(Clone, Copy)]
enum Color {
    Green,
    Yellow,
    Blue,
    Cyan,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_record_line() {
        let out = OutputManager::new(false);
        let record = NotificationRecord::new(12, "Booked", "Tomorrow 10:00")
            .with_kind("APPOINTMENT_CREATED")
            .with_related_entity(7);
        let line = out.format_record(&record);
        assert!(line.starts_with('*'));
        assert!(line.contains("#12"));
        assert!(line.contains("APPOINTMENT_CREATED"));
        assert!(line.contains("Booked - Tomorrow 10:00"));
        assert!(line.ends_with("(appointment 7)"));
    }

    #[test]
    fn test_read_record_is_unmarked() {
        let out = OutputManager::new(false);
        let record = NotificationRecord::new(1, "Old", "").with_read_at("2024-01-01T00:00:00Z");
        assert!(out.format_record(&record).starts_with(' '));
    }

    #[test]
    fn test_empty_list() {
        assert_eq!(OutputManager::new(false).format_records(&[]), "No notifications");
    }
}
