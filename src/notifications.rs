use std::fmt;

/// Severity of a conversion notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum NotificationLevel {
    Info,
    Warning,
    Error,
}

impl fmt::Display for NotificationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            NotificationLevel::Info => "INFO",
            NotificationLevel::Warning => "WARNING",
            NotificationLevel::Error => "ERROR",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub level: NotificationLevel,
    /// Component that raised the notification, e.g. `ingress-nginx` or `converter`.
    pub source: String,
    /// Object the message is about, usually `namespace/name`.
    pub object: String,
    pub message: String,
}

/// Collects every message produced during conversion so the user gets a
/// single report once the output has been written.
#[derive(Debug, Default, Clone)]
pub struct Notifications {
    items: Vec<Notification>,
}

impl Notifications {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(
        &mut self,
        level: NotificationLevel,
        source: &str,
        object: impl fmt::Display,
        message: impl Into<String>,
    ) {
        let notification = Notification {
            level,
            source: source.to_string(),
            object: object.to_string(),
            message: message.into(),
        };
        match level {
            NotificationLevel::Info => tracing::debug!(
                source = %notification.source,
                object = %notification.object,
                "{}",
                notification.message
            ),
            NotificationLevel::Warning => tracing::warn!(
                source = %notification.source,
                object = %notification.object,
                "{}",
                notification.message
            ),
            NotificationLevel::Error => tracing::error!(
                source = %notification.source,
                object = %notification.object,
                "{}",
                notification.message
            ),
        }
        self.items.push(notification);
    }

    pub fn info(&mut self, source: &str, object: impl fmt::Display, message: impl Into<String>) {
        self.push(NotificationLevel::Info, source, object, message);
    }

    pub fn warn(&mut self, source: &str, object: impl fmt::Display, message: impl Into<String>) {
        self.push(NotificationLevel::Warning, source, object, message);
    }

    pub fn error(&mut self, source: &str, object: impl fmt::Display, message: impl Into<String>) {
        self.push(NotificationLevel::Error, source, object, message);
    }

    pub fn items(&self) -> &[Notification] {
        &self.items
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn count(&self, level: NotificationLevel) -> usize {
        self.items.iter().filter(|item| item.level == level).count()
    }
}

impl fmt::Display for Notifications {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.items.is_empty() {
            return Ok(());
        }
        let headers = ["LEVEL", "SOURCE", "OBJECT", "MESSAGE"];
        let mut widths = headers.map(str::len);
        for item in &self.items {
            widths[0] = widths[0].max(item.level.to_string().len());
            widths[1] = widths[1].max(item.source.len());
            widths[2] = widths[2].max(item.object.len());
        }
        writeln!(
            f,
            "{:<w0$}  {:<w1$}  {:<w2$}  {}",
            headers[0],
            headers[1],
            headers[2],
            headers[3],
            w0 = widths[0],
            w1 = widths[1],
            w2 = widths[2],
        )?;
        for item in &self.items {
            writeln!(
                f,
                "{:<w0$}  {:<w1$}  {:<w2$}  {}",
                item.level.to_string(),
                item.source,
                item.object,
                item.message,
                w0 = widths[0],
                w1 = widths[1],
                w2 = widths[2],
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_is_aligned() {
        let mut notes = Notifications::new();
        notes.warn("ingress-nginx", "default/web", "unsupported annotation");
        notes.info("kgateway", "default/a", "ok");
        let rendered = notes.to_string();
        let lines = rendered.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("LEVEL    SOURCE         OBJECT       MESSAGE"));
        assert!(lines[1].starts_with("WARNING  ingress-nginx  default/web  unsupported"));
        assert!(lines[2].starts_with("INFO     kgateway       default/a    ok"));
    }

    #[test]
    fn counts_by_level() {
        let mut notes = Notifications::new();
        notes.warn("a", "x", "1");
        notes.warn("a", "x", "2");
        notes.error("a", "x", "3");
        assert_eq!(notes.count(NotificationLevel::Warning), 2);
        assert_eq!(notes.count(NotificationLevel::Error), 1);
        assert_eq!(notes.count(NotificationLevel::Info), 0);
        assert!(Notifications::new().to_string().is_empty());
    }
}
