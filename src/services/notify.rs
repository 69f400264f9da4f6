use anyhow::{Context, Result};
use reqwest::Client;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::{NotificationConfig, NotificationKind};
use crate::constants::{APP_NAME, intervals};
use crate::domain::events::Summary;

/// Delivers download summaries. Delivery failures are logged and dropped.
pub struct Notifier {
    client: Client,
    config: NotificationConfig,
    script_timeout: Duration,
}

impl Notifier {
    /// Returns `None` when notifications are off.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn from_config(config: &NotificationConfig) -> Result<Option<Self>> {
        if config.kind == NotificationKind::None {
            return Ok(None);
        }

        let client = Client::builder()
            .timeout(intervals::HTTP_TIMEOUT)
            .user_agent(format!("{APP_NAME}/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Some(Self {
            client,
            config: config.clone(),
            script_timeout: intervals::HTTP_TIMEOUT,
        }))
    }

    pub async fn send(&self, summary: &Summary) {
        let result = match self.config.kind {
            NotificationKind::Ntfy => self.send_ntfy(summary).await,
            NotificationKind::Script => self.run_script(summary).await,
            NotificationKind::None => return,
        };

        match result {
            Ok(()) => info!(subject = %summary.subject, "Notification sent"),
            Err(e) => warn!(error = %e, "Failed to send notification"),
        }
    }

    async fn send_ntfy(&self, summary: &Summary) -> Result<()> {
        self.client
            .post(&self.config.ntfy_url)
            .header("Title", &summary.subject)
            .body(summary.body.clone())
            .send()
            .await
            .context("ntfy request failed")?
            .error_for_status()
            .context("ntfy rejected the message")?;
        Ok(())
    }

    async fn run_script(&self, summary: &Summary) -> Result<()> {
        let Some(script) = self.config.script_path.as_ref() else {
            anyhow::bail!("No notification script configured");
        };

        let message = format!("{}\n\n{}", summary.subject, summary.body);
        let run = tokio::process::Command::new(script)
            .arg(message)
            .kill_on_drop(true)
            .status();
        let Ok(status) = tokio::time::timeout(self.script_timeout, run).await else {
            anyhow::bail!(
                "{} did not finish within {}s and was killed",
                script.display(),
                self.script_timeout.as_secs()
            );
        };
        let status = status.with_context(|| format!("Failed to run {}", script.display()))?;

        if !status.success() {
            anyhow::bail!("{} exited with {status}", script.display());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_notifier() {
        assert!(Notifier::from_config(&NotificationConfig::default()).unwrap().is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_script_receives_message() {
        use std::os::unix::fs::PermissionsExt;

        let dir = std::env::temp_dir().join(format!("mdnx-autodl-notify-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let out = dir.join("message.txt");
        let script = dir.join("notify.sh");
        std::fs::write(&script, format!("#!/bin/sh\nprintf '%s' \"$1\" > '{}'\n", out.display())).unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let notifier = Notifier::from_config(&NotificationConfig {
            kind: NotificationKind::Script,
            ntfy_url: String::new(),
            script_path: Some(script),
        })
        .unwrap()
        .unwrap();

        notifier
            .send(&Summary {
                subject: "Download summary: 1 new, 0 updated".to_string(),
                body: "New downloads:".to_string(),
            })
            .await;

        let written = std::fs::read_to_string(&out).unwrap();
        assert!(written.starts_with("Download summary: 1 new"));
        assert!(written.ends_with("New downloads:"));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_hanging_script_is_killed_after_timeout() {
        use std::os::unix::fs::PermissionsExt;

        let dir = std::env::temp_dir().join(format!("mdnx-autodl-notify-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let script = dir.join("notify.sh");
        std::fs::write(&script, "#!/bin/sh\nexec sleep 30\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let mut notifier = Notifier::from_config(&NotificationConfig {
            kind: NotificationKind::Script,
            ntfy_url: String::new(),
            script_path: Some(script),
        })
        .unwrap()
        .unwrap();
        notifier.script_timeout = Duration::from_millis(200);

        let summary = Summary {
            subject: "Download summary: 1 new, 0 updated".to_string(),
            body: String::new(),
        };
        let started = std::time::Instant::now();
        let err = notifier.run_script(&summary).await.unwrap_err();
        assert!(err.to_string().contains("did not finish"));
        assert!(started.elapsed() < Duration::from_secs(10));

        notifier.send(&summary).await;
        assert!(started.elapsed() < Duration::from_secs(10));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
