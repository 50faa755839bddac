//! Environment-first configuration for the receiver and the forwarder.
//!
//! Both configs follow the same `from_env()` + `with_overrides()` layering:
//! environment variables supply defaults, CLI flags win when present.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_string_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Receiver-side configuration (`serve` command).
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    pub listen_addr: String,
    pub capture_dir: PathBuf,
    pub disk_cap_bytes: u64,
    pub rotate_threshold_bytes: u64,
    pub rotate_max_age: Duration,
    pub max_request_bytes: usize,
    pub redact_patterns: Vec<String>,
    pub channel_capacity: usize,
}

impl ReceiverConfig {
    pub fn from_env() -> Result<Self> {
        let capture_dir = std::env::var("LOGTAP_CAPTURE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./capture"));

        let redact_patterns = std::env::var("LOGTAP_REDACT_PATTERNS")
            .map(|s| s.split(',').map(|p| p.trim().to_string()).collect())
            .unwrap_or_else(|_| {
                vec![
                    "email", "credit_card", "jwt", "bearer", "ip_v4", "ssn", "phone",
                ]
                .into_iter()
                .map(String::from)
                .collect()
            });

        Ok(Self {
            listen_addr: env_string_or("LOGTAP_LISTEN_ADDR", "0.0.0.0:9090"),
            capture_dir,
            disk_cap_bytes: env_or("LOGTAP_DISK_CAP_BYTES", 1024 * 1024 * 1024),
            rotate_threshold_bytes: env_or("LOGTAP_ROTATE_THRESHOLD_BYTES", 64 * 1024 * 1024),
            rotate_max_age: Duration::from_secs(env_or("LOGTAP_ROTATE_MAX_AGE_SECS", 15 * 60)),
            max_request_bytes: env_or("LOGTAP_MAX_REQUEST_BYTES", 8 * 1024 * 1024),
            redact_patterns,
            channel_capacity: env_or("LOGTAP_CHANNEL_CAPACITY", 1024),
        })
    }

    pub fn with_overrides(
        mut self,
        listen_addr: Option<&str>,
        capture_dir: Option<&std::path::Path>,
        disk_cap_bytes: Option<u64>,
    ) -> Self {
        if let Some(a) = listen_addr {
            self.listen_addr = a.to_string();
        }
        if let Some(d) = capture_dir {
            self.capture_dir = d.to_path_buf();
        }
        if let Some(c) = disk_cap_bytes {
            self.disk_cap_bytes = c;
        }
        self
    }
}

/// Forwarder-side configuration (`forward` command).
#[derive(Debug, Clone)]
pub struct ForwarderConfig {
    pub target: String,
    pub session: String,
    pub pod_name: String,
    pub namespace: String,
    pub buffer_size_bytes: usize,
    pub retry_max: u32,
    pub tls_skip_verify: bool,
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub log_dir: Option<PathBuf>,
    pub drain_timeout: Duration,
    pub backlog_drain_interval: Duration,
    pub tail_poll_interval: Duration,
}

impl ForwarderConfig {
    pub fn from_env() -> Result<Self> {
        let target = std::env::var("LOGTAP_TARGET")
            .map_err(|_| anyhow::anyhow!("LOGTAP_TARGET is required"))?;

        Ok(Self {
            target,
            session: env_string_or("LOGTAP_SESSION", &uuid::Uuid::new_v4().to_string()),
            pod_name: env_string_or("LOGTAP_POD_NAME", "unknown-pod"),
            namespace: env_string_or("LOGTAP_NAMESPACE", "default"),
            buffer_size_bytes: env_or("LOGTAP_BUFFER_SIZE", 10 * 1024 * 1024),
            retry_max: env_or("LOGTAP_RETRY_MAX", 5),
            tls_skip_verify: env_or("LOGTAP_TLS_SKIP_VERIFY", false),
            batch_size: env_or("LOGTAP_BATCH_SIZE", 100),
            flush_interval: Duration::from_millis(env_or("LOGTAP_FLUSH_INTERVAL_MS", 500)),
            log_dir: std::env::var("LOGTAP_LOG_DIR").ok().map(PathBuf::from),
            drain_timeout: Duration::from_secs(env_or("LOGTAP_DRAIN_TIMEOUT_SECS", 5)),
            backlog_drain_interval: Duration::from_secs(env_or("LOGTAP_BACKLOG_DRAIN_INTERVAL_SECS", 10)),
            tail_poll_interval: Duration::from_millis(env_or("LOGTAP_TAIL_POLL_INTERVAL_MS", 200)),
        })
    }

    pub fn with_overrides(
        mut self,
        target: Option<&str>,
        session: Option<&str>,
        pod_name: Option<&str>,
        namespace: Option<&str>,
    ) -> Self {
        if let Some(t) = target {
            self.target = t.to_string();
        }
        if let Some(s) = session {
            self.session = s.to_string();
        }
        if let Some(p) = pod_name {
            self.pod_name = p.to_string();
        }
        if let Some(n) = namespace {
            self.namespace = n.to_string();
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Serialize env-mutating tests — std::env is process-global.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn forwarder_requires_target() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::remove_var("LOGTAP_TARGET");
        assert!(ForwarderConfig::from_env().is_err());
    }

    #[test]
    fn forwarder_overrides_win() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("LOGTAP_TARGET", "http://receiver:9090");
        let cfg = ForwarderConfig::from_env()
            .unwrap()
            .with_overrides(Some("http://override:9090"), None, None, None);
        assert_eq!(cfg.target, "http://override:9090");
        std::env::remove_var("LOGTAP_TARGET");
    }
}
