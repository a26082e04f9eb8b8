use std::time::Duration;

// ---------------------------------------------------------------------------
// RetrieverConfig — per-retriever tuning with env-var overrides
// ---------------------------------------------------------------------------

/// Tuning knobs for the retrieval pipeline.
///
/// Every page-wait in the pipeline is bounded by one of these budgets, so a
/// `retrieve_video` call always terminates within roughly
/// `login_timeout + locate_timeout` plus navigation overhead.
#[derive(Debug, Clone)]
pub struct RetrieverConfig {
    /// Explicit Chromium executable path. `None` = auto-discover
    /// (env override → PATH scan → well-known install paths).
    pub chrome_executable: Option<String>,
    /// Budget for the post-login marker to appear after submitting the form.
    pub login_timeout: Duration,
    /// Budget for the event page to expose a download affordance.
    pub locate_timeout: Duration,
    /// Interval between in-page probe evaluations.
    pub poll_interval: Duration,
    /// How long `release()` waits for the CDP handler task to drain after the
    /// browser closes before aborting it.
    pub handler_drain_timeout: Duration,
    /// Headless viewport.
    pub viewport_width: u32,
    pub viewport_height: u32,
    /// Pull the clip through the authenticated page and return bytes. When
    /// disabled (or when the in-page fetch fails) the extracted signed URL is
    /// returned instead.
    pub download_bytes: bool,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            chrome_executable: None,
            login_timeout: Duration::from_secs(30),
            locate_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(250),
            handler_drain_timeout: Duration::from_secs(5),
            viewport_width: 1280,
            viewport_height: 900,
            download_bytes: true,
        }
    }
}

impl RetrieverConfig {
    /// Defaults with env-var overrides applied:
    /// `PROTECT_CHROME_EXECUTABLE`, `PROTECT_LOGIN_TIMEOUT_MS`,
    /// `PROTECT_LOCATE_TIMEOUT_MS`, `PROTECT_DOWNLOAD_BYTES` ("0" to disable).
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(exe) = std::env::var("PROTECT_CHROME_EXECUTABLE") {
            if !exe.trim().is_empty() {
                cfg.chrome_executable = Some(exe);
            }
        }
        if let Some(ms) = env_ms("PROTECT_LOGIN_TIMEOUT_MS") {
            cfg.login_timeout = ms;
        }
        if let Some(ms) = env_ms("PROTECT_LOCATE_TIMEOUT_MS") {
            cfg.locate_timeout = ms;
        }
        if let Ok(v) = std::env::var("PROTECT_DOWNLOAD_BYTES") {
            cfg.download_bytes = v.trim() != "0";
        }
        cfg
    }
}

fn env_ms(key: &str) -> Option<Duration> {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_bounded_and_sane() {
        let cfg = RetrieverConfig::default();
        assert!(cfg.chrome_executable.is_none());
        assert_eq!(cfg.login_timeout, Duration::from_secs(30));
        assert_eq!(cfg.locate_timeout, Duration::from_secs(30));
        assert!(cfg.poll_interval < cfg.login_timeout);
        assert!(cfg.download_bytes);
    }
}
