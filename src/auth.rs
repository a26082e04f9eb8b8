//! Login against the UniFi Protect web console.
//!
//! Protect has no stable public API for video export, so authentication goes
//! through the console's login form in the headless page: fill the form
//! in-page, submit, and poll for the post-login marker. One attempt only —
//! retry policy belongs to the caller (classify on
//! [`FailureKind`](crate::error::FailureKind) and back off there).
//!
//! The console is a React app, so the fill script uses the native value
//! setter and dispatches `input` events; assigning `.value` directly would
//! leave the controlled form state empty.

use crate::core::config::RetrieverConfig;
use crate::core::types::UnifiCredentials;
use crate::error::RetrievalError;
use crate::session::SessionSurface;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Escape an arbitrary string into a JS string literal.
fn js_string(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

fn fill_login_script(credentials: &UnifiCredentials) -> String {
    format!(
        r#"(() => {{ // __courierFillLogin
  const user = document.querySelector('input[name="username"], input[autocomplete*="username"]');
  const pass = document.querySelector('input[name="password"], input[type="password"]');
  if (!user || !pass) return JSON.stringify({{ found: false }});
  const setter = Object.getOwnPropertyDescriptor(window.HTMLInputElement.prototype, 'value').set;
  setter.call(user, {username});
  user.dispatchEvent(new Event('input', {{ bubbles: true }}));
  setter.call(pass, {password});
  pass.dispatchEvent(new Event('input', {{ bubbles: true }}));
  const submit = document.querySelector('button[type="submit"], form button');
  if (submit) {{ submit.click(); }} else if (pass.form) {{ pass.form.requestSubmit(); }}
  return JSON.stringify({{ found: true }});
}})()"#,
        username = js_string(&credentials.username),
        password = js_string(&credentials.password),
    )
}

/// Post-login marker probe: `"authenticated"`, `"rejected"`, or `"pending"`.
const LOGIN_STATE_SCRIPT: &str = r#"(() => { // __courierLoginState
  const err = document.querySelector('[class*="error" i], [data-testid*="error" i], [role="alert"]');
  if (err && err.textContent && /invalid|incorrect|failed|denied/i.test(err.textContent)) {
    return "rejected";
  }
  if (!/login|auth/i.test(window.location.pathname)) return "authenticated";
  return "pending";
})()"#;

/// Drives a single login attempt against the controller console.
pub struct AuthenticationFlow {
    login_timeout: Duration,
    poll_interval: Duration,
}

impl AuthenticationFlow {
    pub fn new(config: &RetrieverConfig) -> Self {
        Self {
            login_timeout: config.login_timeout,
            poll_interval: config.poll_interval,
        }
    }

    /// Log the session in. On success the page carries the console's session
    /// cookies; they die with the disposable profile on release.
    pub async fn login<S: SessionSurface>(
        &self,
        session: &mut S,
        credentials: &UnifiCredentials,
    ) -> Result<(), RetrievalError> {
        let host = credentials.hostname.trim().to_string();
        let auth_err = |reason: String| RetrievalError::Authentication {
            host: host.clone(),
            reason,
        };

        if !credentials.is_complete() {
            return Err(auth_err(format!(
                "credentials incomplete (username '{}', password length {})",
                credentials.masked_username(),
                credentials.password.chars().count()
            )));
        }

        let console = credentials
            .console_url()
            .map_err(|e| auth_err(format!("invalid controller hostname: {e}")))?;

        info!(
            "🔐 logging into {} as '{}'",
            console,
            credentials.masked_username()
        );

        session
            .navigate(console.as_str())
            .await
            .map_err(|e| auth_err(format!("login page unreachable: {e:#}")))?;

        let fill = session
            .evaluate(&fill_login_script(credentials))
            .await
            .map_err(|e| auth_err(format!("login form interaction failed: {e:#}")))?;
        let found = parse_probe(&fill)
            .get("found")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        if !found {
            return Err(auth_err("login form not found on console page".into()));
        }

        // Rejection is detected by the console's error marker; acceptance by
        // navigation away from the login route. Neither within the budget
        // means the controller did not accept the credentials.
        let started = Instant::now();
        loop {
            let state = session
                .evaluate(LOGIN_STATE_SCRIPT)
                .await
                .map_err(|e| auth_err(format!("post-login probe failed: {e:#}")))?;
            let state = probe_string(&state);
            match state.as_str() {
                "authenticated" => {
                    info!("✅ authenticated against {}", host);
                    return Ok(());
                }
                "rejected" => {
                    return Err(auth_err("controller rejected the credentials".into()));
                }
                _ => debug!("post-login marker pending"),
            }

            if started.elapsed() >= self.login_timeout {
                return Err(auth_err(format!(
                    "no post-login marker within {}ms",
                    self.login_timeout.as_millis()
                )));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

/// Probe scripts return `JSON.stringify`-ed payloads; scripted test surfaces
/// may hand back the object directly. Accept both.
pub(crate) fn parse_probe(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::String(s) => {
            serde_json::from_str(s).unwrap_or(serde_json::Value::Null)
        }
        other => other.clone(),
    }
}

pub(crate) fn probe_string(value: &serde_json::Value) -> String {
    value.as_str().unwrap_or_default().to_string()
}
