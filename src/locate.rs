//! Locate and resolve the event's video artifact.
//!
//! After login, the event page needs time to hydrate before it exposes a
//! download affordance, and the clip itself may already be gone — Protect
//! retention can expire an event between webhook receipt and retrieval. The
//! locator polls an in-page probe under a hard budget and keeps the two
//! failure shapes distinct: "the page told us there is no clip" is
//! `ResourceNotFound`, "the page never finished telling us anything" is
//! `Timeout`.
//!
//! Before declaring a timeout the session's network sniffer is consulted:
//! some console builds stream the clip into a `<video>` element without ever
//! rendering a download link, but the media response still crosses the wire.

use crate::auth::parse_probe;
use crate::core::config::RetrieverConfig;
use crate::core::types::{ClipMetadata, VideoArtifact};
use crate::error::RetrievalError;
use crate::session::SessionSurface;
use anyhow::anyhow;
use base64::Engine as _;
use chrono::Utc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use url::Url;

fn clip_probe_script(device_name: &str) -> String {
    let device = serde_json::Value::String(device_name.to_string()).to_string();
    format!(
        r#"(() => {{ // __courierClipProbe
  const device = {device};
  const link = document.querySelector('a[download], a[href*=".mp4"]');
  const video = document.querySelector('video');
  const src = (link && link.href) || (video && (video.currentSrc || video.src)) || "";
  if (src) {{
    if (device && document.body.innerText && !document.body.innerText.includes(device)) {{
      return JSON.stringify({{ state: "missing", reason: "clip does not belong to device " + device }});
    }}
    return JSON.stringify({{ state: "ready", url: src }});
  }}
  const empty = document.querySelector('[class*="empty" i], [class*="notFound" i]');
  if (empty || /no (recording|clip|video)s? (available|found)/i.test(document.body.innerText || "")) {{
    return JSON.stringify({{ state: "missing", reason: "event page reports no clip" }});
  }}
  return JSON.stringify({{ state: "pending" }});
}})()"#
    )
}

fn fetch_clip_script(url: &Url) -> String {
    let url = serde_json::Value::String(url.to_string()).to_string();
    format!(
        r#"(async () => {{ // __courierFetchClip
  try {{
    const res = await fetch({url}, {{ credentials: "include" }});
    if (!res.ok) return JSON.stringify({{ ok: false, error: "HTTP " + res.status }});
    const buf = await res.arrayBuffer();
    const bytes = new Uint8Array(buf);
    let bin = "";
    for (let i = 0; i < bytes.length; i += 0x8000) {{
      bin += String.fromCharCode.apply(null, bytes.subarray(i, i + 0x8000));
    }}
    return JSON.stringify({{
      ok: true,
      base64: btoa(bin),
      contentType: res.headers.get("content-type") || "video/mp4"
    }});
  }} catch (e) {{
    return JSON.stringify({{ ok: false, error: String(e) }});
  }}
}})()"#
    )
}

/// Resolves an authenticated session + event link to a video artifact.
pub struct VideoLocator {
    locate_timeout: Duration,
    poll_interval: Duration,
    download_bytes: bool,
}

impl VideoLocator {
    pub fn new(config: &RetrieverConfig) -> Self {
        Self {
            locate_timeout: config.locate_timeout,
            poll_interval: config.poll_interval,
            download_bytes: config.download_bytes,
        }
    }

    pub async fn locate<S: SessionSurface>(
        &self,
        session: &mut S,
        event_link: &Url,
        device_name: &str,
    ) -> Result<VideoArtifact, RetrievalError> {
        info!("🎞️  locating clip for '{}' at {}", device_name, event_link);

        // The event page being unreachable is indistinguishable from the
        // event having expired — both mean no retrievable clip right now.
        session.navigate(event_link.as_str()).await.map_err(|e| {
            RetrievalError::ResourceNotFound(format!("event page unreachable: {e:#}"))
        })?;

        let probe = clip_probe_script(device_name);
        let started = Instant::now();
        let clip_url = loop {
            let result = session
                .evaluate(&probe)
                .await
                .map_err(|e| anyhow!("clip probe failed: {e:#}"))?;
            let result = parse_probe(&result);
            match result.get("state").and_then(|s| s.as_str()).unwrap_or("") {
                "ready" => {
                    let raw = result
                        .get("url")
                        .and_then(|u| u.as_str())
                        .unwrap_or_default()
                        .to_string();
                    break self.absolutize(session, event_link, &raw).await?;
                }
                "missing" => {
                    let reason = result
                        .get("reason")
                        .and_then(|r| r.as_str())
                        .unwrap_or("no playable clip on event page");
                    return Err(RetrievalError::ResourceNotFound(reason.to_string()));
                }
                _ => debug!("download affordance pending"),
            }

            if started.elapsed() >= self.locate_timeout {
                // Sniffer fallback: the clip may have crossed the wire even
                // though the DOM never exposed it.
                if let Some(sniffed) = session.observed_media().await.into_iter().next_back() {
                    info!("using sniffed media response as clip source");
                    break self.absolutize(session, event_link, &sniffed).await?;
                }
                return Err(RetrievalError::Timeout {
                    stage: "locate",
                    waited_ms: started.elapsed().as_millis() as u64,
                });
            }
            tokio::time::sleep(self.poll_interval).await;
        };

        let metadata = ClipMetadata {
            device_name: device_name.to_string(),
            event_link: event_link.clone(),
            content_type: "video/mp4".to_string(),
            retrieved_at: Utc::now(),
        };

        if self.download_bytes {
            match self.fetch_bytes(session, &clip_url).await {
                Ok((data, content_type)) => {
                    info!("⬇️  clip downloaded ({} bytes)", data.len());
                    return Ok(VideoArtifact::Bytes {
                        data,
                        metadata: ClipMetadata {
                            content_type,
                            ..metadata
                        },
                    });
                }
                Err(e) => {
                    warn!("in-page clip fetch failed ({e:#}) — returning signed URL");
                }
            }
        }

        Ok(VideoArtifact::SignedUrl {
            url: clip_url,
            metadata,
        })
    }

    /// The affordance may carry a relative href; resolve it against the page
    /// we are actually on (falling back to the event link).
    async fn absolutize<S: SessionSurface>(
        &self,
        session: &mut S,
        event_link: &Url,
        raw: &str,
    ) -> Result<Url, RetrievalError> {
        if raw.is_empty() {
            return Err(RetrievalError::ResourceNotFound(
                "download affordance carried no url".into(),
            ));
        }
        if let Ok(url) = Url::parse(raw) {
            return Ok(url);
        }
        let base = match session.current_url().await.ok().and_then(|u| Url::parse(&u).ok()) {
            Some(base) => base,
            None => event_link.clone(),
        };
        base.join(raw)
            .map_err(|e| anyhow!("could not resolve clip url '{raw}': {e}").into())
    }

    async fn fetch_bytes<S: SessionSurface>(
        &self,
        session: &mut S,
        clip_url: &Url,
    ) -> anyhow::Result<(Vec<u8>, String)> {
        let result = session.evaluate(&fetch_clip_script(clip_url)).await?;
        let result = parse_probe(&result);
        if !result.get("ok").and_then(|v| v.as_bool()).unwrap_or(false) {
            let error = result
                .get("error")
                .and_then(|e| e.as_str())
                .unwrap_or("fetch returned no payload");
            return Err(anyhow!("{error}"));
        }
        let b64 = result
            .get("base64")
            .and_then(|b| b.as_str())
            .ok_or_else(|| anyhow!("fetch payload missing base64 body"))?;
        let data = base64::engine::general_purpose::STANDARD.decode(b64)?;
        let content_type = result
            .get("contentType")
            .and_then(|c| c.as_str())
            .unwrap_or("video/mp4")
            .to_string();
        Ok((data, content_type))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use anyhow::Result;
    use async_trait::async_trait;
    use serde_json::json;

    struct ScriptedSurface {
        probe_results: Vec<serde_json::Value>,
        probe_cursor: usize,
        fetch_result: Option<serde_json::Value>,
        sniffed: Vec<String>,
        page_url: String,
    }

    impl ScriptedSurface {
        fn new(probe_results: Vec<serde_json::Value>) -> Self {
            Self {
                probe_results,
                probe_cursor: 0,
                fetch_result: None,
                sniffed: Vec::new(),
                page_url: "https://udm.local/protect/events/abc".into(),
            }
        }
    }

    #[async_trait]
    impl SessionSurface for ScriptedSurface {
        async fn navigate(&mut self, _url: &str) -> Result<()> {
            Ok(())
        }

        async fn evaluate(&mut self, js: &str) -> Result<serde_json::Value> {
            if js.contains("__courierClipProbe") {
                let result = self
                    .probe_results
                    .get(self.probe_cursor)
                    .cloned()
                    .unwrap_or(json!({ "state": "pending" }));
                self.probe_cursor += 1;
                return Ok(result);
            }
            if js.contains("__courierFetchClip") {
                return Ok(self
                    .fetch_result
                    .clone()
                    .unwrap_or(json!({ "ok": false, "error": "no fetch scripted" })));
            }
            Ok(serde_json::Value::Null)
        }

        async fn current_url(&mut self) -> Result<String> {
            Ok(self.page_url.clone())
        }

        async fn observed_media(&mut self) -> Vec<String> {
            self.sniffed.clone()
        }

        async fn release(&mut self) {}
    }

    fn locator(download_bytes: bool) -> VideoLocator {
        VideoLocator {
            locate_timeout: Duration::from_millis(40),
            poll_interval: Duration::from_millis(5),
            download_bytes,
        }
    }

    fn event_link() -> Url {
        Url::parse("https://udm.local/protect/events/abc").unwrap()
    }

    #[tokio::test]
    async fn ready_probe_yields_signed_url_artifact() {
        let mut surface = ScriptedSurface::new(vec![
            json!({ "state": "pending" }),
            json!({ "state": "ready", "url": "https://udm.local/clip/abc.mp4" }),
        ]);
        let artifact = locator(false)
            .locate(&mut surface, &event_link(), "Front Door")
            .await
            .unwrap();
        match artifact {
            VideoArtifact::SignedUrl { url, metadata } => {
                assert_eq!(url.as_str(), "https://udm.local/clip/abc.mp4");
                assert_eq!(metadata.device_name, "Front Door");
                assert_eq!(metadata.event_link, event_link());
            }
            other => panic!("expected signed url artifact, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn relative_clip_url_is_absolutized_against_page() {
        let mut surface =
            ScriptedSurface::new(vec![json!({ "state": "ready", "url": "/download/abc.mp4" })]);
        let artifact = locator(false)
            .locate(&mut surface, &event_link(), "Front Door")
            .await
            .unwrap();
        match artifact {
            VideoArtifact::SignedUrl { url, .. } => {
                assert_eq!(url.as_str(), "https://udm.local/download/abc.mp4");
            }
            other => panic!("expected signed url artifact, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_state_is_resource_not_found() {
        let mut surface = ScriptedSurface::new(vec![
            json!({ "state": "missing", "reason": "event page reports no clip" }),
        ]);
        let err = locator(false)
            .locate(&mut surface, &event_link(), "Front Door")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::ResourceNotFound);
        assert!(err.to_string().contains("no clip"));
    }

    #[tokio::test]
    async fn exhausted_budget_without_affordance_is_timeout() {
        let mut surface = ScriptedSurface::new(vec![]);
        let err = locator(false)
            .locate(&mut surface, &event_link(), "Front Door")
            .await
            .unwrap_err();
        match err {
            RetrievalError::Timeout { stage, waited_ms } => {
                assert_eq!(stage, "locate");
                assert!(waited_ms >= 40);
            }
            other => panic!("expected timeout, got {other}"),
        }
    }

    #[tokio::test]
    async fn sniffed_media_rescues_a_pending_page() {
        let mut surface = ScriptedSurface::new(vec![]);
        surface.sniffed = vec!["https://udm.local/stream/abc.mp4".into()];
        let artifact = locator(false)
            .locate(&mut surface, &event_link(), "Front Door")
            .await
            .unwrap();
        match artifact {
            VideoArtifact::SignedUrl { url, .. } => {
                assert_eq!(url.as_str(), "https://udm.local/stream/abc.mp4");
            }
            other => panic!("expected signed url artifact, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn bytes_path_decodes_in_page_fetch() {
        let mut surface = ScriptedSurface::new(vec![
            json!({ "state": "ready", "url": "https://udm.local/clip/abc.mp4" }),
        ]);
        // base64 of [0, 1, 2, 3]
        surface.fetch_result =
            Some(json!({ "ok": true, "base64": "AAECAw==", "contentType": "video/mp4" }));
        let artifact = locator(true)
            .locate(&mut surface, &event_link(), "Front Door")
            .await
            .unwrap();
        match artifact {
            VideoArtifact::Bytes { data, metadata } => {
                assert_eq!(data, vec![0, 1, 2, 3]);
                assert_eq!(metadata.content_type, "video/mp4");
            }
            other => panic!("expected bytes artifact, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn failed_fetch_falls_back_to_signed_url() {
        let mut surface = ScriptedSurface::new(vec![
            json!({ "state": "ready", "url": "https://udm.local/clip/abc.mp4" }),
        ]);
        surface.fetch_result = Some(json!({ "ok": false, "error": "HTTP 404" }));
        let artifact = locator(true)
            .locate(&mut surface, &event_link(), "Front Door")
            .await
            .unwrap();
        assert!(matches!(artifact, VideoArtifact::SignedUrl { .. }));
    }

    /// Probe payloads arrive `JSON.stringify`-ed from a real page — the
    /// string form must parse identically to the object form.
    #[tokio::test]
    async fn stringified_probe_payloads_are_accepted() {
        let mut surface = ScriptedSurface::new(vec![json!(
            r#"{ "state": "ready", "url": "https://udm.local/clip/abc.mp4" }"#
        )]);
        let artifact = locator(false)
            .locate(&mut surface, &event_link(), "Front Door")
            .await
            .unwrap();
        assert!(matches!(artifact, VideoArtifact::SignedUrl { .. }));
    }
}
