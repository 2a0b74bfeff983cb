//! Page fetch handler

use async_trait::async_trait;
use coordination::{Capability, Task};
use regex::Regex;
use serde::Deserialize;
use std::sync::LazyLock;

use super::{decode_payload, HandlerError, HandlerResult, TaskHandler};
use crate::egress::{Egress, EgressError};

#[derive(Debug, Deserialize)]
struct ScrapePayload {
    url: String,
}

/// Fetches a page through the active egress identity.
pub struct ScrapeHandler;

static TITLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("TITLE_RE regex should compile")
});

/// Text of the first `<title>` element, whitespace-collapsed.
pub fn extract_title(html: &str) -> Option<String> {
    let raw = TITLE_RE.captures(html)?.get(1)?.as_str();
    let title = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    (!title.is_empty()).then_some(title)
}

#[async_trait]
impl TaskHandler for ScrapeHandler {
    fn capability(&self) -> Capability {
        Capability::WebScrape
    }

    async fn handle(&self, task: &Task, egress: &mut Egress) -> HandlerResult {
        let payload: ScrapePayload = decode_payload(task)?;
        let response = egress.execute(|c| c.get(&payload.url)).await?;

        let status = response.status();
        if !status.is_success() {
            return Err(HandlerError::Upstream {
                url: payload.url,
                status: status.as_u16(),
            });
        }

        let body = response.text().await.map_err(|e| EgressError::Request {
            via: "body".to_string(),
            reason: e.to_string(),
        })?;

        Ok(serde_json::json!({
            "url": payload.url,
            "status": status.as_u16(),
            "content_length": body.len(),
            "title": extract_title(&body),
        }))
    }
}
