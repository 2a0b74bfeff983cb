//! Form submission handler

use async_trait::async_trait;
use coordination::{Capability, Task};
use serde::Deserialize;
use std::collections::BTreeMap;

use super::{decode_payload, HandlerError, HandlerResult, TaskHandler};
use crate::egress::Egress;

#[derive(Debug, Deserialize)]
struct FormPayload {
    url: String,
    #[serde(default)]
    fields: BTreeMap<String, serde_json::Value>,
}

/// Submits a url-encoded form through the active egress identity.
pub struct FormFillHandler;

/// Flatten JSON field values to the strings a form carries.
fn form_fields(fields: &BTreeMap<String, serde_json::Value>) -> BTreeMap<String, String> {
    fields
        .iter()
        .map(|(k, v)| {
            let value = match v {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Null => String::new(),
                other => other.to_string(),
            };
            (k.clone(), value)
        })
        .collect()
}

#[async_trait]
impl TaskHandler for FormFillHandler {
    fn capability(&self) -> Capability {
        Capability::FormFill
    }

    async fn handle(&self, task: &Task, egress: &mut Egress) -> HandlerResult {
        let payload: FormPayload = decode_payload(task)?;
        if payload.fields.is_empty() {
            return Err(HandlerError::InvalidPayload(format!(
                "form-fill task {} has no fields",
                task.id
            )));
        }
        let form = form_fields(&payload.fields);

        let response = egress.execute(|c| c.post(&payload.url).form(&form)).await?;
        let status = response.status();
        if !status.is_success() && !status.is_redirection() {
            return Err(HandlerError::Upstream {
                url: payload.url,
                status: status.as_u16(),
            });
        }

        Ok(serde_json::json!({
            "url": payload.url,
            "status": status.as_u16(),
            "submitted_fields": form.keys().collect::<Vec<_>>(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coordination::IdentityPool;
    use std::time::Duration;

    #[test]
    fn test_form_fields_flatten_values() {
        let mut fields = BTreeMap::new();
        fields.insert("name".to_string(), serde_json::json!("Ada"));
        fields.insert("age".to_string(), serde_json::json!(36));
        fields.insert("newsletter".to_string(), serde_json::json!(true));
        fields.insert("notes".to_string(), serde_json::Value::Null);

        let form = form_fields(&fields);
        assert_eq!(form["name"], "Ada");
        assert_eq!(form["age"], "36");
        assert_eq!(form["newsletter"], "true");
        assert_eq!(form["notes"], "");
    }

    #[tokio::test]
    async fn test_empty_form_rejected() {
        let mut egress =
            Egress::new(IdentityPool::new(Vec::<String>::new()), Duration::from_secs(1)).unwrap();
        let task = Task::new(
            "t-5",
            "form-fill",
            serde_json::json!({"url": "http://forms.invalid/"}),
        );
        let err = FormFillHandler.handle(&task, &mut egress).await.unwrap_err();
        assert!(matches!(err, HandlerError::InvalidPayload(_)));
    }
}
