//! Template rendering (C3): a pure function from a notification (or digest group)
//! to the per-channel payload shapes the adapters send.

use sn_common::{Notification, RenderedMessage};
use serde_json::json;

/// Substitutes `{{var}}` placeholders in `template` from `vars`. An unknown
/// variable resolves to the empty string rather than erroring — a missing var
/// shouldn't drop delivery of an otherwise-valid notification.
fn substitute(template: &str, vars: &std::collections::HashMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        if let Some(end) = after.find("}}") {
            let key = after[..end].trim();
            if let Some(value) = vars.get(key) {
                out.push_str(value);
            }
            rest = &after[end + 2..];
        } else {
            out.push_str("{{");
            rest = after;
        }
    }
    out.push_str(rest);
    out
}

fn escape_html(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Render a single notification into the payload shapes every adapter consumes.
pub fn render_single(notification: &Notification) -> RenderedMessage {
    let title = substitute(&notification.title, &notification.template_vars);
    let body = substitute(&notification.body, &notification.template_vars);

    RenderedMessage {
        subject: title.clone(),
        title: title.clone(),
        body_text: body.clone(),
        body_html: format!("<p>{}</p>", escape_html(&body)),
        push_payload: json!({
            "id": notification.id,
            "title": title,
            "body": body,
            "type": notification.notification_type,
            "actionLink": notification.action_link,
        }),
        socket_payload: json!({
            "type": "notification",
            "id": notification.id,
            "notificationType": notification.notification_type,
            "title": title,
            "body": body,
            "action": notification.action_link,
            "data": notification.content_refs,
        }),
    }
}

/// Render a digest covering `members`, summarized around the type/count the way
/// `NotificationType::plural_noun` is meant to be used ("3 new likes").
pub fn render_digest(members: &[Notification]) -> RenderedMessage {
    let count = members.len();
    let notification_type = members.first().map(|n| n.notification_type);
    let kind = notification_type.map(|t| t.plural_noun()).unwrap_or("notifications");
    let title = format!("{count} new {kind}");
    let body = members
        .iter()
        .take(5)
        .map(|n| n.body.as_str())
        .collect::<Vec<_>>()
        .join(", ");

    RenderedMessage {
        subject: title.clone(),
        title: title.clone(),
        body_text: body.clone(),
        body_html: format!("<p>{}</p>", escape_html(&body)),
        push_payload: json!({
            "title": title,
            "body": body,
            "count": count,
        }),
        socket_payload: json!({
            "type": "notification",
            "id": members.first().map(|n| n.batch_id.clone().unwrap_or_else(|| n.id.clone())),
            "notificationType": notification_type,
            "title": title,
            "body": body,
            "action": None::<String>,
            "data": {
                "count": count,
                "memberIds": members.iter().map(|n| &n.id).collect::<Vec<_>>(),
            },
        }),
    }
}
