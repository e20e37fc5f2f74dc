//! Human-readable text for queued notifications.

use serde_json::Value;

use yo_common::types::{JobPayload, NotificationType};

const SITE_URL: &str = "https://steemit.com";

/// A rendered notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub subject: String,
    pub text: String,
    pub html: Option<String>,
}

fn field<'a>(data: &'a Value, key: &str) -> &'a str {
    data.get(key).and_then(Value::as_str).unwrap_or_default()
}

fn content_url(author: &str, permlink: &str) -> Option<String> {
    if author.is_empty() || permlink.is_empty() {
        None
    } else {
        Some(format!("{}/@{}/{}", SITE_URL, author, permlink))
    }
}

/// Escape text for an HTML body.
fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

fn render_html(subject: &str, memo: Option<&str>, link: Option<&str>) -> String {
    let memo = memo
        .map(|m| format!("\n        <p class=\"memo\">Memo: {}</p>", escape_html(m)))
        .unwrap_or_default();
    let link = link
        .map(|l| {
            let l = escape_html(l);
            format!("\n        <p><a href=\"{}\">{}</a></p>", l, l)
        })
        .unwrap_or_default();

    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <style>
        body {{ font-family: Arial, sans-serif; margin: 20px; }}
        .content {{ padding: 20px; background-color: #f9f9f9; border-radius: 5px; }}
        .memo {{ color: #555; font-style: italic; }}
        .footer {{ color: #666; font-size: 12px; margin-top: 20px; }}
    </style>
</head>
<body>
    <div class="content">
        <h2>{}</h2>{}{}
    </div>
    <div class="footer">
        <p><a href="{}/settings">Notification settings</a></p>
    </div>
</body>
</html>"#,
        escape_html(subject),
        memo,
        link,
        SITE_URL
    )
}

/// Render a job into a subject line, a plain-text body and an HTML body.
pub fn render(job: &JobPayload) -> Message {
    let data = &job.data;
    let from = job.from_username.as_deref().unwrap_or_default();

    let (subject, link) = match job.notify_type {
        NotificationType::Vote => (
            format!("@{} voted on your post", field(data, "voter")),
            content_url(field(data, "author"), field(data, "permlink")),
        ),
        NotificationType::Follow => (
            format!("@{} followed you", field(data, "follower")),
            None,
        ),
        NotificationType::Resteem => (
            format!("@{} resteemed your post", field(data, "account")),
            content_url(field(data, "author"), field(data, "permlink")),
        ),
        NotificationType::Send => (
            format!("You sent {} to @{}", field(data, "amount"), field(data, "to")),
            None,
        ),
        NotificationType::Receive => (
            format!("@{} sent you {}", field(data, "from"), field(data, "amount")),
            None,
        ),
        NotificationType::Mention => (
            format!("@{} mentioned you", field(data, "author")),
            content_url(field(data, "author"), field(data, "permlink")),
        ),
        NotificationType::CommentReply => (
            format!("@{} replied to your comment", field(data, "author")),
            content_url(field(data, "author"), field(data, "permlink")),
        ),
        NotificationType::PostReply => (
            format!("@{} replied to your post", field(data, "author")),
            content_url(field(data, "author"), field(data, "permlink")),
        ),
        NotificationType::PowerDown => (
            format!("Power down of {} started", field(data, "vesting_shares")),
            None,
        ),
        NotificationType::AccountUpdate => (
            format!("Your account @{} was updated", job.to_username),
            None,
        ),
        other if !from.is_empty() => (format!("New {} from @{}", other, from), None),
        other => (format!("New {} notification", other), None),
    };

    let memo = match job.notify_type {
        NotificationType::Send | NotificationType::Receive => {
            Some(field(data, "memo")).filter(|m| !m.is_empty())
        }
        _ => None,
    };

    let mut text = subject.clone();
    if let Some(memo) = memo {
        text.push_str(&format!("\nMemo: {}", memo));
    }
    if let Some(link) = &link {
        text.push('\n');
        text.push_str(link);
    }
    let html = render_html(&subject, memo, link.as_deref());

    Message {
        subject,
        text,
        html: Some(html),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use yo_common::types::Priority;

    fn job(notify_type: NotificationType, data: Value) -> JobPayload {
        JobPayload {
            notification_id: 1,
            eid: "1/0/0/0".to_string(),
            notify_type,
            to_username: "alice".to_string(),
            from_username: Some("bob".to_string()),
            data,
            priority: Priority::Low,
        }
    }

    #[test]
    fn test_vote_links_to_post() {
        let message = render(&job(
            NotificationType::Vote,
            json!({"voter": "bob", "author": "alice", "permlink": "p", "weight": 10000}),
        ));
        assert_eq!(message.subject, "@bob voted on your post");
        assert_eq!(message.text, "@bob voted on your post\nhttps://steemit.com/@alice/p");
        let html = message.html.unwrap();
        assert!(html.contains("<h2>@bob voted on your post</h2>"));
        assert!(html.contains(r#"<a href="https://steemit.com/@alice/p">"#));
    }

    #[test]
    fn test_html_escapes_memo() {
        let message = render(&job(
            NotificationType::Receive,
            json!({"amount": "1.000 STEEM", "from": "bob", "memo": "<script>alert('x')</script> & co", "to": "alice"}),
        ));
        let html = message.html.unwrap();
        assert!(html.contains("Memo: &lt;script&gt;alert(&#39;x&#39;)&lt;/script&gt; &amp; co"));
        assert!(!html.contains("<script>"));
        assert!(message.text.ends_with("Memo: <script>alert('x')</script> & co"));
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("plain"), "plain");
        assert_eq!(escape_html("a < b > c"), "a &lt; b &gt; c");
        assert_eq!(escape_html("\"q\" & 'a'"), "&quot;q&quot; &amp; &#39;a&#39;");
    }

    #[test]
    fn test_receive_includes_memo() {
        let message = render(&job(
            NotificationType::Receive,
            json!({"amount": "1.000 STEEM", "from": "bob", "memo": "thanks", "to": "alice"}),
        ));
        assert_eq!(message.subject, "@bob sent you 1.000 STEEM");
        assert!(message.text.ends_with("Memo: thanks"));
    }

    #[test]
    fn test_reply_kinds_differ() {
        let data = json!({"author": "bob", "permlink": "re-p"});
        assert_eq!(
            render(&job(NotificationType::PostReply, data.clone())).subject,
            "@bob replied to your post"
        );
        assert_eq!(
            render(&job(NotificationType::CommentReply, data)).subject,
            "@bob replied to your comment"
        );
    }

    #[test]
    fn test_unmapped_type_falls_back() {
        let message = render(&job(NotificationType::Reward, json!({})));
        assert_eq!(message.subject, "New reward from @bob");
    }
}
