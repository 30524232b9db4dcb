use lib_common::RotationSnapshot;

/// Escapes the characters that matter inside HTML text and attributes.
fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn content_block(snapshot: &RotationSnapshot) -> String {
    match &snapshot.current {
        None => "<h1>Waiting for content...</h1>".to_string(),
        Some(item) => {
            let assigned = item
                .assigned_at
                .map(|at| at.to_rfc3339())
                .unwrap_or_default();
            format!(
                "<h1>Order: {}</h1>\n<p>{}</p>\n<p>Processed at: {}</p>",
                item.id,
                escape_html(&item.text),
                assigned
            )
        }
    }
}

/// Full page for one monitor. The inline script keeps it current by
/// following the monitor's WebSocket stream.
pub fn render_monitor_page(snapshot: &RotationSnapshot) -> String {
    let monitor = snapshot.consumer_id;
    format!(
        r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>Monitor {monitor} Display</title></head>
<body>
<div id="content">
{content}
</div>
<p>Displayed for Monitor {monitor}</p>
<script>
(function () {{
  var box = document.getElementById("content");
  function esc(s) {{ var d = document.createElement("div"); d.textContent = s; return d.innerHTML; }}
  function connect() {{
    var proto = location.protocol === "https:" ? "wss://" : "ws://";
    var ws = new WebSocket(proto + location.host + "/monitor/{monitor}/ws");
    ws.onmessage = function (ev) {{
      var snap = JSON.parse(ev.data);
      if (!snap.current) {{ box.innerHTML = "<h1>Waiting for content...</h1>"; return; }}
      box.innerHTML = "<h1>Order: " + snap.current.id + "</h1><p>" + esc(snap.current.text) +
        "</p><p>Processed at: " + (snap.current.assigned_at || "") + "</p>";
    }};
    ws.onclose = function () {{ setTimeout(connect, 3000); }};
  }}
  connect();
}})();
</script>
</body>
</html>
"#,
        content = content_block(snapshot),
    )
}
