//! Decision result pages for the in-browser fallback path.

/// Render the result card shown after a decision link is clicked.
///
/// When `vscode_uri` is set (success pages only) the page tries to jump back
/// into the editor after 500 ms and surfaces a visible link after 2 s for
/// browsers that block the redirect.
#[must_use]
pub fn decision_page(
    title: &str,
    message: &str,
    success: bool,
    close_delay_secs: u64,
    vscode_uri: Option<&str>,
) -> String {
    let color = if success { "#28a745" } else { "#dc3545" };
    let icon = if success { "✓" } else { "✗" };

    let vscode_script = vscode_uri.map_or(String::new(), |uri| {
        format!(
            r#"
        setTimeout(function() {{
            window.location.href = "{uri}";
        }}, 500);
        setTimeout(function() {{
            var link = document.getElementById('ide-link');
            if (link) {{ link.style.display = 'block'; }}
        }}, 2000);"#
        )
    });
    let vscode_link = vscode_uri.map_or(String::new(), |uri| {
        format!(
            r#"<div id="ide-link" style="display:none; margin-top:12px;">
            <a href="{uri}">点击返回编辑器</a>
        </div>"#
        )
    });

    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <title>{title}</title>
    <style>
        body {{
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
            display: flex;
            justify-content: center;
            align-items: center;
            min-height: 100vh;
            margin: 0;
            background: #f5f5f5;
        }}
        .card {{
            background: white;
            border-radius: 12px;
            padding: 40px;
            text-align: center;
            box-shadow: 0 4px 12px rgba(0,0,0,0.1);
            max-width: 400px;
        }}
        .icon {{ font-size: 48px; color: {color}; margin-bottom: 20px; }}
        .title {{ font-size: 24px; color: #333; margin-bottom: 10px; }}
        .message {{ color: #666; line-height: 1.6; margin-bottom: 20px; }}
        .countdown {{
            color: #999;
            font-size: 14px;
            margin-top: 15px;
            padding-top: 15px;
            border-top: 1px solid #eee;
        }}
    </style>
</head>
<body>
    <div class="card">
        <div class="icon">{icon}</div>
        <div class="title">{title}</div>
        <div class="message">{message}</div>
        {vscode_link}
        <div class="countdown">
            页面将在 <span id="seconds">{close_delay_secs}</span> 秒后自动关闭
        </div>
    </div>
    <script>
        (function() {{
            var seconds = {close_delay_secs};
            var el = document.getElementById('seconds');
            var timer = setInterval(function() {{
                seconds--;
                if (el) {{ el.textContent = seconds; }}
                if (seconds <= 0) {{
                    clearInterval(timer);
                    try {{ window.close(); }} catch (e) {{}}
                }}
            }}, 1000);{vscode_script}
        }})();
    </script>
</body>
</html>"#
    )
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_page_has_title_and_countdown() {
        let page = decision_page("已批准运行", "权限请求已批准", true, 3, None);
        assert!(page.contains("<title>已批准运行</title>"));
        assert!(page.contains("#28a745"));
        assert!(page.contains(">3</span>"));
        assert!(!page.contains("ide-link"));
    }

    #[test]
    fn test_failure_page_uses_error_color() {
        let page = decision_page("操作失败", "已被处理", false, 3, None);
        assert!(page.contains("#dc3545"));
        assert!(page.contains("已被处理"));
    }

    #[test]
    fn test_vscode_redirect_embedded() {
        let page = decision_page(
            "已批准运行",
            "ok",
            true,
            3,
            Some("vscode://vscode-remote/tmp/project"),
        );
        assert!(page.contains(r#"window.location.href = "vscode://vscode-remote/tmp/project""#));
        assert!(page.contains("ide-link"));
    }
}
