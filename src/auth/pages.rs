//! # 授权流程中的 HTML 页面

/// 转义 HTML 特殊字符
#[must_use]
pub fn escape_html(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn layout(title: &str, body: &str, head_extra: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>{title}</title>
{head_extra}<style>
body {{ font-family: system-ui, sans-serif; display: flex; align-items: center; justify-content: center; min-height: 100vh; margin: 0; background: #f6f7f9; color: #1f2328; }}
main {{ background: #fff; padding: 2rem 2.5rem; border-radius: 12px; box-shadow: 0 2px 12px rgba(0,0,0,.08); max-width: 28rem; text-align: center; }}
a.button {{ display: inline-block; margin-top: 1rem; padding: .6rem 1.2rem; background: #1f6feb; color: #fff; border-radius: 6px; text-decoration: none; }}
</style>
</head>
<body>
<main>
{body}
</main>
</body>
</html>"#,
        title = escape_html(title)
    )
}

/// 授权完成后的过渡页，自动跳回客户端
#[must_use]
pub fn success_page(redirect_url: &str) -> String {
    let href = escape_html(redirect_url);
    let script_target = serde_json::to_string(redirect_url)
        .unwrap_or_else(|_| "\"/\"".to_string())
        .replace('<', "\\u003c");
    layout(
        "Signed in",
        &format!(
            r#"<h1>Signed in</h1>
<p>Authorization complete. Returning you to your application.</p>
<a class="button" href="{href}">Continue</a>
<script>window.location.replace({script_target});</script>"#
        ),
        &format!(r#"<meta http-equiv="refresh" content="1;url={href}">"#),
    )
}

/// 需要注册的提示页，附带返回授权流程的链接
#[must_use]
pub fn registration_required_page(registration_url: &str) -> String {
    let href = escape_html(registration_url);
    layout(
        "Registration required",
        &format!(
            r#"<h1>Registration required</h1>
<p>Your account is not registered yet. Create an account, then you will be sent back to finish signing in.</p>
<a class="button" href="{href}">Register</a>"#
        ),
        "",
    )
}

/// 账号已删除的提示页
#[must_use]
pub fn account_deleted_page() -> String {
    layout(
        "Account deleted",
        r"<h1>Account deleted</h1>
<p>This account has been deleted and can no longer sign in. Contact support if you believe this is a mistake.</p>",
        "",
    )
}
