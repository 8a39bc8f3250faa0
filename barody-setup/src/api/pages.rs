// HTML pages for the setup flow

use axum::response::Html;

use crate::api::forms::AdminCreationForm;
use crate::api::session::FlashMessage;
use crate::database::accounts::AdminAccount;
use crate::error::ValidationErrors;
use crate::models::responses::{InstallationInfo, SetupProgress};
use crate::utils::validation::is_local_redirect;

const STYLE: &str = r#"
        body { font-family: Arial, sans-serif; max-width: 640px; margin: 50px auto; padding: 20px; color: #222; }
        .success { background: #d4edda; border: 1px solid #c3e6cb; color: #155724; padding: 12px; border-radius: 5px; margin: 12px 0; }
        .info { background: #e7f1ff; border: 1px solid #b6d4fe; color: #084298; padding: 12px; border-radius: 5px; margin: 12px 0; }
        .error { background: #f8d7da; border: 1px solid #f5c2c7; color: #842029; padding: 12px; border-radius: 5px; margin: 12px 0; }
        .field-error { color: #842029; font-size: 0.9em; }
        .button { background: #007bff; color: white; padding: 10px 20px; text-decoration: none; border-radius: 5px; display: inline-block; margin: 10px 0; border: 0; }
        label { display: block; margin-top: 12px; }
        input { width: 100%; padding: 6px; }
        code { background: #f1f1f1; padding: 2px 4px; }
"#;

fn escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

fn layout(title: &str, body: &str) -> Html<String> {
    Html(format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <title>{title} - Barodybroject Setup</title>
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <style>{STYLE}</style>
</head>
<body>
{body}
</body>
</html>
"#,
        title = escape(title),
    ))
}

fn render_messages(messages: &[FlashMessage]) -> String {
    messages
        .iter()
        .map(|m| format!(r#"<div class="{}">{}</div>"#, m.level.css_class(), escape(&m.text)))
        .collect::<Vec<_>>()
        .join("\n")
}

fn check(ok: bool) -> &'static str {
    if ok {
        "&#10003;"
    } else {
        "&#10007;"
    }
}

/// Landing page state.
#[derive(Debug, Clone, Default)]
pub struct WizardView {
    pub progress: SetupProgress,
    pub messages: Vec<FlashMessage>,
    /// Set only when the token re-validated on this request.
    pub valid_token: Option<String>,
    pub token_error: Option<String>,
}

pub fn wizard_page(view: &WizardView) -> Html<String> {
    let p = &view.progress;
    let checklist = format!(
        r#"<ul>
    <li>{} Database reachable</li>
    <li>{} Migrations applied</li>
    <li>{} No administrator yet</li>
</ul>"#,
        check(p.database_ready),
        check(p.migrations_applied),
        check(!p.admin_exists),
    );

    let action = match &view.valid_token {
        Some(token) if p.ready_for_admin_creation => format!(
            r#"<div class="success">Setup token accepted.</div>
<a class="button" href="/setup/create-admin/?token={}">Create the administrator account</a>"#,
            escape(token)
        ),
        Some(_) => r#"<div class="info">Setup token accepted, but the system is not ready for administrator creation yet. Fix the items above and reload.</div>"#.to_string(),
        None => {
            let error = view
                .token_error
                .as_deref()
                .map(|e| format!(r#"<p class="field-error">{}</p>"#, escape(e)))
                .unwrap_or_default();
            format!(
                r#"<p>Generate a one-time setup token on the server:</p>
<p><code>barody-setup setup-wizard --headless</code></p>
<p>Then open the printed URL, or paste the token here:</p>
<form action="/setup/" method="POST">
    <label>Setup token <input type="text" name="token" autocomplete="off"></label>
    {error}
    <button class="button" type="submit">Continue</button>
</form>"#
            )
        }
    };

    layout(
        "Welcome",
        &format!(
            "<h1>Welcome to Barodybroject</h1>\n{}\n<h2>System checks</h2>\n{}\n{}",
            render_messages(&view.messages),
            checklist,
            action
        ),
    )
}

fn field(
    name: &str,
    label: &str,
    kind: &str,
    value: &str,
    errors: &ValidationErrors,
) -> String {
    let error = errors
        .get(name)
        .map(|e| format!(r#"<span class="field-error">{}</span>"#, escape(e)))
        .unwrap_or_default();
    format!(
        r#"<label>{label} <input type="{kind}" name="{name}" value="{value}"></label>{error}"#,
        label = escape(label),
        value = escape(value),
    )
}

pub fn create_admin_page(
    form: &AdminCreationForm,
    errors: &ValidationErrors,
    messages: &[FlashMessage],
) -> Html<String> {
    let summary = if errors.is_empty() {
        String::new()
    } else {
        r#"<div class="error">Please correct the errors below.</div>"#.to_string()
    };
    let token_error = errors
        .get("token")
        .map(|e| format!(r#"<p class="field-error">{}</p>"#, escape(e)))
        .unwrap_or_default();

    let body = format!(
        r#"<h1>Create administrator</h1>
{messages}
{summary}
<form action="/setup/create-admin/" method="POST">
    <input type="hidden" name="token" value="{token}">
    {token_error}
    {username}
    {email}
    {first_name}
    {last_name}
    {password}
    {password_confirm}
    <button class="button" type="submit">Create account</button>
</form>"#,
        messages = render_messages(messages),
        token = escape(form.token.trim()),
        username = field("username", "Username", "text", &form.username, errors),
        email = field("email", "Email", "email", &form.email, errors),
        first_name = field("first_name", "First name", "text", &form.first_name, errors),
        last_name = field("last_name", "Last name", "text", &form.last_name, errors),
        password = field("password", "Password", "password", &form.password, errors),
        password_confirm = field(
            "password_confirm",
            "Confirm password",
            "password",
            &form.password_confirm,
            errors
        ),
    );
    layout("Create administrator", &body)
}

fn installation_details(info: &InstallationInfo) -> String {
    let mut rows = Vec::new();
    if let Some(id) = &info.installation_id {
        rows.push(format!("<li>Installation ID: <code>{}</code></li>", escape(id)));
    }
    if let Some(at) = info.completed_at {
        rows.push(format!(
            "<li>Completed: {}</li>",
            at.format("%Y-%m-%d %H:%M:%S UTC")
        ));
    }
    if let Some(version) = &info.version {
        rows.push(format!("<li>Version: {}</li>", escape(version)));
    }
    if rows.is_empty() {
        return String::new();
    }
    format!("<ul class=\"details\">\n{}\n</ul>", rows.join("\n"))
}

pub fn complete_page(
    admin: Option<&AdminAccount>,
    info: &InstallationInfo,
    next_url: Option<&str>,
    messages: &[FlashMessage],
) -> Html<String> {
    let who = admin
        .map(|a| format!("<p>Signed in as <strong>{}</strong>.</p>", escape(&a.username)))
        .unwrap_or_default();
    let resume = next_url
        .filter(|u| is_local_redirect(u))
        .map(|u| format!(r#"<p><a href="{}">Continue where you left off</a></p>"#, escape(u)))
        .unwrap_or_default();
    let body = format!(
        r#"<h1>Setup complete</h1>
{messages}
{who}
{details}
<ol>
    <li>Configure an assistant in the admin area.</li>
    <li>Generate your first article draft.</li>
    <li>Review the site settings before publishing.</li>
</ol>
<a class="button" href="/admin/">Go to the admin area</a>
{resume}"#,
        messages = render_messages(messages),
        details = installation_details(info),
    );
    layout("Setup complete", &body)
}

pub fn redirect_help_page() -> Html<String> {
    layout(
        "Setup token required",
        r#"<h1>Setup token required</h1>
<p>No setup token was found in this browser session.</p>
<p>Run <code>barody-setup setup-wizard --headless</code> on the server and open the printed URL,
or enter the token on the <a href="/setup/">setup page</a>.</p>"#,
    )
}

pub fn admin_landing_page(admin: Option<&AdminAccount>, messages: &[FlashMessage]) -> Html<String> {
    let who = match admin {
        Some(a) => format!(
            "<p>Signed in as <strong>{}</strong> ({}).</p>",
            escape(&a.username),
            escape(&a.email)
        ),
        None => "<p>You are not signed in.</p>".to_string(),
    };
    layout(
        "Administration",
        &format!(
            "<h1>Barodybroject administration</h1>\n{}\n{}",
            render_messages(messages),
            who
        ),
    )
}

pub fn index_page() -> Html<String> {
    layout(
        "Home",
        r#"<h1>Barodybroject</h1>
<p>The site is installed and running.</p>
<a class="button" href="/admin/">Administration</a>"#,
    )
}

pub fn not_found_page() -> Html<String> {
    layout("Not found", "<h1>Page not found</h1>")
}
