//! Minimal server-rendered pages for browser visitors.

use axum::{middleware, response::Html, routing::get, Router};

use crate::{
    auth::{
        extractors::{CurrentUser, MaybeUser},
        middleware::{is_logged_in, protect},
    },
    state::AppState,
};

pub fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
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

fn layout(title: &str, nav: &str, main: &str) -> Html<String> {
    Html(format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head><meta charset=\"utf-8\"><title>Tourbook | {}</title></head>\n\
         <body>\n<header><nav>{nav}</nav></header>\n<main>{main}</main>\n</body>\n</html>\n",
        escape_html(title)
    ))
}

fn nav_for(user: Option<&crate::users::repo_types::User>) -> String {
    match user {
        Some(u) => format!(
            "<a href=\"/api/v1/users/logout\">Log out</a> <a href=\"/me\">{}</a>",
            escape_html(u.first_name())
        ),
        None => "<a href=\"/login\">Log in</a>".to_string(),
    }
}

pub fn error_page(title: &str, message: &str) -> Html<String> {
    layout(
        title,
        &nav_for(None),
        &format!(
            "<div class=\"error\"><h2>{}</h2><p>{}</p></div>",
            escape_html(title),
            escape_html(message)
        ),
    )
}

pub async fn overview(MaybeUser(user): MaybeUser) -> Html<String> {
    let greeting = match &user {
        Some(u) => format!("Welcome back, {}!", escape_html(u.first_name())),
        None => "Welcome to Tourbook!".to_string(),
    };
    layout("All Tours", &nav_for(user.as_ref()), &format!("<h1>{greeting}</h1>"))
}

pub async fn login_form(MaybeUser(user): MaybeUser) -> Html<String> {
    let form = "<form id=\"login\" method=\"post\" action=\"/api/v1/users/login\">\
                <input type=\"email\" name=\"email\"><input type=\"password\" name=\"password\">\
                <button>Login</button></form>";
    layout("Log into your account", &nav_for(user.as_ref()), form)
}

pub async fn account(CurrentUser(user): CurrentUser) -> Html<String> {
    let main = format!(
        "<h2>Your account settings</h2><p>{}</p><p>{}</p>",
        escape_html(&user.name),
        escape_html(&user.email)
    );
    layout("Your account", &nav_for(Some(&user)), &main)
}

pub fn router(state: &AppState) -> Router<AppState> {
    let public = Router::new()
        .route("/", get(overview))
        .route("/login", get(login_form))
        .route_layer(middleware::from_fn_with_state(state.clone(), is_logged_in));
    let private = Router::new()
        .route("/me", get(account))
        .route_layer(middleware::from_fn_with_state(state.clone(), protect));
    public.merge(private)
}
