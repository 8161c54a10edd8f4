//! Login page and credential check served to the VPN client

use bytes::Bytes;
use http::header::{CONNECTION, CONTENT_TYPE, SET_COOKIE};
use http::{Method, Request};
use std::collections::HashMap;
use tracing::{debug, info};

use crate::ResponseRecorder;

const LOGIN_PROMPT: &str = "Please enter your username and password";
const LOGIN_RETRY: &str = "Incorrect username or password, please try again";

const CLEAR_CONTEXT_COOKIE: &str =
    "webvpncontext=; expires=Thu, 01 Jan 1970 22:00:00 GMT; path=/; Secure";

const SESSION_COOKIES: [&str; 4] = [
    "webvpncontext=+yXSlV8MpRNnURhSX/+05svIAydLG8ubYAypnKtK2yw=; Secure",
    "webvpn=+yXSlV8MpRNnURhSX/+05svIAydLG8ubYAypnKtK2yw=; Secure",
    "webvpnc=; expires=Thu, 01 Jan 1970 22:00:00 GMT; path=/; Secure",
    "webvpnc=bu:/&p:t&iu:1/&sh:15499E46D4D3E79817D0E341D7A7D87CF0B36760; path=/; Secure",
];

const AUTH_COMPLETE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<config-auth client="vpn" type="complete">
    <version who="sg">0.1(1)</version>
    <auth id="success">
        <title>SSL VPN Service</title>
    </auth>
</config-auth>"#;

// Placeholder until an authentication backend is wired in
const PLACEHOLDER_USER: &str = "h";
const PLACEHOLDER_PASSWORD: &str = "h";

/// `GET /index.html`: the auth-request document
pub fn login_page(recorder: &mut ResponseRecorder) {
    write_login(recorder, LOGIN_PROMPT);
}

/// `/auth`: check the submitted credentials
pub fn authenticate(request: &Request<Bytes>, recorder: &mut ResponseRecorder) {
    let form = form_fields(request);
    let username = form.get("username").map(String::as_str).unwrap_or("");
    let password = form.get("password").map(String::as_str).unwrap_or("");

    if username != PLACEHOLDER_USER || password != PLACEHOLDER_PASSWORD {
        debug!("Rejected login attempt for user {:?}", username);
        write_login(recorder, LOGIN_RETRY);
        return;
    }

    info!("User {} authenticated", username);
    recorder.set_header(CONNECTION, "Keep-Alive");
    recorder.set_header(CONTENT_TYPE, "text/xml");
    for cookie in SESSION_COOKIES {
        recorder.append_header(SET_COOKIE, cookie);
    }
    recorder.write(AUTH_COMPLETE.as_bytes());
}

fn write_login(recorder: &mut ResponseRecorder, message: &str) {
    recorder.set_header(CONTENT_TYPE, "text/xml");
    recorder.set_header(SET_COOKIE, CLEAR_CONTEXT_COOKIE);
    recorder.write(login_document(message).as_bytes());
}

fn login_document(message: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<config-auth client="vpn" type="auth-request">
    <version who="sg">0.1(1)</version>
    <auth id="main">
        <message>{}</message>
        <form method="post" action="/auth">
            <input type="text" name="username" label="Username:" />
            <input type="password" name="password" label="Password:" />
        </form>
    </auth>
</config-auth>"#,
        message
    )
}

/// Query parameters merged with an urlencoded body; body values win
fn form_fields(request: &Request<Bytes>) -> HashMap<String, String> {
    let mut fields: HashMap<String, String> = HashMap::new();

    if let Some(query) = request.uri().query() {
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            fields.entry(key.into_owned()).or_insert_with(|| value.into_owned());
        }
    }

    if has_form_body(request) {
        let mut from_body: HashMap<String, String> = HashMap::new();
        for (key, value) in url::form_urlencoded::parse(request.body()) {
            from_body
                .entry(key.into_owned())
                .or_insert_with(|| value.into_owned());
        }
        fields.extend(from_body);
    }

    fields
}

fn has_form_body(request: &Request<Bytes>) -> bool {
    let method = request.method();
    if method != Method::POST && method != Method::PUT && method != Method::PATCH {
        return false;
    }

    request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|v| v.trim().eq_ignore_ascii_case("application/x-www-form-urlencoded"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post_form(body: &'static str) -> Request<Bytes> {
        Request::post("/auth")
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Bytes::from_static(body.as_bytes()))
            .unwrap()
    }

    fn cookies(recorder: &ResponseRecorder) -> Vec<String> {
        recorder
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect()
    }

    fn body(recorder: &ResponseRecorder) -> String {
        String::from_utf8(recorder.body().to_vec()).unwrap()
    }

    #[test]
    fn test_login_page() {
        let mut recorder = ResponseRecorder::new();
        login_page(&mut recorder);

        assert_eq!(recorder.headers()[CONTENT_TYPE], "text/xml");
        assert_eq!(cookies(&recorder), vec![CLEAR_CONTEXT_COOKIE.to_string()]);
        let body = body(&recorder);
        assert!(body.contains(r#"type="auth-request""#));
        assert!(body.contains(LOGIN_PROMPT));
        assert!(body.contains(r#"action="/auth""#));
    }

    #[test]
    fn test_successful_auth() {
        let mut recorder = ResponseRecorder::new();
        authenticate(&post_form("username=h&password=h"), &mut recorder);

        assert_eq!(recorder.headers()[CONNECTION], "Keep-Alive");
        assert_eq!(recorder.headers()[CONTENT_TYPE], "text/xml");
        assert_eq!(cookies(&recorder), SESSION_COOKIES.to_vec());
        assert!(body(&recorder).contains(r#"type="complete""#));
        assert!(!recorder.wants_close());
    }

    #[test]
    fn test_wrong_password() {
        let mut recorder = ResponseRecorder::new();
        authenticate(&post_form("username=h&password=nope"), &mut recorder);

        assert_eq!(cookies(&recorder), vec![CLEAR_CONTEXT_COOKIE.to_string()]);
        let body = body(&recorder);
        assert!(body.contains(LOGIN_RETRY));
        assert!(body.contains(r#"type="auth-request""#));
    }

    #[test]
    fn test_query_credentials_accepted() {
        let request = Request::get("/auth?username=h&password=h")
            .body(Bytes::new())
            .unwrap();
        let mut recorder = ResponseRecorder::new();
        authenticate(&request, &mut recorder);
        assert_eq!(cookies(&recorder).len(), 4);
    }

    #[test]
    fn test_body_overrides_query() {
        let request = Request::post("/auth?username=h&password=h")
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded; charset=utf-8")
            .body(Bytes::from_static(b"password=wrong"))
            .unwrap();
        let mut recorder = ResponseRecorder::new();
        authenticate(&request, &mut recorder);
        assert!(body(&recorder).contains(LOGIN_RETRY));
    }

    #[test]
    fn test_body_ignored_without_form_content_type() {
        let request = Request::post("/auth")
            .header(CONTENT_TYPE, "text/plain")
            .body(Bytes::from_static(b"username=h&password=h"))
            .unwrap();
        let mut recorder = ResponseRecorder::new();
        authenticate(&request, &mut recorder);
        assert!(body(&recorder).contains(LOGIN_RETRY));
    }
}
