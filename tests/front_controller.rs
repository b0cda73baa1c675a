use campus_web::{
    action, Config, ConfigError, Csrf, CsrfConfig, DebugSessionCookieGenerator, FrontController,
    IncomingRequest, MemoryStore, Response, Router, SessionConfig, SessionError, SessionStore,
};
use chrono::{DateTime, Duration, TimeZone, Utc};

const FIREFOX: &str = "Mozilla/5.0 (X11; Linux x86_64; rv:124.0) Gecko/20100101 Firefox/124.0";

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap()
}

fn controller() -> FrontController<MemoryStore, DebugSessionCookieGenerator> {
    let mut router = Router::new();
    router
        .get("/", action(|_| Ok(Response::ok("welcome"))))
        .unwrap();
    router
        .get(
            "/courses/:courseId",
            action(|context| {
                let subscribed = context
                    .session
                    .get::<Vec<String>>("subscriptions")?
                    .unwrap_or_default();
                let course_id = context.variables.get("courseId").unwrap_or_default();
                let fields = context
                    .csrf
                    .form_fields(context.session, "subscribe", false, context.now)?;
                Ok(Response::ok(format!(
                    "course {course_id}, subscribed: {}\n{}",
                    subscribed.join(","),
                    fields.token
                )))
            }),
        )
        .unwrap();
    router
        .post(
            "/courses/:courseId/subscribe",
            action(|context| {
                let course_id = context
                    .variables
                    .get("courseId")
                    .unwrap_or_default()
                    .to_string();
                let mut subscribed = context
                    .session
                    .get::<Vec<String>>("subscriptions")?
                    .unwrap_or_default();
                subscribed.push(course_id.clone());
                context.session.set("subscriptions", subscribed)?;
                Ok(Response::redirect(&format!("/courses/{course_id}")))
            }),
        )
        .unwrap();
    router
        .get(
            "/login",
            action(|context| {
                let fields = context
                    .csrf
                    .form_fields(context.session, "login", true, context.now)?;
                Ok(Response::ok(fields.token))
            }),
        )
        .unwrap();
    router
        .post(
            "/login",
            action(|context| {
                context.csrf.invalidate_token(context.session, "login")?;
                context.session.set("user_id", 11u32)?;
                context.session.regenerate()?;
                Ok(Response::redirect("/"))
            }),
        )
        .unwrap();
    router
        .get(
            "/grades",
            action(|context| {
                // Grades are only shown within a login, anything else has to log in again.
                let user_id = context
                    .session
                    .get::<u32>("user_id")?
                    .ok_or(SessionError::RegenerationWindowExpired)?;
                Ok(Response::ok(format!("grades of {user_id}")))
            }),
        )
        .unwrap();
    router
        .post(
            "/logout",
            action(|context| {
                context.session.destroy()?;
                Ok(Response::redirect("/"))
            }),
        )
        .unwrap();

    FrontController::new(
        router,
        SessionStore::new_with_cookie_generator(
            MemoryStore::new(),
            DebugSessionCookieGenerator::new(32),
            SessionConfig::default(),
        )
        .unwrap(),
        Csrf::new(&CsrfConfig::default()),
    )
}

fn get(path: &str, cookie: &str) -> IncomingRequest {
    IncomingRequest::new("GET", path)
        .with_session_cookie(cookie)
        .with_user_agent(FIREFOX)
}

fn post(path: &str, cookie: &str, key: &str, token: &str) -> IncomingRequest {
    IncomingRequest::new("POST", path)
        .with_session_cookie(cookie)
        .with_user_agent(FIREFOX)
        .with_form_field("csrf_key", key)
        .with_form_field("csrf_token", token)
}

/// The session cookie value set by `response`.
fn cookie_of(response: &Response) -> String {
    let header = response.header("Set-Cookie").expect("no Set-Cookie header");
    let value = header
        .strip_prefix("session=")
        .and_then(|rest| rest.split(';').next())
        .expect("malformed Set-Cookie header");
    value.to_string()
}

fn set_cookie_headers(response: &Response) -> Vec<&str> {
    response
        .headers
        .iter()
        .filter(|(name, _)| name.eq_ignore_ascii_case("Set-Cookie"))
        .map(|(_, value)| value.as_str())
        .collect()
}

fn last_line(response: &Response) -> &str {
    response.body.lines().last().unwrap_or_default()
}

#[test]
fn first_request_starts_a_session() {
    let controller = controller();
    let response = controller.handle(&IncomingRequest::new("GET", "/").with_user_agent(FIREFOX), now());
    assert_eq!(response.status, 200);
    assert_eq!(response.body, "welcome");
    assert_eq!(cookie_of(&response), format!("{:032}", 0));
    assert_eq!(
        response.header("set-cookie"),
        Some(
            format!(
                "session={:032}; Expires=Sat, 02 Mar 2024 10:00:00 GMT; Path=/; HttpOnly; SameSite=Lax",
                0
            )
            .as_str()
        )
    );

    let response = controller.handle(&get("/", &cookie_of(&response)), now());
    assert_eq!(response.status, 200);
    assert_eq!(response.header("Set-Cookie"), None);
}

#[test]
fn unknown_paths_are_not_found() {
    let controller = controller();
    let response = controller.handle(&get("/lecturers", "none"), now());
    assert_eq!(response.status, 404);
}

#[test]
fn known_paths_with_other_methods_are_not_allowed() {
    let controller = controller();
    let response = controller.handle(&IncomingRequest::new("DELETE", "/login"), now());
    assert_eq!(response.status, 405);
    assert_eq!(response.header("Allow"), Some("GET, POST"));
}

#[test]
fn form_submission_round_trip() {
    let controller = controller();
    let response = controller.handle(&get("/courses/42", "none"), now());
    assert_eq!(response.status, 200);
    let cookie = cookie_of(&response);
    let token = last_line(&response).to_string();

    let response = controller.handle(
        &post("/courses/42/subscribe", &cookie, "subscribe", &token),
        now(),
    );
    assert_eq!(response.status, 303);
    assert_eq!(response.header("Location"), Some("/courses/42"));

    let response = controller.handle(&get("/courses/42", &cookie), now());
    assert!(response.body.starts_with("course 42, subscribed: 42\n"));

    // The token was single-use.
    let response = controller.handle(
        &post("/courses/42/subscribe", &cookie, "subscribe", &token),
        now(),
    );
    assert_eq!(response.status, 403);
}

#[test]
fn forged_submissions_are_forbidden() {
    let controller = controller();
    let response = controller.handle(&get("/courses/7", "none"), now());
    let cookie = cookie_of(&response);

    let without_fields = IncomingRequest::new("POST", "/courses/7/subscribe")
        .with_session_cookie(cookie.as_str())
        .with_user_agent(FIREFOX);
    assert_eq!(controller.handle(&without_fields, now()).status, 403);

    let forged = post("/courses/7/subscribe", &cookie, "subscribe", "00");
    let response = controller.handle(&forged, now());
    assert_eq!(response.status, 403);
    assert_eq!(
        response.body,
        "The form has expired or was already submitted, please reload the page"
    );

    // Nothing was subscribed.
    let response = controller.handle(&get("/courses/7", &cookie), now());
    assert!(response.body.starts_with("course 7, subscribed: \n"));
}

#[test]
fn changed_user_agent_requires_a_new_login() {
    let controller = controller();
    let response = controller.handle(&get("/", "none"), now());
    let cookie = cookie_of(&response);

    let hijacked = IncomingRequest::new("GET", "/")
        .with_session_cookie(cookie.as_str())
        .with_user_agent("curl/8.5.0");
    let response = controller.handle(&hijacked, now());
    assert_eq!(response.status, 401);
    assert!(response
        .header("Set-Cookie")
        .unwrap()
        .starts_with("session=; Expires=Thu, 01 Jan 1970"));
    assert!(controller.sessions().implementation().is_empty());
}

#[test]
fn login_rotates_the_session_id() {
    let controller = controller();
    let response = controller.handle(&get("/login", "none"), now());
    let old_cookie = cookie_of(&response);
    let token = response.body.clone();

    let response = controller.handle(&post("/login", &old_cookie, "login", &token), now());
    assert_eq!(response.status, 303);
    let new_cookie = cookie_of(&response);
    assert_ne!(new_cookie, old_cookie);

    // The multi-use login token was invalidated explicitly.
    let response = controller.handle(&post("/login", &new_cookie, "login", &token), now());
    assert_eq!(response.status, 403);

    // The old cookie follows to the new session during the grace window, then stops working.
    let response = controller.handle(&get("/", &old_cookie), now() + Duration::minutes(5));
    assert_eq!(response.status, 200);
    assert_eq!(cookie_of(&response), new_cookie);

    let response = controller.handle(
        &get("/", &old_cookie),
        now() + Duration::minutes(5) + Duration::seconds(1),
    );
    assert_eq!(response.status, 401);
}

#[test]
fn logout_deletes_the_cookie() {
    let controller = controller();
    let response = controller.handle(&get("/login", "none"), now());
    let cookie = cookie_of(&response);
    let token = response.body.clone();

    // Any form token authorizes the logout form in this setup.
    let response = controller.handle(&post("/logout", &cookie, "login", &token), now());
    assert_eq!(response.status, 303);
    assert!(response.header("Set-Cookie").unwrap().starts_with("session=;"));
    assert!(controller.sessions().implementation().is_empty());
}

#[test]
fn actions_requiring_a_new_login_delete_the_cookie_once() {
    let controller = controller();
    let response = controller.handle(&get("/grades", "none"), now());
    assert_eq!(response.status, 401);
    let cookies = set_cookie_headers(&response);
    assert_eq!(cookies.len(), 1);
    assert!(cookies[0].starts_with("session=;"));
    assert!(controller.sessions().implementation().is_empty());
}

#[test]
fn actions_requiring_a_new_login_end_a_rotated_session() {
    let controller = controller();
    let response = controller.handle(&get("/", "none"), now());
    let cookie = cookie_of(&response);

    // The session is rotated on this request before the action rejects it.
    let response = controller.handle(&get("/grades", &cookie), now() + Duration::minutes(31));
    assert_eq!(response.status, 401);
    let cookies = set_cookie_headers(&response);
    assert_eq!(cookies.len(), 1);
    assert!(cookies[0].starts_with("session=;"));
    assert!(controller.sessions().implementation().is_empty());
}

#[test]
fn invalid_configuration_is_rejected() {
    let mut config = Config::default();
    config.session.cookie_length = 0;
    config.csrf.token_field = config.csrf.key_field.clone();

    match FrontController::with_config(Router::new(), MemoryStore::new(), &config) {
        Err(ConfigError::Validation(errors)) => assert_eq!(errors.len(), 2),
        other => panic!("expected a validation error, got {other:?}"),
    }
    assert!(FrontController::with_config(Router::new(), MemoryStore::new(), &Config::default()).is_ok());
}
