//! Session and refresh cookies
//!
//! The refresh cookie is scoped to the refresh endpoint so it is never sent
//! with ordinary requests.

use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use crm_core::config::{AuthConfig, CookieConfig};

fn same_site(value: &str) -> SameSite {
    match value.to_ascii_lowercase().as_str() {
        "strict" => SameSite::Strict,
        "none" => SameSite::None,
        _ => SameSite::Lax,
    }
}

fn token_cookie(
    config: &CookieConfig,
    name: &str,
    path: &str,
    value: &str,
    max_age_secs: u64,
) -> Cookie<'static> {
    Cookie::build((name.to_string(), value.to_string()))
        .path(path.to_string())
        .http_only(true)
        .secure(config.secure)
        .same_site(same_site(&config.same_site))
        .max_age(time::Duration::seconds(
            i64::try_from(max_age_secs).unwrap_or(i64::MAX),
        ))
        .build()
}

/// Add both token cookies to the jar
pub fn set_session_cookies(
    jar: CookieJar,
    auth: &AuthConfig,
    session_token: &str,
    refresh_token: &str,
) -> CookieJar {
    let config = &auth.cookies;
    jar.add(token_cookie(
        config,
        &config.session_cookie_name,
        &config.session_cookie_path,
        session_token,
        auth.session_ttl_secs,
    ))
    .add(token_cookie(
        config,
        &config.refresh_cookie_name,
        &config.refresh_cookie_path,
        refresh_token,
        auth.refresh_ttl_secs,
    ))
}

/// Expire both token cookies
///
/// Removal cookies are always emitted, even when the request authenticated
/// with a bearer header and carried no cookies.
pub fn clear_session_cookies(jar: CookieJar, config: &CookieConfig) -> CookieJar {
    jar.add(removal_cookie(
        &config.session_cookie_name,
        &config.session_cookie_path,
    ))
    .add(removal_cookie(
        &config.refresh_cookie_name,
        &config.refresh_cookie_path,
    ))
}

fn removal_cookie(name: &str, path: &str) -> Cookie<'static> {
    let mut cookie = Cookie::build((name.to_string(), String::new()))
        .path(path.to_string())
        .http_only(true)
        .build();
    cookie.make_removal();
    cookie
}

/// Refresh token from its cookie
pub fn refresh_token_from(jar: &CookieJar, config: &CookieConfig) -> Option<String> {
    jar.get(&config.refresh_cookie_name)
        .map(|cookie| cookie.value().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cookie_attributes() {
        let auth = AuthConfig::default();
        let jar = set_session_cookies(CookieJar::new(), &auth, "session-value", "refresh-value");

        let session = jar.get(&auth.cookies.session_cookie_name).unwrap();
        assert_eq!(session.value(), "session-value");
        assert_eq!(session.path(), Some("/"));
        assert_eq!(session.http_only(), Some(true));
        assert_eq!(
            session.max_age(),
            Some(time::Duration::seconds(86_400))
        );

        let refresh = jar.get(&auth.cookies.refresh_cookie_name).unwrap();
        assert_eq!(refresh.path(), Some("/api/v1/auth/refresh"));
        assert_eq!(
            refresh.max_age(),
            Some(time::Duration::seconds(604_800))
        );
        assert_eq!(
            refresh_token_from(&jar, &auth.cookies).as_deref(),
            Some("refresh-value")
        );
    }

    #[test]
    fn test_same_site_parsing() {
        assert_eq!(same_site("Strict"), SameSite::Strict);
        assert_eq!(same_site("none"), SameSite::None);
        assert_eq!(same_site("anything"), SameSite::Lax);
    }

    #[test]
    fn test_clear_expires_both() {
        let auth = AuthConfig::default();
        let jar = clear_session_cookies(CookieJar::new(), &auth.cookies);

        let names = [
            &auth.cookies.session_cookie_name,
            &auth.cookies.refresh_cookie_name,
        ];
        for name in names {
            let cookie = jar.get(name).unwrap();
            assert_eq!(cookie.value(), "");
            assert_eq!(cookie.max_age(), Some(time::Duration::ZERO));
        }
        assert_eq!(
            jar.get(&auth.cookies.refresh_cookie_name).unwrap().path(),
            Some("/api/v1/auth/refresh")
        );
    }
}
