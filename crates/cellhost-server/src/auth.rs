//! Request authorization.
//!
//! A ticket is a short one-use secret handed to a user out of band, usually
//! as a `?ticket=` query parameter of the URL printed at startup. Presenting
//! a valid ticket consumes it and sets a `token` cookie holding a long
//! multi-use secret that authorizes later requests.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use axum::extract::{Request, State};
use axum::http::header::{COOKIE, SET_COOKIE};
use axum::http::{HeaderValue, Method};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use rand::Rng;
use rand::distr::Alphanumeric;
use rustc_hash::FxHashSet;

use crate::error::{HttpError, ServerError};
use crate::routes::AppState;

pub const TICKET_LENGTH: usize = 12;
pub const TOKEN_LENGTH: usize = 64;

/// Issued tickets and tokens.
#[derive(Debug, Default)]
pub struct Auth {
    tickets: Mutex<FxHashSet<String>>,
    tokens: Mutex<FxHashSet<String>>,
}

fn secret(length: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

fn guard<T>(set: &Mutex<T>) -> MutexGuard<'_, T> {
    set.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Auth {
    /// Issue a one-use ticket.
    pub fn ticket_create(&self) -> String {
        let ticket = secret(TICKET_LENGTH);
        guard(&self.tickets).insert(ticket.clone());
        ticket
    }

    /// Consume a ticket. Returns whether it was valid.
    pub fn ticket_check(&self, ticket: &str) -> bool {
        guard(&self.tickets).remove(ticket)
    }

    /// Issue a multi-use token.
    pub fn token_create(&self) -> String {
        let token = secret(TOKEN_LENGTH);
        guard(&self.tokens).insert(token.clone());
        token
    }

    pub fn token_check(&self, token: &str) -> bool {
        guard(&self.tokens).contains(token)
    }
}

fn query_param<'a>(request: &'a Request, key: &str) -> Option<&'a str> {
    request.uri().query()?.split('&').find_map(|pair| {
        let (name, value) = pair.split_once('=')?;
        (name == key).then_some(value)
    })
}

fn cookie<'a>(request: &'a Request, key: &str) -> Option<&'a str> {
    request
        .headers()
        .get_all(COOKIE)
        .iter()
        .filter_map(|header| header.to_str().ok())
        .flat_map(|header| header.split(';'))
        .find_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            (name == key).then_some(value)
        })
}

/// Middleware rejecting requests without a valid ticket or token.
///
/// Preflight `OPTIONS` requests carry no credentials and are let through.
pub async fn authorize(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    if !state.config.authorization || request.method() == Method::OPTIONS {
        return next.run(request).await;
    }

    let denied = || {
        HttpError {
            error: ServerError::Unauthorized,
            debug: state.config.debug,
        }
        .into_response()
    };

    if let Some(ticket) = query_param(&request, "ticket").map(str::to_string) {
        if !state.auth.ticket_check(&ticket) {
            return denied();
        }
        let token = state.auth.token_create();
        let mut response = next.run(request).await;
        if let Ok(value) = HeaderValue::from_str(&format!("token={token}; Path=/")) {
            response.headers_mut().insert(SET_COOKIE, value);
        }
        return response;
    }

    let valid = cookie(&request, "token").is_some_and(|token| state.auth.token_check(token));
    if valid {
        next.run(request).await
    } else {
        denied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tickets_are_single_use() {
        let auth = Auth::default();
        let ticket = auth.ticket_create();
        assert_eq!(ticket.len(), TICKET_LENGTH);
        assert!(ticket.chars().all(|c| c.is_ascii_alphanumeric()));
        assert!(auth.ticket_check(&ticket));
        assert!(!auth.ticket_check(&ticket));
        assert!(!auth.ticket_check("nope"));
    }

    #[test]
    fn test_tokens_are_reusable() {
        let auth = Auth::default();
        let token = auth.token_create();
        assert_eq!(token.len(), TOKEN_LENGTH);
        assert!(auth.token_check(&token));
        assert!(auth.token_check(&token));
        assert!(!auth.token_check("nope"));
    }

    #[test]
    fn test_request_parsing() {
        let request = Request::builder()
            .uri("/?a=1&ticket=abc")
            .header(COOKIE, "x=1; token=xyz")
            .body(axum::body::Body::empty())
            .unwrap();
        assert_eq!(query_param(&request, "ticket"), Some("abc"));
        assert_eq!(query_param(&request, "b"), None);
        assert_eq!(cookie(&request, "token"), Some("xyz"));
        assert_eq!(cookie(&request, "x"), Some("1"));
    }
}
