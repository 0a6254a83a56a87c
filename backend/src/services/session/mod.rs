//! Storage of cookieless-embed tokens for the portal.
//!
//! - `POST /api/session/embed-tokens`: stores the tokens from a JSON body in the
//!   encrypted `looker_embed_tokens` cookie.
//! - `GET /api/session/embed-tokens`: returns the tokens held by that cookie, or
//!   `404` when there is no readable session.

use crate::session::{embed_tokens_cookie, read_embed_tokens, EmbedTokens, SessionCipher};
use actix_web::web::{get, post, scope};
use actix_web::{web, HttpRequest, HttpResponse, Scope};
use common::responses::ErrorEnvelope;

const API_PATH: &str = "/api/session";

/// Cipher and cookie flags shared by the session handlers.
#[derive(Clone)]
pub struct SessionState {
    pub cipher: SessionCipher,
    pub secure_cookies: bool,
}

pub fn configure_routes() -> Scope {
    scope(API_PATH)
        .route("/embed-tokens", post().to(store_embed_tokens))
        .route("/embed-tokens", get().to(load_embed_tokens))
}

async fn store_embed_tokens(
    tokens: web::Json<EmbedTokens>,
    state: web::Data<SessionState>,
) -> HttpResponse {
    match embed_tokens_cookie(&tokens, &state.cipher, state.secure_cookies) {
        Ok(cookie) => HttpResponse::NoContent().cookie(cookie).finish(),
        Err(e) => {
            log::error!("Could not seal embed session: {}", e);
            HttpResponse::InternalServerError().json(ErrorEnvelope {
                message: "Failed to store embed session".to_string(),
                error: Some(e.to_string()),
            })
        }
    }
}

async fn load_embed_tokens(req: HttpRequest, state: web::Data<SessionState>) -> HttpResponse {
    match read_embed_tokens(&req, &state.cipher) {
        Some(tokens) => HttpResponse::Ok().json(tokens),
        None => HttpResponse::NotFound().json(ErrorEnvelope {
            message: "No embed session".to_string(),
            error: None,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::EMBED_TOKENS_COOKIE;
    use actix_web::http::StatusCode;
    use actix_web::{test, App};

    fn tokens() -> EmbedTokens {
        EmbedTokens {
            session_reference_token: "ref".to_string(),
            api_token: "api".to_string(),
            authentication_token: "auth".to_string(),
            navigation_token: "nav".to_string(),
            api_token_ttl: Some(600),
            authentication_token_ttl: None,
            navigation_token_ttl: None,
            session_reference_token_ttl: Some(3600),
        }
    }

    #[actix_web::test]
    async fn stored_tokens_can_be_read_back() {
        let state = web::Data::new(SessionState {
            cipher: SessionCipher::new("secret"),
            secure_cookies: true,
        });
        let app =
            test::init_service(App::new().app_data(state.clone()).service(configure_routes())).await;

        let store = test::TestRequest::post()
            .uri("/api/session/embed-tokens")
            .set_json(tokens())
            .to_request();
        let resp = test::call_service(&app, store).await;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);

        let cookie = resp
            .response()
            .cookies()
            .find(|c| c.name() == EMBED_TOKENS_COOKIE)
            .unwrap()
            .into_owned();
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.http_only(), Some(true));
        assert!(!cookie.value().contains("\"ref\""));

        let load = test::TestRequest::get()
            .uri("/api/session/embed-tokens")
            .cookie(cookie)
            .to_request();
        let read: EmbedTokens = test::call_and_read_body_json(&app, load).await;
        assert_eq!(read, tokens());
    }

    #[actix_web::test]
    async fn missing_session_is_not_found() {
        let state = web::Data::new(SessionState {
            cipher: SessionCipher::new("secret"),
            secure_cookies: false,
        });
        let app = test::init_service(App::new().app_data(state).service(configure_routes())).await;

        let resp = test::call_service(
            &app,
            test::TestRequest::get()
                .uri("/api/session/embed-tokens")
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
