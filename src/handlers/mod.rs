pub mod config;
pub mod transcribe;

pub use self::config::*;
pub use transcribe::*;

use crate::error::AppError;
use actix_web::{HttpRequest, HttpResponse};

/// Fallback for unknown routes, rendered with the usual JSON error body.
pub async fn not_found(req: HttpRequest) -> Result<HttpResponse, AppError> {
    Err(AppError::NotFound(format!("{} {}", req.method(), req.path())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;
    use actix_web::{test, web, App};

    #[actix_web::test]
    async fn test_unknown_route_is_json_404() {
        let app = test::init_service(App::new().default_service(web::to(not_found))).await;

        let req = test::TestRequest::get().uri("/transcribe").to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);

        let body: serde_json::Value = test::read_body_json(res).await;
        assert_eq!(body["error"]["type"], "not_found");
    }
}
