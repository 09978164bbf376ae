use actix_web::{get, web, HttpResponse};
use serde_json::json;

use crate::mcp::SessionManager;

#[get("")]
pub async fn health_check(manager: web::Data<SessionManager>) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "ok",
        "sessions": manager.len(),
        "tools": manager.dispatcher().registry().len(),
    }))
}
