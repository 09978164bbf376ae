use crate::configuration::Settings;
use crate::mcp;
use crate::routes;
use actix_cors::Cors;
use actix_web::{dev::Server, web, App, HttpServer};
use std::net::TcpListener;
use std::sync::Arc;
use tracing_actix_web::TracingLogger;

pub fn run(
    listener: TcpListener,
    settings: Settings,
    registry: Arc<mcp::ToolRegistry>,
) -> Result<Server, std::io::Error> {
    let dispatcher = Arc::new(mcp::Dispatcher::new(
        registry,
        &settings.server_name,
        settings.mcp.tool_timeout(),
    ));
    let manager = web::Data::from(Arc::new(mcp::SessionManager::new(
        dispatcher,
        settings.mcp.clone(),
    )));

    let messages_path = settings.mcp.messages_path.clone();
    let settings = web::Data::new(settings);

    // No Compress middleware: it buffers the event stream.
    let server = HttpServer::new(move || {
        App::new()
            .wrap(TracingLogger::default())
            .wrap(Cors::permissive())
            .service(web::scope("/health_check").service(routes::health_check))
            .service(web::resource("/sse").route(web::get().to(mcp::sse_connect)))
            .service(
                web::resource(messages_path.as_str())
                    .route(web::post().to(mcp::post_message))
                    .route(web::delete().to(mcp::close_session)),
            )
            .app_data(manager.clone())
            .app_data(settings.clone())
    })
    .listen(listener)?
    .run();

    Ok(server)
}
