use actix_web::{App, HttpServer, dev::Server, middleware, web};

use crate::config::ServerConfig;
use crate::routes::{AppState, configure, json_error_handler};

pub fn build_server(server_config: ServerConfig, state: AppState) -> std::io::Result<Server> {
    let mode = state.mode;
    let state = web::Data::new(state);

    let address = server_config
        .bind_address
        .unwrap_or("127.0.0.1".to_string());
    let port = server_config.bind_port.unwrap_or(12345);
    log::info!("Serving {} mode API on {address}:{port}", mode.as_str());

    let server = HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .app_data(web::JsonConfig::default().error_handler(json_error_handler))
            .wrap(middleware::Logger::default())
            .configure(configure(mode))
    })
    .bind((address, port))?
    .run();

    Ok(server)
}
