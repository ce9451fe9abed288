use crate::server::api::{HttpCommand, StatusResponse};
use crate::state::SystemStatus;
use crate::system::events::{RequestError, RequestSender};
use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, mutex::Mutex};
use esp_idf_svc::http::server::{Configuration, EspHttpServer};
use esp_idf_svc::http::Method;
use esp_idf_svc::io::{Read, Write};
use log::{debug, info, warn};
use std::sync::Arc;

const MAX_BODY_BYTES: usize = 1024;

const JSON_HEADERS: [(&str, &str); 3] = [
    ("Content-Type", "application/json"),
    ("Cache-Control", "no-cache"),
    ("Access-Control-Allow-Origin", "*"),
];

const TEXT_HEADERS: [(&str, &str); 2] = [
    ("Content-Type", "text/plain"),
    ("Access-Control-Allow-Origin", "*"),
];

pub struct HttpServer {
    state: Arc<Mutex<CriticalSectionRawMutex, SystemStatus>>,
    sender: RequestSender,
}

impl HttpServer {
    pub fn new(state: Arc<Mutex<CriticalSectionRawMutex, SystemStatus>>, sender: RequestSender) -> Self {
        Self { state, sender }
    }

    /// Register the handlers. The returned server stops when dropped.
    pub fn start(&self) -> anyhow::Result<EspHttpServer<'static>> {
        info!("Starting HTTP server");

        let config = Configuration {
            stack_size: 8192,
            session_timeout: std::time::Duration::from_secs(60),
            max_sessions: 8,
            ..Default::default()
        };
        let mut server = EspHttpServer::new(&config)?;

        let state_handle = Arc::clone(&self.state);
        server.fn_handler(
            "/status",
            Method::Get,
            move |request| -> Result<(), anyhow::Error> {
                debug!("Serving /status");

                let Ok(state) = state_handle.try_lock() else {
                    warn!("Status locked, returning 503");
                    let mut response =
                        request.into_response(503, Some("Service Unavailable"), &TEXT_HEADERS)?;
                    response.write_all(b"Status temporarily unavailable")?;
                    return Ok(());
                };
                let json = serde_json::to_string(&StatusResponse::from(&*state))?;
                drop(state);

                let mut response = request.into_response(200, Some("OK"), &JSON_HEADERS)?;
                response.write_all(json.as_bytes())?;
                Ok(())
            },
        )?;

        let sender = self.sender.clone();
        server.fn_handler(
            "/command",
            Method::Post,
            move |mut request| -> Result<(), anyhow::Error> {
                let mut body = Vec::new();
                let mut buffer = [0u8; 256];
                loop {
                    let n = request.read(&mut buffer)?;
                    if n == 0 {
                        break;
                    }
                    body.extend_from_slice(&buffer[..n]);
                    if body.len() > MAX_BODY_BYTES {
                        warn!("Command body over {} bytes, rejecting", MAX_BODY_BYTES);
                        let mut response =
                            request.into_response(413, Some("Payload Too Large"), &TEXT_HEADERS)?;
                        response.write_all(b"Command too large")?;
                        return Ok(());
                    }
                }

                let command = match serde_json::from_slice::<HttpCommand>(&body) {
                    Ok(command) => command,
                    Err(e) => {
                        warn!("Failed to parse command JSON: {}", e);
                        let mut response =
                            request.into_response(400, Some("Bad Request"), &TEXT_HEADERS)?;
                        response.write_all(format!("Invalid command: {}", e).as_bytes())?;
                        return Ok(());
                    }
                };

                info!("HTTP command: {:?}", command);
                match sender.try_request(command) {
                    Ok(()) => {
                        let mut response =
                            request.into_response(202, Some("Accepted"), &TEXT_HEADERS)?;
                        response.write_all(b"Command queued")?;
                    }
                    Err(RequestError::RequestQueueFull) => {
                        warn!("Request queue full, dropping HTTP command");
                        let mut response =
                            request.into_response(503, Some("Service Unavailable"), &TEXT_HEADERS)?;
                        response.write_all(b"Controller busy")?;
                    }
                }
                Ok(())
            },
        )?;

        info!("Available endpoints:");
        info!("  GET  /status  - pump and WiFi status");
        info!("  POST /command - queue a control command");

        Ok(server)
    }
}
