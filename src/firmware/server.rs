use super::{CommandChannel, OutboundChannel, SharedStatus};
use crate::protocol::{parse_message, Outbound};
use esp_idf_svc::http::server::{ws::EspHttpWsDetachedSender, Configuration, EspHttpServer};
use esp_idf_svc::http::Method;
use esp_idf_svc::io::Write;
use esp_idf_svc::sys::EspError;
use esp_idf_svc::ws::FrameType;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

const MAX_MESSAGE_LEN: usize = 512;
const BROADCAST_INTERVAL_MS: u64 = 50;

type Clients = Arc<StdMutex<HashMap<i32, EspHttpWsDetachedSender>>>;

/// Start the HTTP server and the broadcaster thread. The returned server
/// must be kept alive for as long as clients should be served.
pub fn start(
    http_port: u16,
    session_log_path: String,
    commands: Arc<CommandChannel>,
    outbound: Arc<OutboundChannel>,
    status: SharedStatus,
) -> anyhow::Result<EspHttpServer<'static>> {
    info!("Starting HTTP server with WebSocket support on port {}", http_port);

    let config = Configuration {
        http_port,
        stack_size: 10240,
        session_timeout: std::time::Duration::from_secs(300),
        max_sessions: 8,
        ..Default::default()
    };
    let mut server = EspHttpServer::new(&config)?;
    let clients: Clients = Arc::new(StdMutex::new(HashMap::new()));

    server.fn_handler("/", Method::Get, |request| -> Result<(), anyhow::Error> {
        debug!("Serving main page");
        let html = include_str!("../../web/index.html");
        let mut response = request.into_response(
            200,
            Some("OK"),
            &[("Content-Type", "text/html"), ("Cache-Control", "no-cache")],
        )?;
        response.write_all(html.as_bytes())?;
        Ok(())
    })?;

    // Session log download
    server.fn_handler(
        "/temp.csv",
        Method::Get,
        move |request| -> Result<(), anyhow::Error> {
            match std::fs::read(&session_log_path) {
                Ok(contents) => {
                    let mut response = request.into_response(
                        200,
                        Some("OK"),
                        &[("Content-Type", "text/csv"), ("Cache-Control", "no-cache")],
                    )?;
                    response.write_all(&contents)?;
                }
                Err(e) => {
                    debug!("Session log not readable: {}", e);
                    let mut response = request.into_response(404, Some("Not Found"), &[])?;
                    response.write_all(b"No session log")?;
                }
            }
            Ok(())
        },
    )?;

    let ws_clients = Arc::clone(&clients);
    server.ws_handler("/ws", move |ws| -> Result<(), EspError> {
        let session = ws.session();

        if ws.is_new() {
            info!("WebSocket client {} connected", session);
            if let Ok(mut clients) = ws_clients.lock() {
                clients.insert(session, ws.create_detached_sender()?);
            }
            if let Ok(snapshot) = status.try_lock() {
                if let Ok(json) = Outbound::Status(*snapshot).to_json() {
                    ws.send(FrameType::Text(false), json.as_bytes())?;
                }
            }
            return Ok(());
        }

        if ws.is_closed() {
            info!("WebSocket client {} disconnected", session);
            if let Ok(mut clients) = ws_clients.lock() {
                clients.remove(&session);
            }
            return Ok(());
        }

        let (_frame_type, len) = ws.recv(&mut [])?;
        if len > MAX_MESSAGE_LEN {
            warn!("WebSocket client {} sent {} bytes, dropping", session, len);
            ws.send(FrameType::Text(false), b"Request too big")?;
            return Ok(());
        }

        let mut buffer = [0u8; MAX_MESSAGE_LEN];
        ws.recv(&mut buffer)?;
        let text = match std::str::from_utf8(&buffer[..len]) {
            Ok(text) => text.trim_end_matches('\0'),
            Err(e) => {
                warn!("Invalid UTF-8 from client {}: {}", session, e);
                return Ok(());
            }
        };
        debug!("WebSocket client {} sent: {}", session, text);

        match parse_message(text) {
            Ok(message) => {
                if commands.try_send(message).is_err() {
                    warn!("Command channel full, dropping message");
                }
            }
            Err(e) => {
                warn!("Rejected message from client {}: {}", session, e);
                if let Ok(json) = Outbound::Log(e.to_string()).to_json() {
                    ws.send(FrameType::Text(false), json.as_bytes())?;
                }
            }
        }
        Ok(())
    })?;

    let broadcast_clients = Arc::clone(&clients);
    std::thread::Builder::new()
        .name("ws-broadcast".into())
        .stack_size(6144)
        .spawn(move || broadcast_loop(outbound, broadcast_clients))?;

    info!("Available endpoints:");
    info!("  GET  / - Web interface");
    info!("  GET  /temp.csv - Session log");
    info!("  WS   /ws - Commands and telemetry");

    Ok(server)
}

/// Drain the outbound queue to every connected client. Clients whose send
/// fails are forgotten.
fn broadcast_loop(outbound: Arc<OutboundChannel>, clients: Clients) {
    loop {
        while let Ok(json) = outbound.try_receive() {
            if let Ok(mut clients) = clients.lock() {
                clients.retain(|session, sender| {
                    match sender.send(FrameType::Text(false), json.as_bytes()) {
                        Ok(()) => true,
                        Err(e) => {
                            warn!("Dropping WebSocket client {}: {:?}", session, e);
                            false
                        }
                    }
                });
            }
        }
        std::thread::sleep(std::time::Duration::from_millis(BROADCAST_INTERVAL_MS));
    }
}
