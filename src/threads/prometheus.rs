//! Minimal Prometheus exposition endpoint (C10, optional per configuration).
//! Keeps the teacher's hand-rolled one-TCP-connection-at-a-time HTTP
//! response — there's exactly one route to serve, so pulling in a whole web
//! framework for it would be a worse fit than the teacher's own shape here.

use log::{error, info};
use std::io::prelude::*;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;

use crate::metrics::Metrics;

pub fn listen(addr: SocketAddr, metrics: Arc<Metrics>) {
    let listener = TcpListener::bind(&addr).unwrap_or_else(|e| panic!("failed to bind Prometheus endpoint to {}: {}", addr, e));
    info!("Listening for Prometheus scrapes on {}", &addr);

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => handle_connection(stream, &metrics),
            Err(e) => error!("Connection failed: {}", e),
        }
    }
}

fn handle_connection(mut stream: TcpStream, metrics: &Metrics) {
    let body = metrics.render();
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4\r\nContent-Length: {}\r\n\r\n{}",
        body.len(),
        body
    );

    if let Err(e) = stream.write_all(response.as_bytes()) {
        error!("Failed to write Prometheus response: {}", e);
        return;
    }
    let _ = stream.flush();
}
