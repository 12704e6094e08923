//! Minimal smoke test: a `GET /echo` endpoint that reflects the request
//! path back as the response body, plus a `GET /` landing page.

use weft::{FiberConfig, Request, RouterBuilder, ServerConfig};

fn index(req: &mut Request<'_>) {
    let _ = req.set_header("Content-Type", "text/plain");
    let _ = req.write_body(b"weft echo demo: try GET /echo\n");
}

fn echo(req: &mut Request<'_>) {
    let body = format!("{}\n", req.path());
    let _ = req.set_header("Content-Type", "text/plain");
    let _ = req.write_body(body.as_bytes());
}

fn main() -> weft::Result<()> {
    env_logger::init();

    let router = RouterBuilder::new().get("/", index).get("/echo", echo).build();

    let server = ServerConfig {
        port: 8080,
        ..ServerConfig::default()
    };

    weft::serve(server, FiberConfig::default(), router)
}
