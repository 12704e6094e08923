//! Black-box end-to-end tests: real `TcpStream`s from this test's own
//! thread against a `weft` server running in a background thread.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::thread;
use std::time::Duration;

use pretty_assertions::assert_eq;

use weft::{FiberConfig, Request, Router, RouterBuilder, ServerConfig};

fn spawn_server(port: u16, router: Router) {
    thread::spawn(move || {
        let server = ServerConfig {
            port,
            ..ServerConfig::default()
        };
        weft::serve(server, FiberConfig::default(), router).expect("server exited");
    });
    // Give the listener fiber time to bind and start polling before the
    // first client connects.
    thread::sleep(Duration::from_millis(100));
}

fn read_to_string(stream: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).unwrap();
    String::from_utf8_lossy(&buf).into_owned()
}

#[test]
fn accept_before_data_returns_the_handlers_response() {
    fn hello(req: &mut Request<'_>) {
        let _ = req.write_body(b"Hello world\n");
    }
    let router = RouterBuilder::new().get("/", hello).build();
    spawn_server(18180, router);

    let mut stream = TcpStream::connect("127.0.0.1:18180").unwrap();
    // Connect, then wait before sending anything: the listener's handler
    // fiber must not be spawned until a byte actually arrives.
    thread::sleep(Duration::from_millis(50));
    stream.write_all(b"GET / HTTP/1.0\r\n\r\n").unwrap();

    let response = read_to_string(&mut stream);
    assert!(response.starts_with("HTTP/1.0 200 OK\r\n"), "{response}");
    assert!(response.contains("Content-Length: 12\r\n"), "{response}");
    assert!(response.ends_with("Hello world\n"), "{response}");
}

#[test]
fn unregistered_path_gets_the_default_404() {
    let router = RouterBuilder::new().get("/", |_req: &mut Request<'_>| {}).build();
    spawn_server(18181, router);

    let mut stream = TcpStream::connect("127.0.0.1:18181").unwrap();
    stream.write_all(b"GET /missing HTTP/1.0\r\n\r\n").unwrap();

    let response = read_to_string(&mut stream);
    assert!(response.starts_with("HTTP/1.0 404 Not Found\r\n"), "{response}");
    assert!(response.ends_with("not found"), "{response}");
}

#[test]
fn header_names_are_case_insensitive_and_content_length_bounds_the_body() {
    fn echo_body(req: &mut Request<'_>) {
        let len = req.content_length().unwrap_or(0);
        let mut body = vec![0u8; len];
        let mut read = 0;
        while read < len {
            let n = req.read_body(&mut body[read..]).unwrap();
            if n == 0 {
                break;
            }
            read += n;
        }
        let _ = req.write_body(&body[..read]);
    }
    let router = RouterBuilder::new().get("/echo-body", echo_body).build();
    spawn_server(18182, router);

    let mut stream = TcpStream::connect("127.0.0.1:18182").unwrap();
    stream
        .write_all(b"GET /echo-body HTTP/1.0\r\ncontent-LENGTH: 5\r\n\r\n12345")
        .unwrap();

    let response = read_to_string(&mut stream);
    assert!(response.contains("Content-Length: 5\r\n"), "{response}");
    assert!(response.ends_with("12345"), "{response}");
}

#[test]
fn echo_endpoint_reflects_a_fixed_corpus_of_paths() {
    fn echo(req: &mut Request<'_>) {
        let body = req.path().as_bytes().to_vec();
        let _ = req.write_body(&body);
    }
    let router = RouterBuilder::new()
        .get("/a", echo)
        .get("/a/b/c", echo)
        .get("/weird-._~!", echo)
        .get("/100", echo)
        .build();
    spawn_server(18183, router);

    for path in ["/a", "/a/b/c", "/weird-._~!", "/100"] {
        let mut stream = TcpStream::connect("127.0.0.1:18183").unwrap();
        let request = format!("GET {path} HTTP/1.0\r\n\r\n");
        stream.write_all(request.as_bytes()).unwrap();
        let response = read_to_string(&mut stream);
        assert!(response.ends_with(path), "echo mismatch for {path}: {response}");
    }
}

#[test]
fn large_body_is_delivered_in_full_under_backpressure() {
    const SIZE: usize = 512 * 1024;
    fn big_body(req: &mut Request<'_>) {
        let body = vec![b'x'; SIZE];
        let _ = req.write_body(&body);
    }
    let router = RouterBuilder::new().get("/big", big_body).build();
    spawn_server(18184, router);

    let mut stream = TcpStream::connect("127.0.0.1:18184").unwrap();
    stream.write_all(b"GET /big HTTP/1.0\r\n\r\n").unwrap();

    // Read slowly, in small chunks, to force the writer fiber to actually
    // suspend on EAGAIN rather than completing the write in one shot.
    let mut total = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = stream.read(&mut chunk).unwrap();
        if n == 0 {
            break;
        }
        total.extend_from_slice(&chunk[..n]);
        thread::sleep(Duration::from_micros(200));
    }

    let header_end = total.windows(4).position(|w| w == b"\r\n\r\n").unwrap() + 4;
    assert_eq!(total.len() - header_end, SIZE);
    assert!(total[header_end..].iter().all(|&b| b == b'x'));
}
