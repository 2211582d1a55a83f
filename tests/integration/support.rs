//! Shared fixtures for the integration tests.

// crates.io
use tokio::{
	io::{AsyncReadExt, AsyncWriteExt},
	net::TcpListener,
};
use url::Url;
use wiremock::{Mock, MockServer, ResponseTemplate, matchers::method};

pub const JWKS_PATH: &str = "/.well-known/jwks.json";

pub const JWKS_BODY: &str = r#"{
    "keys": [
        {
            "kty": "RSA",
            "alg": "RS256",
            "use": "sig",
            "kid": "primary",
            "n": "AQIDBAUGBwgJCgsMDQ4PEBESExQVFhcYGRobHB0eHyAhIiMkJSYnKCkqKywtLi8wMTIzNDU2Nzg5Ojs8PT4_QEFCQ0RFRkdISUpLTE1OT1BRUlNUVVZXWFlaW1xdXl9gYWJjZGVmZ2hpamtsbW5vcHFyc3R1dnd4eXp7fH1-f4A",
            "e": "AQAB"
        }
    ]
}"#;

pub const ROTATED_BODY: &str = r#"{
    "keys": [
        {
            "kty": "RSA",
            "alg": "RS256",
            "use": "sig",
            "kid": "primary",
            "n": "AQIDBAUGBwgJCgsMDQ4PEBESExQVFhcYGRobHB0eHyAhIiMkJSYnKCkqKywtLi8wMTIzNDU2Nzg5Ojs8PT4_QEFCQ0RFRkdISUpLTE1OT1BRUlNUVVZXWFlaW1xdXl9gYWJjZGVmZ2hpamtsbW5vcHFyc3R1dnd4eXp7fH1-f4A",
            "e": "AQAB"
        },
        {
            "kty": "EC",
            "alg": "ES256",
            "use": "sig",
            "kid": "rotated",
            "crv": "P-256",
            "x": "BwcHBwcHBwcHBwcHBwcHBwcHBwcHBwcHBwcHBwcHBwc",
            "y": "BwcHBwcHBwcHBwcHBwcHBwcHBwcHBwcHBwcHBwcHBwc"
        }
    ]
}"#;

pub fn json(body: &str) -> ResponseTemplate {
	ResponseTemplate::new(200)
		.set_body_string(body)
		.insert_header("content-type", "application/json")
}

pub fn jwks_url(server: &MockServer) -> Url {
	Url::parse(&format!("{}{JWKS_PATH}", server.uri())).expect("mock server url")
}

/// Respond with `template` for the next `times` requests, ahead of any later mounts.
pub async fn respond_times(server: &MockServer, template: ResponseTemplate, times: u64) {
	Mock::given(method("GET"))
		.respond_with(template)
		.up_to_n_times(times)
		.mount(server)
		.await;
}

pub async fn requests(server: &MockServer) -> usize {
	server.received_requests().await.map(|requests| requests.len()).unwrap_or_default()
}

/// Serve one chunked JWKS response built from `chunks` and return its URL.
///
/// The server stops writing as soon as the client hangs up, so `chunks` may be endless.
pub async fn serve_chunks<I>(chunks: I) -> Url
where
	I: IntoIterator<Item = Vec<u8>>,
	I::IntoIter: Send + 'static,
{
	let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind chunked server");
	let addr = listener.local_addr().expect("chunked server address");
	let chunks = chunks.into_iter();

	tokio::spawn(async move {
		let Ok((mut stream, _)) = listener.accept().await else {
			return;
		};
		let mut request = Vec::new();
		let mut buf = [0; 1024];

		while !request.windows(4).any(|window| window == b"\r\n\r\n") {
			match stream.read(&mut buf).await {
				Ok(0) | Err(_) => return,
				Ok(n) => request.extend_from_slice(&buf[..n]),
			}
		}

		let head = concat!(
			"HTTP/1.1 200 OK\r\n",
			"content-type: application/json\r\n",
			"transfer-encoding: chunked\r\n\r\n",
		);

		if stream.write_all(head.as_bytes()).await.is_err() {
			return;
		}

		for chunk in chunks {
			let size = format!("{:x}\r\n", chunk.len());
			let frame = [size.as_bytes(), &chunk[..], &b"\r\n"[..]].concat();

			if stream.write_all(&frame).await.is_err() {
				return;
			}
		}

		let _ = stream.write_all(b"0\r\n\r\n").await;
	});

	Url::parse(&format!("http://{addr}{JWKS_PATH}")).expect("chunked server url")
}
