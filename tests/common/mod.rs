use serde_json::Value;
use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;
use toolbridge::configuration::Settings;
use toolbridge::mcp::tools::builtin_registry;
use toolbridge::telemetry::{get_subscriber, init_subscriber};

// Logs are discarded unless TEST_LOG is set.
lazy_static::lazy_static! {
    static ref TRACING: () = {
        let name = "test".to_string();
        let filter = "debug".to_string();
        if std::env::var("TEST_LOG").is_ok() {
            init_subscriber(get_subscriber(name, filter, std::io::stdout));
        } else {
            init_subscriber(get_subscriber(name, filter, std::io::sink));
        }
    };
}

pub struct TestApp {
    pub address: String,
    pub client: reqwest::Client,
}

pub async fn spawn_app_with_configuration(configuration: Settings) -> TestApp {
    lazy_static::initialize(&TRACING);

    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind random port");
    let port = listener.local_addr().unwrap().port();
    let address = format!("http://127.0.0.1:{}", port);

    let registry = builtin_registry(&configuration.fetch).expect("Failed to build tool registry");
    let server = toolbridge::startup::run(listener, configuration, Arc::new(registry))
        .expect("Failed to bind address.");
    let _ = tokio::spawn(server);

    TestApp {
        address,
        client: reqwest::Client::new(),
    }
}

pub async fn spawn_app() -> TestApp {
    spawn_app_with_configuration(Settings::default()).await
}

#[derive(Debug)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
}

impl SseEvent {
    pub fn json(&self) -> Value {
        serde_json::from_str(&self.data).expect("event data is not JSON")
    }
}

/// Reads `event:`/`data:` frames off a live `/sse` response, skipping comments.
pub struct EventStream {
    response: reqwest::Response,
    buffer: String,
}

impl EventStream {
    pub async fn next_event(&mut self) -> Option<SseEvent> {
        loop {
            while let Some(end) = self.buffer.find("\n\n") {
                let frame: String = self.buffer.drain(..end + 2).collect();
                if let Some(event) = parse_frame(&frame) {
                    return Some(event);
                }
            }

            let chunk = tokio::time::timeout(Duration::from_secs(5), self.response.chunk())
                .await
                .expect("Timed out waiting for an event")
                .expect("Failed to read event stream")?;
            self.buffer.push_str(std::str::from_utf8(&chunk).unwrap());
        }
    }
}

fn parse_frame(frame: &str) -> Option<SseEvent> {
    let mut event = None;
    let mut data = Vec::new();
    for line in frame.lines() {
        if let Some(name) = line.strip_prefix("event: ") {
            event = Some(name.to_string());
        } else if let Some(chunk) = line.strip_prefix("data: ") {
            data.push(chunk);
        }
    }

    event.map(|event| SseEvent {
        event,
        data: data.join("\n"),
    })
}

/// An open session: the event stream plus the url its messages are posted to.
pub struct TestSession {
    pub events: EventStream,
    pub messages_url: String,
}

impl TestApp {
    pub async fn connect(&self) -> TestSession {
        let response = self
            .client
            .get(format!("{}/sse", self.address))
            .send()
            .await
            .expect("Failed to open event stream");
        assert!(response.status().is_success());
        assert_eq!(
            response.headers()["content-type"].to_str().unwrap(),
            "text/event-stream"
        );

        let mut events = EventStream {
            response,
            buffer: String::new(),
        };
        let endpoint = events.next_event().await.expect("No endpoint event");
        assert_eq!(endpoint.event, "endpoint");

        TestSession {
            events,
            messages_url: format!("{}{}", self.address, endpoint.data),
        }
    }

    pub async fn post(&self, url: &str, body: Value) -> reqwest::Response {
        self.client
            .post(url)
            .header("content-type", "application/json")
            .body(body.to_string())
            .send()
            .await
            .expect("Failed to execute request.")
    }
}
