//! End-to-end sessions between a `Client` and a `Host` over in-memory and TCP
//! channels.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use mcp::{
    Arguments, Client, Error, HandlerError, Host, Implementation, ParamSpec, ParamType,
    SessionState, Target, ToolContent, ToolDescriptor, ToolRegistry,
};
use serde_json::json;
use tokio::task::JoinHandle;

fn weather_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry
        .register(
            ToolDescriptor::new("get_daily_forecast", "Daily forecast for a location")
                .param(
                    "location",
                    ParamSpec::required(ParamType::String).or(ParamType::Integer),
                )
                .param("days", ParamSpec::optional(ParamType::Integer).with_default(3)),
            |args: Arguments| async move {
                let location = match &args["location"] {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                let days = args["days"].as_i64().unwrap_or(3);
                Ok::<_, HandlerError>(vec![ToolContent::text(format!(
                    "{location}: sunny for the next {days} days"
                ))])
            },
        )
        .unwrap();
    registry
        .register(
            ToolDescriptor::new("get_weather_warning", "Active warnings for a location")
                .param("location", ParamSpec::required(ParamType::String)),
            |_args: Arguments| async { Ok::<_, HandlerError>(vec![ToolContent::text("no warnings")]) },
        )
        .unwrap();
    registry
        .register(
            ToolDescriptor::new("slow", "Never finishes in time"),
            |_args: Arguments| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok::<_, HandlerError>(vec![ToolContent::text("too late")])
            },
        )
        .unwrap();
    registry
        .register(
            ToolDescriptor::new("broken", "Always fails"),
            |_args: Arguments| async {
                Err::<Vec<ToolContent>, _>(HandlerError::new("data source offline"))
            },
        )
        .unwrap();
    registry
}

fn host() -> Arc<Host> {
    Arc::new(Host::new(
        Arc::new(weather_registry()),
        Implementation::new("weather-test", "0.0.1"),
    ))
}

/// Start a host session on one end of a duplex pipe and return a client on the other.
fn open_session() -> (Client, JoinHandle<mcp::Result<()>>) {
    let (client_side, host_side) = tokio::io::duplex(64 * 1024);
    let host = host();
    let task = tokio::spawn(async move {
        let (reader, writer) = tokio::io::split(host_side);
        host.serve(reader, writer).await
    });
    let (reader, writer) = tokio::io::split(client_side);
    (Client::from_streams("weather", reader, writer), task)
}

async fn ready_session() -> (Client, JoinHandle<mcp::Result<()>>) {
    let (mut client, task) = open_session();
    client.initialize().await.unwrap();
    (client, task)
}

#[tokio::test]
async fn handshake_reports_server_identity() {
    let (mut client, _task) = open_session();
    assert_eq!(client.state(), SessionState::Handshaking);

    let info = client.initialize().await.unwrap();
    assert_eq!(info.server_info.name, "weather-test");
    assert!(info.capabilities.tools.is_some());
    assert_eq!(client.state(), SessionState::Ready);
}

#[tokio::test]
async fn forecast_scenario() {
    let (mut client, task) = ready_session().await;

    let names: Vec<String> = client
        .list_tools()
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.name)
        .collect();
    assert_eq!(
        &names[..2],
        &["get_daily_forecast".to_string(), "get_weather_warning".to_string()]
    );

    let result = client
        .call_tool("get_daily_forecast", Some(json!({ "location": "Hangzhou" })))
        .await
        .unwrap();
    assert!(result.text().contains("Hangzhou"));
    assert!(result.text().contains("3 days"));

    let err = client
        .call_tool("get_daily_forecast", Some(json!({})))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidArguments { ref parameter, .. } if parameter == "location"));
    assert_eq!(client.state(), SessionState::Ready);

    let err = client
        .call_tool("get_rain_radar", Some(json!({ "location": "Hangzhou" })))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnknownTool(ref name) if name == "get_rain_radar"));
    assert_eq!(client.state(), SessionState::Ready);

    // Still usable after both failures.
    client.ping().await.unwrap();
    client.close().await.unwrap();
    assert!(task.await.unwrap().is_ok());
}

#[tokio::test]
async fn integer_location_is_accepted() {
    let (mut client, _task) = ready_session().await;
    let result = client
        .call_tool("get_daily_forecast", Some(json!({ "location": 101210101, "days": 1 })))
        .await
        .unwrap();
    assert!(result.text().starts_with("101210101"));
}

#[tokio::test]
async fn repeated_discovery_is_identical() {
    let (mut client, _task) = ready_session().await;
    let first = client.list_tools().await.unwrap();
    let second = client.list_tools().await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn result_survives_the_channel_unchanged() {
    let registry = weather_registry();
    let expected = registry
        .invoke("get_daily_forecast", Some(json!({ "location": "Hangzhou", "days": 5 })))
        .await
        .unwrap();

    let (mut client, _task) = ready_session().await;
    let received = client
        .call_tool("get_daily_forecast", Some(json!({ "location": "Hangzhou", "days": 5 })))
        .await
        .unwrap();
    assert_eq!(received, expected);
}

#[tokio::test]
async fn handler_failure_keeps_session_ready() {
    let (mut client, _task) = ready_session().await;
    let err = client.call_tool("broken", None).await.unwrap_err();
    assert!(matches!(
        err,
        Error::ToolExecution { ref tool, ref message } if tool == "broken" && message == "data source offline"
    ));
    assert_eq!(client.state(), SessionState::Ready);
    assert!(client.call_tool("get_weather_warning", Some(json!({ "location": "Hangzhou" }))).await.is_ok());
}

#[tokio::test]
async fn closing_the_channel_mid_call_cancels() {
    let (mut client, host_task) = ready_session().await;

    let aborter = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        host_task.abort();
    });

    let err = client.call_tool("slow", None).await.unwrap_err();
    assert!(matches!(err, Error::Cancelled));
    assert_eq!(client.state(), SessionState::Closed);
    aborter.await.unwrap();

    let err = client.list_tools().await.unwrap_err();
    assert!(matches!(err, Error::Closed));
}

#[tokio::test]
async fn host_drops_running_call_when_client_goes_away() {
    struct SetOnDrop(Arc<AtomicBool>);
    impl Drop for SetOnDrop {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    let finished = Arc::new(AtomicBool::new(false));
    let dropped = Arc::new(AtomicBool::new(false));
    let mut registry = ToolRegistry::new();
    {
        let finished = Arc::clone(&finished);
        let dropped = Arc::clone(&dropped);
        registry
            .register(ToolDescriptor::new("slow", "Takes two seconds"), move |_args: Arguments| {
                let finished = Arc::clone(&finished);
                let guard = SetOnDrop(Arc::clone(&dropped));
                async move {
                    let _guard = guard;
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    finished.store(true, Ordering::SeqCst);
                    Ok::<_, HandlerError>(vec![ToolContent::text("done")])
                }
            })
            .unwrap();
    }
    let host = Host::new(Arc::new(registry), Implementation::new("slow-host", "0.0.1"));

    let (client_side, host_side) = tokio::io::duplex(64 * 1024);
    let task = tokio::spawn(async move {
        let (reader, writer) = tokio::io::split(host_side);
        host.serve(reader, writer).await
    });
    let (reader, writer) = tokio::io::split(client_side);
    let mut client = Client::from_streams("slow", reader, writer);
    client.initialize().await.unwrap();

    let call = tokio::time::timeout(Duration::from_millis(100), client.call_tool("slow", None)).await;
    assert!(call.is_err());
    drop(client);

    let outcome = tokio::time::timeout(Duration::from_millis(500), task)
        .await
        .expect("host should stop as soon as the channel closes")
        .unwrap();
    assert!(outcome.is_ok());

    for _ in 0..50 {
        if dropped.load(Ordering::SeqCst) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(dropped.load(Ordering::SeqCst));
    assert!(!finished.load(Ordering::SeqCst));
}

#[tokio::test]
async fn slow_host_times_out() {
    let (client, _task) = open_session();
    let mut client = client.with_timeout(Duration::from_millis(100));
    client.initialize().await.unwrap();

    let err = client.call_tool("slow", None).await.unwrap_err();
    assert!(matches!(err, Error::Timeout));
    assert_eq!(client.state(), SessionState::Closed);
}

#[tokio::test]
async fn tcp_host_serves_sessions_concurrently() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(host().serve_tcp(listener));

    let target = Target::Tcp {
        name: "weather".into(),
        addr,
    };
    let (a, b) = tokio::join!(
        async {
            let mut client = Client::connect(&target).await.unwrap();
            client
                .call_tool("get_daily_forecast", Some(json!({ "location": "Hangzhou" })))
                .await
                .unwrap()
        },
        async {
            let mut client = Client::connect(&target).await.unwrap();
            client
                .call_tool("get_daily_forecast", Some(json!({ "location": "Lisbon" })))
                .await
                .unwrap()
        }
    );
    assert!(a.text().contains("Hangzhou"));
    assert!(b.text().contains("Lisbon"));
}

#[tokio::test]
async fn connect_to_nothing_is_connection_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);

    let err = Client::connect(&Target::Tcp {
        name: "weather".into(),
        addr,
    })
    .await
    .unwrap_err();
    assert!(matches!(err, Error::Connection(_)));
}
