//! Spawning, running and stopping the simulated users.

use std::{path::PathBuf, pin::pin, sync::Arc, time::Duration};

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::{
    config::{Config, HttpHost},
    prelude::*,
    scenario::{Dispatcher, OrderPayload},
    session::RequestContext,
    stats::{Stats, Summary},
    util::{self, HttpClient},
};

mod report;
mod user;


#[derive(Debug, confique::Config)]
pub struct TargetConfig {
    /// Scheme and host (with optional port) of the API under test, e.g.
    /// "https://api.example.com". The action paths are appended to this.
    #[config(default = "http://localhost")]
    pub host: HttpHost,

    /// How long a single API request may take before it counts as failed.
    /// "0" waits forever.
    #[config(default = "0", deserialize_with = crate::config::deserialize_duration)]
    pub request_timeout: Duration,
}

#[derive(Debug, confique::Config)]
#[config(validate = Self::validate)]
pub struct LoadConfig {
    /// Number of simulated users.
    #[config(default = 1)]
    pub users: u32,

    /// How many users are started per second until `users` are running.
    #[config(default = 1.0)]
    pub spawn_rate: f64,

    /// Stops the test after this duration, counted from the start. "0" runs
    /// until Ctrl+C is pressed.
    #[config(default = "0", deserialize_with = crate::config::deserialize_duration)]
    pub run_time: Duration,

    /// Interval of the progress lines logged while running. "0" disables them.
    #[config(default = "5s", deserialize_with = crate::config::deserialize_duration)]
    pub report_interval: Duration,

    /// How long to wait for users to finish their current action when
    /// stopping. Users still busy afterwards are aborted.
    #[config(default = "10s", deserialize_with = crate::config::deserialize_duration)]
    pub shutdown_timeout: Duration,

    /// If set, the final statistics are also written to this file as JSON.
    pub summary_file: Option<PathBuf>,
}

impl LoadConfig {
    fn validate(&self) -> Result<(), String> {
        spawn_interval(self.spawn_rate).map(|_| ())
    }
}

/// Pause between starting two users at `spawn_rate` users per second. Fails
/// unless the rate is positive and the pause fits into a `Duration`.
pub fn spawn_interval(spawn_rate: f64) -> Result<Duration, String> {
    if !spawn_rate.is_finite() || spawn_rate <= 0.0 {
        return Err(format!("`spawn_rate` must be a positive number, but is {spawn_rate}"));
    }
    Duration::try_from_secs_f64(1.0 / spawn_rate)
        .map_err(|_| format!("`spawn_rate` {spawn_rate} is too small"))
}

/// Everything the simulated users share. Read-only.
pub(crate) struct Shared {
    pub(crate) client: HttpClient,
    pub(crate) config: Config,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) order: OrderPayload,
    pub(crate) base_context: RequestContext,
    pub(crate) stats: Stats,
}

impl Shared {
    pub(crate) fn new(config: Config) -> Self {
        Self {
            client: util::http_client(),
            dispatcher: Dispatcher::new(&config.scenario),
            order: OrderPayload::new(&config.scenario.order),
            base_context: RequestContext::new(config.target.host.clone()),
            stats: Stats::new(),
            config,
        }
    }
}

/// Runs the load test until `load.run_time` elapsed or Ctrl+C is pressed,
/// then returns the final statistics.
pub async fn run(config: Config) -> Result<Summary> {
    run_until(config, shutdown_signal()).await
}

/// Like [`run`], but additionally stops once `stop` resolves.
pub(crate) async fn run_until(config: Config, stop: impl Future<Output = ()>) -> Result<Summary> {
    let load = &config.load;
    info!(
        users = load.users,
        spawn_rate = load.spawn_rate,
        run_time = ?load.run_time,
        host = %config.target.host,
        "Starting load test",
    );

    let interval = spawn_interval(load.spawn_rate).map_err(|e| anyhow!(e))?;
    let shared = Arc::new(Shared::new(config));
    let cancel = CancellationToken::new();
    let mut users = JoinSet::new();

    let reporter = tokio::spawn(report::periodic(
        Arc::clone(&shared),
        shared.config.load.report_interval,
        cancel.clone(),
    ));

    let run_time = shared.config.load.run_time;
    let mut stop = pin!(async move {
        tokio::select! {
            _ = stop => info!("Stop signal received"),
            _ = sleep_or_forever(run_time) => info!("Run time of {run_time:?} elapsed"),
        }
    });

    // Ramp up: start users one by one, stopping early if requested.
    let mut stopped = false;
    for id in 0..shared.config.load.users {
        users.spawn(user::run(id, Arc::clone(&shared), cancel.child_token()));
        trace!(user = id, "spawned user");
        if id + 1 == shared.config.load.users {
            info!("All {} users spawned", shared.config.load.users);
            break;
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = &mut stop => {
                stopped = true;
                break;
            }
        }
    }

    if !stopped {
        stop.await;
    }

    info!("Stopping {} users", users.len());
    cancel.cancel();
    let shutdown_timeout = shared.config.load.shutdown_timeout;
    let drained = tokio::time::timeout(shutdown_timeout, async {
        while let Some(res) = users.join_next().await {
            if let Err(e) = res {
                warn!("user task failed: {e}");
            }
        }
    }).await;
    if drained.is_err() {
        warn!("{} users did not stop within {shutdown_timeout:?}, aborting them", users.len());
        users.shutdown().await;
    }
    if let Err(e) = reporter.await {
        warn!("reporter task failed: {e}");
    }

    let summary = shared.stats.summary();
    if let Some(path) = &shared.config.load.summary_file {
        let json = serde_json::to_vec_pretty(&summary).context("failed to serialize summary")?;
        tokio::fs::write(path, json).await
            .with_context(|| format!("failed to write summary to '{}'", path.display()))?;
        info!("Wrote summary to '{}'", path.display());
    }

    Ok(summary)
}

async fn sleep_or_forever(duration: Duration) {
    if duration.is_zero() {
        std::future::pending::<()>().await;
    } else {
        tokio::time::sleep(duration).await;
    }
}

/// Future that resolves when a shutdown signal is received by our app.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        // Without a signal handler, the run can still end via `run_time`.
        error!("failed to install CTRL+C signal handler: {e}");
        std::future::pending::<()>().await;
    }
}


#[cfg(test)]
mod tests {
    use confique::Config as _;
    use hyper::header;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{method, path},
    };

    use super::*;
    use crate::{config::HttpUrl, scenario::Action};

    const TOKEN_PATH: &str = "/auth/realms/paye-ton-kawa/protocol/openid-connect/token";

    async fn api_server(token_status: u16) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .respond_with(ResponseTemplate::new(token_status)
                .set_body_json(serde_json::json!({ "access_token": "abc123" })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/product/products"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/customer/customers"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/order/orders"))
            .respond_with(ResponseTemplate::new(201))
            .mount(&server)
            .await;
        server
    }

    fn config(server: &MockServer) -> Config {
        let mut config = Config::builder().load().unwrap();
        config.auth.token_url = HttpUrl::try_from(format!("{}{TOKEN_PATH}", server.uri())).unwrap();
        config.target.host = server.uri().parse().unwrap();
        config.scenario.wait_min = Duration::from_millis(5);
        config.scenario.wait_max = Duration::from_millis(20);
        config.load.users = 3;
        config.load.spawn_rate = 100.0;
        config.load.run_time = Duration::from_millis(500);
        config.load.report_interval = Duration::ZERO;
        config
    }

    fn api_requests(requests: &[wiremock::Request]) -> impl Iterator<Item = &wiremock::Request> {
        requests.iter().filter(|r| r.url.path() != TOKEN_PATH)
    }

    #[tokio::test]
    async fn users_authenticate_once_then_run_actions() {
        let server = api_server(200).await;
        let summary = run_until(config(&server), std::future::pending()).await.unwrap();

        assert_eq!(summary.users_authenticated, 3);
        assert_eq!(summary.users_unauthenticated, 0);
        assert!(summary.total.requests > 3, "{summary:#?}");
        assert_eq!(summary.total.errors, 0);

        // Customers always fail, products never do.
        if let Some(customers) = summary.action(Action::GetCustomers) {
            assert_eq!(customers.failures, customers.requests);
        }
        if let Some(products) = summary.action(Action::GetProducts) {
            assert_eq!(products.failures, 0);
        }

        let requests = server.received_requests().await.unwrap();
        let token_requests = requests.iter().filter(|r| r.url.path() == TOKEN_PATH).count();
        assert_eq!(token_requests, 3);
        assert!(api_requests(&requests).all(|r| r.headers[header::AUTHORIZATION] == "Bearer abc123"));
    }

    #[tokio::test]
    async fn failed_authentication_continues_without_header() {
        let server = api_server(503).await;
        let summary = run_until(config(&server), std::future::pending()).await.unwrap();

        assert_eq!(summary.users_authenticated, 0);
        assert_eq!(summary.users_unauthenticated, 3);
        assert!(summary.total.requests > 0);

        let requests = server.received_requests().await.unwrap();
        assert!(api_requests(&requests).all(|r| !r.headers.contains_key(header::AUTHORIZATION)));
    }

    #[tokio::test]
    async fn require_token_stops_users() {
        let server = api_server(503).await;
        let mut config = config(&server);
        config.auth.require_token = true;
        let summary = run_until(config, std::future::pending()).await.unwrap();

        assert_eq!(summary.users_stopped_without_token, 3);
        assert_eq!(summary.total.requests, 0);

        let requests = server.received_requests().await.unwrap();
        assert_eq!(api_requests(&requests).count(), 0);
    }

    #[tokio::test]
    async fn stop_signal_ends_ramp_up_early() {
        let server = api_server(200).await;
        let mut config = config(&server);
        config.load.users = 1000;
        config.load.spawn_rate = 10.0;
        config.load.run_time = Duration::ZERO;

        let stop = tokio::time::sleep(Duration::from_millis(250));
        let summary = run_until(config, stop).await.unwrap();

        let started = summary.users_authenticated + summary.users_unauthenticated;
        assert!(started >= 1 && started < 10, "{started} users started");
    }

    #[test]
    fn spawn_rate_must_give_representable_interval() {
        assert_eq!(spawn_interval(2.0), Ok(Duration::from_millis(500)));
        assert!(spawn_interval(0.0).is_err());
        assert!(spawn_interval(-1.0).is_err());
        assert!(spawn_interval(f64::NAN).is_err());
        assert!(spawn_interval(1e-30).is_err());

        let mut load = Config::builder().load().unwrap().load;
        load.spawn_rate = 1e-30;
        assert!(load.validate().is_err());
    }

    #[tokio::test]
    async fn tiny_spawn_rate_is_an_error() {
        let server = api_server(200).await;
        let mut config = config(&server);
        config.load.spawn_rate = 1e-30;

        assert!(run_until(config, std::future::pending()).await.is_err());
        let requests = server.received_requests().await.unwrap();
        assert!(requests.is_empty());
    }

    #[tokio::test]
    async fn writes_summary_file() {
        let server = api_server(200).await;
        let mut config = config(&server);
        let path = std::env::temp_dir()
            .join(format!("kawa-loadtest-summary-{}.json", std::process::id()));
        config.load.summary_file = Some(path.clone());

        run_until(config, std::future::pending()).await.unwrap();

        let json: serde_json::Value = serde_json::from_slice(&std::fs::read(&path).unwrap())
            .unwrap();
        let _ = std::fs::remove_file(&path);
        assert_eq!(json["users_authenticated"], 3);
        assert!(json["actions"].is_array());
    }
}
