use std::time::Duration;
use std::time::Instant;

use flume::SendError;
use flume::Sender;
use reqwest::Client;
use reqwest::Method;
use reqwest::Response;
use reqwest::StatusCode;
use reqwest::header::CONTENT_TYPE;
use reqwest::header::HeaderMap;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::interpreter::Interpret;
use crate::interpreter::Outcome;
use crate::validator::ValidatedPlan;
use crate::validator::ValidatedProbe;

#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("output channel closed")]
    ChannelError(#[from] SendError<ProbeEvent>),
}

#[derive(Debug)]
pub enum ProbeEvent {
    Started {
        index: usize,
        name: String,
        method: Method,
        url: Url,
    },
    Finished(ProbeReport),
}

#[derive(Debug)]
pub struct ProbeReport {
    pub index: usize,
    pub name: String,
    pub elapsed: Duration,
    pub outcome: Outcome,
}

#[derive(Debug)]
pub struct CapturedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body_text: String,
}

impl CapturedResponse {
    /// Reads the body once. A body that can't be read is a transport failure.
    pub async fn from_response(resp: Response) -> Result<Self, reqwest::Error> {
        let status = resp.status();
        let headers = resp.headers().clone();
        let body_text = resp.text().await?;

        Ok(Self {
            status,
            headers,
            body_text,
        })
    }
}

/// Runs every probe of the plan, one at a time, in plan order.
///
/// A probe's outcome is sent before the next probe is dispatched, and no
/// outcome stops the run. The only error is the output side going away.
pub async fn run_probes(plan: ValidatedPlan, tx: Sender<ProbeEvent>) -> Result<(), RunnerError> {
    let client = Client::new();

    debug!(base_url = %plan.base_url, probes = plan.probes.len(), "starting probe run");

    for (index, probe) in plan.probes.into_iter().enumerate() {
        tx.send_async(ProbeEvent::Started {
            index,
            name: probe.name.clone(),
            method: probe.method.clone(),
            url: probe.url.clone(),
        })
        .await?;

        let report = run_probe(&client, index, probe).await;

        tx.send_async(ProbeEvent::Finished(report)).await?;
    }

    debug!("probe run complete");
    Ok(())
}

async fn run_probe(client: &Client, index: usize, probe: ValidatedProbe) -> ProbeReport {
    let started = Instant::now();

    let request = client
        .request(probe.method.clone(), probe.url.clone())
        .headers(probe.headers);

    let request = match &probe.body {
        Some(body) => request.json(body),
        None => request,
    };

    debug!(probe = %probe.name, method = %probe.method, url = %probe.url, "dispatching probe");

    let captured = match request.send().await {
        Ok(resp) => CapturedResponse::from_response(resp).await,
        Err(err) => Err(err),
    };

    let outcome = match captured {
        Ok(response) => {
            debug!(
                probe = %probe.name,
                status = %response.status,
                content_type = ?response.headers.get(CONTENT_TYPE),
                "response received"
            );
            response.interpret(&probe.interpretation)
        }
        Err(err) => {
            debug!(probe = %probe.name, error = %err, "transport failure");
            Outcome::TransportError {
                error: transport_message(&err),
            }
        }
    };

    ProbeReport {
        index,
        name: probe.name,
        elapsed: started.elapsed(),
        outcome,
    }
}

/// reqwest's top-level message hides the cause ("error sending request"), so
/// walk the source chain.
fn transport_message(err: &reqwest::Error) -> String {
    let mut message = err.to_string();
    let mut source = std::error::Error::source(err);

    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }

    message
}

#[cfg(test)]
mod test {
    use axum::Json;
    use axum::Router;
    use axum::http::StatusCode;
    use axum::routing::get;
    use serde_json::Value;
    use serde_json::json;

    use crate::interpreter::Outcome;
    use crate::interpreter::Provenance;
    use crate::interpreter::Verdict;
    use crate::parser::DEFAULT_PLAN;
    use crate::parser::DEFAULT_PLAN_NAME;
    use crate::parser::ProbePlan;
    use crate::runner::ProbeEvent;
    use crate::runner::ProbeReport;
    use crate::runner::run_probes;
    use crate::validator::ValidatedPlan;
    use crate::validator::Validator;

    fn default_plan(base_url: &str) -> ValidatedPlan {
        let plan: ProbePlan = toml::from_str(DEFAULT_PLAN).unwrap();
        Validator::new(&plan, DEFAULT_PLAN, DEFAULT_PLAN_NAME)
            .with_base_url(Some(base_url.to_string()))
            .validate()
            .unwrap()
    }

    /// Serves `app` on an ephemeral port and returns its base URL.
    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    /// Runs the plan to completion and returns every event in arrival order.
    async fn run(plan: ValidatedPlan) -> Vec<ProbeEvent> {
        let (tx, rx) = flume::unbounded();
        run_probes(plan, tx).await.unwrap();
        rx.drain().collect()
    }

    fn reports(events: &[ProbeEvent]) -> Vec<&ProbeReport> {
        events
            .iter()
            .filter_map(|e| match e {
                ProbeEvent::Finished(report) => Some(report),
                ProbeEvent::Started { .. } => None,
            })
            .collect()
    }

    fn healthy_backend() -> Router {
        Router::new()
            .route("/api/health/", get(|| async { Json(json!({"status": "ok"})) }))
            .route(
                "/api/",
                get(|| async { Json(json!({"message": "Welcome to the backend API"})) }),
            )
            .route(
                "/api/evaluate/1/",
                get(|| async { Json(json!({"result": {"period": 12.5}})) }).post(
                    |Json(body): Json<Value>| async move {
                        assert_eq!(body["analysis_type"], "periodicity");
                        Json(json!({"result": {}, "metadata": {"status": "mock_data"}}))
                    },
                ),
            )
            .route(
                "/api/files/",
                get(|| async {
                    (
                        StatusCode::UNAUTHORIZED,
                        Json(json!({"detail": "Given token not valid"})),
                    )
                }),
            )
            .route(
                "/api/current-user/",
                get(|| async { (StatusCode::UNAUTHORIZED, Json(json!({"detail": "nope"}))) }),
            )
    }

    #[tokio::test]
    async fn every_probe_reports_in_order() {
        let base_url = serve(healthy_backend()).await;
        let events = run(default_plan(&base_url)).await;

        // Each probe announces itself and then reports, before the next starts.
        assert_eq!(events.len(), 12);
        for (i, pair) in events.chunks(2).enumerate() {
            let ProbeEvent::Started { index, .. } = &pair[0] else {
                panic!("expected start event at {i}");
            };
            let ProbeEvent::Finished(report) = &pair[1] else {
                panic!("expected finished event at {i}");
            };
            assert_eq!(*index, i);
            assert_eq!(report.index, i);
        }

        let reports = reports(&events);
        let names: Vec<&str> = reports.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(
            names,
            [
                "Health Check",
                "Home Endpoint",
                "Evaluation Test",
                "Database Check",
                "Evaluation POST",
                "Current User",
            ]
        );
    }

    #[tokio::test]
    async fn classifies_backend_responses() {
        let base_url = serve(healthy_backend()).await;
        let events = run(default_plan(&base_url)).await;
        let reports = reports(&events);

        let Outcome::Success { body, .. } = &reports[0].outcome else {
            panic!("health: {:?}", reports[0].outcome);
        };
        assert_eq!(body, &json!({"status": "ok"}));

        let Outcome::Reclassified { verdict, note, .. } = &reports[3].outcome else {
            panic!("files: {:?}", reports[3].outcome);
        };
        assert_eq!(*verdict, Verdict::Pass);
        assert!(note.contains("database reachable"));

        let Outcome::Success { provenance, .. } = &reports[4].outcome else {
            panic!("evaluation post: {:?}", reports[4].outcome);
        };
        assert_eq!(*provenance, Some(Provenance::Mock));
    }

    #[tokio::test]
    async fn failures_do_not_stop_the_run() {
        let app = Router::new()
            .route("/api/health/", get(|| async { "definitely not json" }))
            .route(
                "/api/files/",
                get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
            );
        let base_url = serve(app).await;

        let events = run(default_plan(&base_url)).await;
        let reports = reports(&events);
        assert_eq!(reports.len(), 6);

        assert!(matches!(reports[0].outcome, Outcome::DecodeError { .. }));
        // No route: axum answers 404 with an empty body.
        assert!(matches!(
            reports[1].outcome,
            Outcome::UnexpectedStatus { .. }
        ));

        let Outcome::Reclassified { verdict, .. } = &reports[3].outcome else {
            panic!("files: {:?}", reports[3].outcome);
        };
        assert_eq!(*verdict, Verdict::Fail);
    }

    #[tokio::test]
    async fn transport_failures_do_not_stop_the_run() {
        // Bind then drop, so nothing is listening on the port.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let events = run(default_plan(&format!("http://{addr}"))).await;
        let reports = reports(&events);

        assert_eq!(reports.len(), 6);
        for report in reports {
            let Outcome::TransportError { error } = &report.outcome else {
                panic!("{}: {:?}", report.name, report.outcome);
            };
            assert!(!error.is_empty());
            assert_eq!(report.outcome.verdict(), Verdict::Fail);
        }
    }
}
