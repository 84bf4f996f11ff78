use std::{fmt, time::{Duration, Instant}};

use bytes::Bytes;
use http_body_util::BodyExt as _;
use hyper::{Method, StatusCode};
use serde::Serialize;

use super::OrderConfig;
use crate::{prelude::*, session::RequestContext, util::{self, HttpClient}};


/// The three things a simulated user does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    GetProducts,
    GetCustomers,
    CreateOrder,
}

impl Action {
    pub const ALL: [Action; 3] = [Action::GetProducts, Action::GetCustomers, Action::CreateOrder];

    pub fn name(self) -> &'static str {
        match self {
            Action::GetProducts => "get_products",
            Action::GetCustomers => "get_customers",
            Action::CreateOrder => "create_order",
        }
    }

    pub fn method(self) -> Method {
        match self {
            Action::GetProducts | Action::GetCustomers => Method::GET,
            Action::CreateOrder => Method::POST,
        }
    }

    pub fn path(self) -> &'static str {
        match self {
            Action::GetProducts => "/api/product/products",
            Action::GetCustomers => "/api/customer/customers",
            Action::CreateOrder => "/api/order/orders",
        }
    }

    pub fn expected_status(self) -> StatusCode {
        match self {
            Action::GetProducts | Action::GetCustomers => StatusCode::OK,
            Action::CreateOrder => StatusCode::CREATED,
        }
    }

    /// Success if and only if `status` is exactly the expected one.
    pub fn classify(self, status: StatusCode) -> Outcome {
        let expected = self.expected_status();
        if status == expected {
            Outcome::Success
        } else {
            Outcome::Failure(format!("unexpected status {status} (expected {expected})"))
        }
    }

    /// Sends this action's request and classifies the response. Never fails:
    /// transport errors and timeouts are reported as [`Outcome::Failure`].
    pub async fn perform(
        self,
        client: &HttpClient,
        ctx: &RequestContext,
        order: &OrderPayload,
        timeout: Duration,
    ) -> ActionReport {
        let body = match self {
            Action::CreateOrder => {
                debug!(payload = %order, "{} {}", self.method(), self.path());
                Some(order.json.clone())
            }
            _ => {
                debug!("{} {}", self.method(), self.path());
                None
            }
        };
        let req = ctx.request(self.method(), self.path(), body);

        let start = Instant::now();
        let response = util::with_timeout(timeout, async {
            let response = client.request(req).await?;
            let (parts, body) = response.into_parts();
            let body = body.collect().await?.to_bytes();
            Ok::<_, Error>((parts.status, body))
        }).await;
        let elapsed = start.elapsed();

        let (status, outcome) = match response {
            None => {
                error!("{} {} timed out after {timeout:?}", self.method(), self.path());
                (None, Outcome::Failure("request timed out".into()))
            }
            Some(Err(e)) => {
                error!("{} {} failed: {e:#}", self.method(), self.path());
                (None, Outcome::Failure(format!("request failed: {e}")))
            }
            Some(Ok((status, body))) => {
                let outcome = self.classify(status);
                match &outcome {
                    Outcome::Success => info!(
                        ?elapsed,
                        "{} {} OK",
                        self.method(),
                        self.path(),
                    ),
                    Outcome::Failure(reason) => error!(
                        %status,
                        body = util::truncate(&String::from_utf8_lossy(&body), 500),
                        "{} {} failed: {reason}",
                        self.method(),
                        self.path(),
                    ),
                }
                (Some(status), outcome)
            }
        };

        ActionReport { action: self, status, outcome, elapsed }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Success or failure of a single action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure(String),
}

/// Everything the statistics need to know about one performed action.
#[derive(Debug, Clone)]
pub struct ActionReport {
    pub action: Action,
    /// `None` if no response was received.
    pub status: Option<StatusCode>,
    pub outcome: Outcome,
    pub elapsed: Duration,
}

/// The JSON body of `create_order`, serialized once per run.
#[derive(Debug, Clone)]
pub struct OrderPayload {
    json: Bytes,
}

#[derive(Serialize)]
struct OrderRequest {
    customer_id: u64,
    items: [OrderItem; 1],
}

#[derive(Serialize)]
struct OrderItem {
    product_id: u64,
    quantity: u32,
}

impl OrderPayload {
    pub fn new(config: &OrderConfig) -> Self {
        let order = OrderRequest {
            customer_id: config.customer_id,
            items: [OrderItem {
                product_id: config.product_id,
                quantity: config.quantity,
            }],
        };
        let json = serde_json::to_vec(&order).expect("serializing order cannot fail");
        Self { json: json.into() }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.json
    }
}

impl fmt::Display for OrderPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(self.as_bytes()))
    }
}
