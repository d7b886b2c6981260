//! [`UiDriver`] over the W3C WebDriver wire protocol.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, info_span, Instrument};

use crate::{
    settle_count, ConfirmationOutcome, ConfirmationRequest, DriverError, ElementState,
    StabilizationPolicy, UiDriver,
};

const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4a6b5c5b8b5a";

const SHOW_MESSAGE_SCRIPT: &str =
    "var message = arguments[0]; window.setTimeout(function () { window.alert(message); }, 0);";

const AWAIT_DECISION_SCRIPT: &str = r#"
var confirmSelector = arguments[0];
var discardSelector = arguments[1];
var done = arguments[arguments.length - 1];
var settled = false;
document.addEventListener('click', function (event) {
  if (settled || !(event.target instanceof Element)) { return; }
  if (event.target.closest(confirmSelector)) { settled = true; done(true); }
  else if (event.target.closest(discardSelector)) { settled = true; done(false); }
}, true);
"#;

enum CommandError {
    Remote { code: String, message: String },
    Driver(DriverError),
}

impl From<CommandError> for DriverError {
    fn from(err: CommandError) -> Self {
        match err {
            CommandError::Driver(err) => err,
            CommandError::Remote { code, message } => match code.as_str() {
                "no such element" => DriverError::ElementNotFound(message),
                "timeout" | "script timeout" => DriverError::Timeout {
                    what: message,
                    waited: Duration::ZERO,
                },
                "invalid session id" | "session not created" => DriverError::Unavailable(message),
                _ => DriverError::Protocol(format!("{code}: {message}")),
            },
        }
    }
}

fn classify_transport_error(err: reqwest::Error) -> DriverError {
    if err.is_timeout() {
        DriverError::Timeout {
            what: err.to_string(),
            waited: Duration::ZERO,
        }
    } else if err.is_connect() || err.is_request() {
        DriverError::Unavailable(err.to_string())
    } else {
        DriverError::Protocol(err.to_string())
    }
}

async fn send_command(
    http: &reqwest::Client,
    method: Method,
    url: &str,
    body: Option<Value>,
) -> Result<Value, CommandError> {
    let mut request = http.request(method, url);
    if let Some(body) = body {
        request = request.json(&body);
    }
    let response = request
        .send()
        .await
        .map_err(|e| CommandError::Driver(classify_transport_error(e)))?;
    let status = response.status();
    let payload: Value = response
        .json()
        .await
        .map_err(|e| CommandError::Driver(DriverError::Protocol(format!("decoding response of {url}: {e}"))))?;
    let value = payload.get("value").cloned().unwrap_or(Value::Null);
    if status.is_success() {
        return Ok(value);
    }
    let field = |name: &str| {
        value
            .get(name)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    Err(CommandError::Remote {
        code: field("error"),
        message: field("message"),
    })
}

/// One WebDriver session. Requests carry no client-side timeout because the
/// confirmation script waits on a human.
#[derive(Debug)]
pub struct WebDriverClient {
    http: reqwest::Client,
    session_url: String,
    policy: StabilizationPolicy,
}

impl WebDriverClient {
    pub async fn connect(endpoint: &str, policy: StabilizationPolicy) -> Result<Self, DriverError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| DriverError::Unavailable(format!("building http client: {e}")))?;
        let endpoint = endpoint.trim_end_matches('/');
        let capabilities = json!({
            "capabilities": {
                "alwaysMatch": {
                    "unhandledPromptBehavior": "ignore",
                    "timeouts": { "script": null }
                }
            }
        });
        let value = send_command(&http, Method::POST, &format!("{endpoint}/session"), Some(capabilities))
            .await
            .map_err(DriverError::from)?;
        let session_id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| DriverError::Protocol("new session response without sessionId".into()))?;
        debug!(session_id, endpoint, "webdriver session started");
        Ok(Self {
            http,
            session_url: format!("{endpoint}/session/{session_id}"),
            policy,
        })
    }

    pub async fn quit(self) -> Result<(), DriverError> {
        send_command(&self.http, Method::DELETE, &self.session_url, None)
            .await
            .map(|_| ())
            .map_err(DriverError::from)
    }

    async fn command(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value, CommandError> {
        let url = format!("{}{}", self.session_url, path);
        send_command(&self.http, method, &url, body).await
    }

    async fn call(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value, DriverError> {
        self.command(method, path, body).await.map_err(DriverError::from)
    }

    async fn find(&self, selector: &str) -> Result<String, DriverError> {
        let body = json!({ "using": "css selector", "value": selector });
        let value = self
            .call(Method::POST, "/element", Some(body))
            .await
            .map_err(|err| match err {
                DriverError::ElementNotFound(_) => DriverError::ElementNotFound(selector.to_string()),
                other => other,
            })?;
        element_id(&value)
    }

    async fn find_all(&self, selector: &str) -> Result<Vec<String>, DriverError> {
        let body = json!({ "using": "css selector", "value": selector });
        let value = self.call(Method::POST, "/elements", Some(body)).await?;
        value
            .as_array()
            .ok_or_else(|| DriverError::Protocol("find elements did not return a list".into()))?
            .iter()
            .map(element_id)
            .collect()
    }

    async fn displayed(&self, selector: &str) -> Result<bool, DriverError> {
        let Some(id) = self.find_all(selector).await?.into_iter().next() else {
            return Ok(false);
        };
        let value = self
            .call(Method::GET, &format!("/element/{id}/displayed"), None)
            .await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn alert_open(&self) -> Result<bool, DriverError> {
        match self.command(Method::GET, "/alert/text", None).await {
            Ok(_) => Ok(true),
            Err(CommandError::Remote { code, .. }) if code == "no such alert" => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// Whether any element matching `selector` shows `text`. Other toasts share
    /// the container, so presence alone is not enough.
    async fn notice_contains(&self, selector: &str, text: &str) -> Result<bool, DriverError> {
        for id in self.find_all(selector).await? {
            let value = self.call(Method::GET, &format!("/element/{id}/text"), None).await?;
            if value.as_str().is_some_and(|shown| shown.contains(text)) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn state_reached(&self, selector: &str, state: ElementState) -> Result<bool, DriverError> {
        Ok(match state {
            ElementState::Attached => self.count(selector).await? > 0,
            ElementState::Detached => self.count(selector).await? == 0,
            ElementState::Visible => self.displayed(selector).await?,
            ElementState::Hidden => !self.displayed(selector).await?,
        })
    }
}

fn element_id(value: &Value) -> Result<String, DriverError> {
    value
        .get(ELEMENT_KEY)
        .and_then(Value::as_str)
        .map(ToString::to_string)
        .ok_or_else(|| DriverError::Protocol(format!("not an element reference: {value}")))
}

#[async_trait]
impl UiDriver for WebDriverClient {
    async fn navigate(&self, url: &str) -> Result<(), DriverError> {
        self.call(Method::POST, "/url", Some(json!({ "url": url })))
            .await
            .map(|_| ())
    }

    async fn current_url(&self) -> Result<String, DriverError> {
        let value = self.call(Method::GET, "/url", None).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn fill(&self, selector: &str, text: &str) -> Result<(), DriverError> {
        let id = self.find(selector).await?;
        self.call(Method::POST, &format!("/element/{id}/clear"), Some(json!({})))
            .await?;
        self.call(
            Method::POST,
            &format!("/element/{id}/value"),
            Some(json!({ "text": text })),
        )
        .await
        .map(|_| ())
    }

    async fn click(&self, selector: &str) -> Result<(), DriverError> {
        let id = self.find(selector).await?;
        self.call(Method::POST, &format!("/element/{id}/click"), Some(json!({})))
            .await
            .map(|_| ())
    }

    async fn read_text(&self, selector: &str) -> Result<String, DriverError> {
        let id = self.find(selector).await?;
        let value = self.call(Method::GET, &format!("/element/{id}/text"), None).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn read_attribute(&self, selector: &str, name: &str) -> Result<Option<String>, DriverError> {
        let id = self.find(selector).await?;
        let value = self
            .call(Method::GET, &format!("/element/{id}/attribute/{name}"), None)
            .await?;
        Ok(value.as_str().map(ToString::to_string))
    }

    async fn read_value(&self, selector: &str) -> Result<String, DriverError> {
        let id = self.find(selector).await?;
        let value = self
            .call(Method::GET, &format!("/element/{id}/property/value"), None)
            .await?;
        Ok(match value {
            Value::String(s) => s,
            Value::Null => String::new(),
            other => other.to_string(),
        })
    }

    async fn select_option(&self, selector: &str, value: &str) -> Result<(), DriverError> {
        self.click(&format!("{selector} > option[value=\"{value}\"]"))
            .await
    }

    async fn count(&self, selector: &str) -> Result<usize, DriverError> {
        Ok(self.find_all(selector).await?.len())
    }

    async fn wait_until_stable(&self, selector: &str) -> Result<usize, DriverError> {
        settle_count(&self.policy, selector, || self.count(selector)).await
    }

    async fn wait_for_state(
        &self,
        selector: &str,
        state: ElementState,
        timeout: Option<Duration>,
    ) -> Result<(), DriverError> {
        let started = Instant::now();
        loop {
            if self.state_reached(selector, state).await? {
                return Ok(());
            }
            if let Some(limit) = timeout {
                if started.elapsed() >= limit {
                    return Err(DriverError::Timeout {
                        what: format!("{selector} to become {state:?}"),
                        waited: started.elapsed(),
                    });
                }
            }
            tokio::time::sleep(self.policy.quantum).await;
        }
    }

    async fn request_confirmation(
        &self,
        request: &ConfirmationRequest,
    ) -> Result<ConfirmationOutcome, DriverError> {
        let span = info_span!("confirmation");
        async {
            self.call(
                Method::POST,
                "/execute/sync",
                Some(json!({ "script": SHOW_MESSAGE_SCRIPT, "args": [request.message] })),
            )
            .await?;
            tokio::time::sleep(self.policy.quantum).await;
            while self.alert_open().await? {
                tokio::time::sleep(self.policy.quantum).await;
            }

            let decision = self
                .call(
                    Method::POST,
                    "/execute/async",
                    Some(json!({
                        "script": AWAIT_DECISION_SCRIPT,
                        "args": [request.confirm_selector, request.discard_selector],
                    })),
                )
                .await?;
            if !decision.as_bool().unwrap_or(false) {
                return Ok(ConfirmationOutcome::Discarded);
            }

            let started = Instant::now();
            while started.elapsed() < request.conflict_window {
                if self
                    .notice_contains(&request.conflict_selector, &request.conflict_text)
                    .await?
                {
                    return Ok(ConfirmationOutcome::ConflictDetected);
                }
                tokio::time::sleep(self.policy.quantum.min(request.conflict_window)).await;
            }
            Ok::<_, DriverError>(ConfirmationOutcome::Confirmed)
        }
        .instrument(span)
        .await
    }
}
