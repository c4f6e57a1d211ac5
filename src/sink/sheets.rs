use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{error, info};
use urlencoding::encode;
use yup_oauth2::authenticator::DefaultAuthenticator;
use yup_oauth2::{ServiceAccountAuthenticator, ServiceAccountKey};

use super::{DocumentSink, SinkError, SinkRow};
use crate::config::SheetsSection;

const SHEETS_API: &str = "https://sheets.googleapis.com/v4/spreadsheets";
const SCOPES: [&str; 1] = ["https://www.googleapis.com/auth/spreadsheets"];

/// Appends one row per record to a Google Sheet using a service account.
pub struct SheetsSink {
    client: Client,
    auth: DefaultAuthenticator,
    spreadsheet_id: String,
    range: String,
    header_ready: AtomicBool,
}

#[derive(Debug, Default, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

impl SheetsSink {
    /// `Ok(None)` when the sheet is not configured; an error when it is
    /// configured with unusable credentials.
    pub async fn from_config(cfg: &SheetsSection) -> Result<Option<Self>, SinkError> {
        let Some(spreadsheet_id) = cfg.spreadsheet_id.clone() else {
            return Ok(None);
        };
        let key = match (&cfg.service_account_json, &cfg.service_account_file) {
            (Some(inline), _) => yup_oauth2::parse_service_account_key(inline),
            (None, Some(path)) => yup_oauth2::read_service_account_key(path).await,
            (None, None) => return Ok(None),
        }
        .map_err(|e| SinkError::Auth(format!("invalid service account key: {e}")))?;
        check_key(&key)?;

        let auth = ServiceAccountAuthenticator::builder(key)
            .build()
            .await
            .map_err(|e| SinkError::Auth(e.to_string()))?;

        info!(spreadsheet = %spreadsheet_id, range = %cfg.range, "Google Sheets sink enabled");
        Ok(Some(Self {
            client: Client::new(),
            auth,
            spreadsheet_id,
            range: cfg.range.clone(),
            header_ready: AtomicBool::new(false),
        }))
    }

    async fn access_token(&self) -> Result<String, SinkError> {
        let token = self
            .auth
            .token(&SCOPES)
            .await
            .map_err(|e| SinkError::Auth(e.to_string()))?;
        token
            .token()
            .map(str::to_string)
            .ok_or_else(|| SinkError::Auth("empty access token".into()))
    }

    /// Write and format the header row unless row 1 already has content.
    async fn ensure_header_row(&self, token: &str) -> Result<(), SinkError> {
        let header_range = header_range(&self.range);

        let existing: ValueRange = check_status(
            self.client
                .get(values_url(&self.spreadsheet_id, &header_range, ""))
                .bearer_auth(token)
                .send()
                .await?,
        )
        .await?
        .json()
        .await?;
        if existing.values.first().is_some_and(|row| !row.is_empty()) {
            return Ok(());
        }

        check_status(
            self.client
                .put(values_url(&self.spreadsheet_id, &header_range, "?valueInputOption=RAW"))
                .bearer_auth(token)
                .json(&json!({ "values": [SinkRow::header()] }))
                .send()
                .await?,
        )
        .await?;

        check_status(
            self.client
                .post(format!("{SHEETS_API}/{}:batchUpdate", self.spreadsheet_id))
                .bearer_auth(token)
                .json(&header_format_request())
                .send()
                .await?,
        )
        .await?;

        info!(range = %header_range, "Header row written");
        Ok(())
    }
}

#[async_trait]
impl DocumentSink for SheetsSink {
    fn name(&self) -> &'static str {
        "google-sheets"
    }

    async fn append(&self, row: &SinkRow) -> Result<(), SinkError> {
        let token = self.access_token().await?;

        if !self.header_ready.load(Ordering::Acquire) {
            match self.ensure_header_row(&token).await {
                Ok(()) => self.header_ready.store(true, Ordering::Release),
                Err(e) => error!(error = %e, "Google Sheets header check failed"),
            }
        }

        check_status(
            self.client
                .post(values_url(
                    &self.spreadsheet_id,
                    &self.range,
                    ":append?valueInputOption=RAW",
                ))
                .bearer_auth(&token)
                .json(&json!({ "values": [row.values()] }))
                .send()
                .await?,
        )
        .await?;
        Ok(())
    }
}

fn check_key(key: &ServiceAccountKey) -> Result<(), SinkError> {
    if key.client_email.trim().is_empty() || key.private_key.trim().is_empty() {
        return Err(SinkError::Auth(
            "service account key is missing client_email or private_key".into(),
        ));
    }
    Ok(())
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, SinkError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Err(SinkError::Api { status, body })
}

/// `Sheet1!A:Z` -> `Sheet1!A1:R1`: the 18 header cells of the same sheet.
fn header_range(range: &str) -> String {
    let sheet = range.split('!').next().unwrap_or(range);
    format!("{sheet}!A1:R1")
}

fn values_url(spreadsheet_id: &str, range: &str, suffix: &str) -> String {
    format!("{SHEETS_API}/{spreadsheet_id}/values/{}{suffix}", encode(range))
}

/// Bold text on a light yellow background for the first row.
fn header_format_request() -> Value {
    let columns = SinkRow::header().len();
    json!({
        "requests": [{
            "repeatCell": {
                "range": {
                    "startRowIndex": 0,
                    "endRowIndex": 1,
                    "startColumnIndex": 0,
                    "endColumnIndex": columns,
                },
                "cell": {
                    "userEnteredFormat": {
                        "backgroundColor": { "red": 1, "green": 0.95, "blue": 0.8 },
                        "textFormat": { "bold": true },
                    }
                },
                "fields": "userEnteredFormat(backgroundColor,textFormat.bold)",
            }
        }]
    })
}
