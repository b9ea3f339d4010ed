use crate::error::RemotePersistenceError;
use crate::ledger::{LedgerHandle, LedgerService};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

/// Ledger backed by a Google Sheets spreadsheet
///
/// Tabs are worksheets of one spreadsheet. The bearer token is provided by the
/// deployment; this client neither refreshes nor exchanges credentials.
pub struct GoogleSheetsLedger {
    client: reqwest::Client,
    api_base: String,
    spreadsheet_id: String,
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct SpreadsheetMeta {
    #[serde(default)]
    sheets: Vec<SheetMeta>,
}

#[derive(Debug, Deserialize)]
struct SheetMeta {
    properties: SheetProperties,
}

#[derive(Debug, Deserialize)]
struct SheetProperties {
    title: String,
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

impl GoogleSheetsLedger {
    pub fn new(
        api_base: &str,
        spreadsheet_id: &str,
        access_token: &str,
    ) -> Result<Self, RemotePersistenceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(GoogleSheetsLedger {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            spreadsheet_id: spreadsheet_id.to_string(),
            access_token: access_token.to_string(),
        })
    }

    fn spreadsheet_url(&self) -> String {
        format!(
            "{}/v4/spreadsheets/{}",
            self.api_base,
            urlencoding::encode(&self.spreadsheet_id)
        )
    }

    /// URL of a whole-tab A1 range, e.g. `'Jane Smith'`
    fn values_url(&self, tab: &str) -> String {
        let range = format!("'{}'", tab.replace('\'', "''"));
        format!(
            "{}/values/{}",
            self.spreadsheet_url(),
            urlencoding::encode(&range)
        )
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, RemotePersistenceError> {
        let response = request.bearer_auth(&self.access_token).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(RemotePersistenceError::Auth(message));
        }
        Err(RemotePersistenceError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

fn value_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[async_trait]
impl LedgerService for GoogleSheetsLedger {
    async fn find(&self, name: &str) -> Result<Option<LedgerHandle>, RemotePersistenceError> {
        let request = self
            .client
            .get(self.spreadsheet_url())
            .query(&[("fields", "sheets.properties.title")]);
        let meta: SpreadsheetMeta = self.send(request).await?.json().await?;
        Ok(meta
            .sheets
            .iter()
            .any(|sheet| sheet.properties.title == name)
            .then(|| LedgerHandle {
                name: name.to_string(),
            }))
    }

    async fn create(&self, name: &str) -> Result<LedgerHandle, RemotePersistenceError> {
        let body = json!({
            "requests": [{ "addSheet": { "properties": { "title": name } } }]
        });
        let request = self
            .client
            .post(format!("{}:batchUpdate", self.spreadsheet_url()))
            .json(&body);
        self.send(request).await?;
        Ok(LedgerHandle {
            name: name.to_string(),
        })
    }

    async fn read_all(
        &self,
        handle: &LedgerHandle,
    ) -> Result<Vec<Vec<String>>, RemotePersistenceError> {
        let request = self.client.get(self.values_url(&handle.name));
        let range: ValueRange = self.send(request).await?.json().await?;
        Ok(range
            .values
            .iter()
            .map(|row| row.iter().map(value_to_string).collect())
            .collect())
    }

    async fn append(
        &self,
        handle: &LedgerHandle,
        rows: &[Vec<String>],
    ) -> Result<(), RemotePersistenceError> {
        if rows.is_empty() {
            return Ok(());
        }
        let request = self
            .client
            .post(format!("{}:append", self.values_url(&handle.name)))
            .query(&[
                ("valueInputOption", "RAW"),
                ("insertDataOption", "INSERT_ROWS"),
            ])
            .json(&json!({ "values": rows }));
        self.send(request).await?;
        log::debug!("appended {} rows to sheet tab '{}'", rows.len(), handle.name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_quoted_range_urls() {
        let ledger =
            GoogleSheetsLedger::new("https://sheets.example.com/", "abc123", "token").unwrap();
        assert_eq!(
            ledger.spreadsheet_url(),
            "https://sheets.example.com/v4/spreadsheets/abc123"
        );
        assert_eq!(
            ledger.values_url("O'Neil (Ops)"),
            "https://sheets.example.com/v4/spreadsheets/abc123/values/%27O%27%27Neil%20%28Ops%29%27"
        );
    }

    #[test]
    fn converts_cell_values() {
        assert_eq!(value_to_string(&json!("Yes")), "Yes");
        assert_eq!(value_to_string(&json!(3)), "3");
        assert_eq!(value_to_string(&serde_json::Value::Null), "");
    }

    #[tokio::test]
    async fn unreachable_service_is_a_transport_error() {
        let ledger = GoogleSheetsLedger::new("http://127.0.0.1:9", "sheet", "token").unwrap();
        let result = ledger.find("Master").await;
        assert!(matches!(result, Err(RemotePersistenceError::Transport(_))));
    }
}
