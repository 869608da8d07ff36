//! SIMBAD TAP client used for per-object property lookups.

use anyhow::{Context, Result};
use astrocache_domain::PropertyRecord;
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::Value;
use time::OffsetDateTime;
use tracing::debug;

use crate::config::NetworkConfig;
use crate::lookup::{LookupError, LookupOutcome, RemoteLookupClient};

const USER_AGENT: &str = concat!("astrocache/", env!("CARGO_PKG_VERSION"));

pub struct SimbadClient {
    client: Client,
    endpoint: String,
}

impl SimbadClient {
    /// # Errors
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(network: &NetworkConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(network.timeout)
            .build()
            .context("failed to build SIMBAD http client")?;
        Ok(Self {
            client,
            endpoint: network.endpoint.clone(),
        })
    }
}

impl RemoteLookupClient for SimbadClient {
    fn lookup(&self, name: &str) -> Result<LookupOutcome, LookupError> {
        let query = object_query(name);
        debug!(object = name, endpoint = %self.endpoint, "querying SIMBAD");
        let response = self
            .client
            .post(&self.endpoint)
            .form(&[
                ("REQUEST", "doQuery"),
                ("LANG", "ADQL"),
                ("FORMAT", "json"),
                ("QUERY", query.as_str()),
            ])
            .send()
            .map_err(|err| LookupError::Transport(format!("{name}: {err}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(LookupError::Transport(format!(
                "{name}: SIMBAD returned HTTP {status}"
            )));
        }
        let body = response
            .text()
            .map_err(|err| LookupError::Transport(format!("{name}: {err}")))?;
        parse_response(&body, OffsetDateTime::now_utc())
    }
}

fn object_query(name: &str) -> String {
    let escaped = name.trim().replace('\'', "''");
    format!(
        "SELECT TOP 1 basic.main_id, basic.sp_type, basic.otype, allfluxes.V, allfluxes.B \
         FROM basic JOIN ident ON ident.oidref = basic.oid \
         LEFT JOIN allfluxes ON allfluxes.oidref = basic.oid \
         WHERE ident.id = '{escaped}'"
    )
}

#[derive(Debug, Deserialize)]
struct TapResponse {
    metadata: Vec<TapColumn>,
    data: Vec<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
struct TapColumn {
    name: String,
}

fn parse_response(body: &str, fetched_at: OffsetDateTime) -> Result<LookupOutcome, LookupError> {
    let response: TapResponse = serde_json::from_str(body)
        .map_err(|err| LookupError::Protocol(format!("invalid TAP payload: {err}")))?;
    let Some(row) = response.data.first() else {
        return Ok(LookupOutcome::NotFound);
    };
    let column = |wanted: &str| {
        response
            .metadata
            .iter()
            .position(|col| col.name.eq_ignore_ascii_case(wanted))
            .and_then(|idx| row.get(idx))
    };
    if column("main_id").is_none() {
        return Err(LookupError::Protocol("TAP payload lacks main_id".into()));
    }
    Ok(LookupOutcome::Found(PropertyRecord {
        display_name: column("main_id").and_then(text),
        spectral_type: column("sp_type").and_then(text),
        v_mag: column("V").and_then(Value::as_f64),
        b_mag: column("B").and_then(Value::as_f64),
        object_type: column("otype").and_then(text),
        fetched_at: Some(fetched_at),
        ..PropertyRecord::default()
    }))
}

fn text(value: &Value) -> Option<String> {
    value
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToOwned::to_owned)
}
