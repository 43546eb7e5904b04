//! Request payloads for the hub's channel, group callback and alert APIs.
//!
//! Optional fields are left out of the JSON body entirely when unset, so the
//! hub applies its own defaults.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{DatahubError, Result};

/// How the hub stores a channel's long term data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StorageMode {
    Single,
    Batch,
}

/// How a group callback delivers items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchMode {
    /// Each item by itself
    Single,
    /// Each minute's worth of items
    Minute,
}

/// A new channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelConfig {
    pub name: String,
    pub owner: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl_days: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    /// Fully qualified channel URL on another hub
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replication_source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage: Option<StorageMode>,
}

impl ChannelConfig {
    pub fn new(name: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            owner: owner.into(),
            ..Self::default()
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(DatahubError::missing("channel name"));
        }
        if self.owner.is_empty() {
            return Err(DatahubError::missing("channel owner"));
        }
        Ok(())
    }
}

/// Changes to an existing channel. Unset fields are left as they are.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl_days: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replication_source: Option<String>,
}

/// A new group callback (webhook) on one channel.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupCallbackConfig {
    pub name: String,
    /// Channel to watch; expanded to a full channel URL on the client's hub
    pub channel_name: String,
    /// Where the hub delivers callbacks
    pub callback_url: String,
    pub parallel_calls: Option<u32>,
    /// Fully qualified item URL to start from
    pub start_item: Option<String>,
    pub paused: bool,
    pub batch: Option<BatchMode>,
    /// Only meaningful for [`BatchMode::Minute`]
    pub heartbeat: bool,
    pub max_wait_minutes: Option<u32>,
    /// Items older than this are not delivered; 0 means no limit
    pub ttl_minutes: Option<u32>,
}

impl GroupCallbackConfig {
    pub fn new(
        name: impl Into<String>,
        channel_name: impl Into<String>,
        callback_url: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            channel_name: channel_name.into(),
            callback_url: callback_url.into(),
            ..Self::default()
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(DatahubError::missing("group name"));
        }
        if self.channel_name.is_empty() {
            return Err(DatahubError::missing("channel name"));
        }
        if self.callback_url.is_empty() {
            return Err(DatahubError::missing("callback URL"));
        }
        Ok(())
    }

    pub(crate) fn to_body<'a>(&'a self, channel_url: String) -> GroupCallbackBody<'a> {
        GroupCallbackBody {
            channel_url,
            callback_url: &self.callback_url,
            parallel_calls: self.parallel_calls,
            start_item: self.start_item.as_deref(),
            paused: self.paused.then_some(true),
            batch: self.batch,
            heartbeat: self.heartbeat.then_some(true),
            max_wait_minutes: self.max_wait_minutes,
            ttl_minutes: self.ttl_minutes,
        }
    }
}

/// Wire form of [`GroupCallbackConfig`]; flags are only sent when set.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GroupCallbackBody<'a> {
    channel_url: String,
    callback_url: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parallel_calls: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    start_item: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    paused: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    batch: Option<BatchMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    heartbeat: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_wait_minutes: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ttl_minutes: Option<u32>,
}

/// Changes to an existing group callback.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupCallbackUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parallel_calls: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paused: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heartbeat: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_wait_minutes: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl_minutes: Option<u32>,
}

/// Body the hub posts to a group callback URL.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupCallbackData {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub uris: Vec<String>,
}

/// Comparison applied by a channel alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertOperator {
    #[serde(rename = ">=")]
    GreaterOrEqual,
    #[serde(rename = ">")]
    Greater,
    #[serde(rename = "==")]
    Equal,
    #[serde(rename = "<")]
    Less,
    #[serde(rename = "<=")]
    LessOrEqual,
}

impl AlertOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertOperator::GreaterOrEqual => ">=",
            AlertOperator::Greater => ">",
            AlertOperator::Equal => "==",
            AlertOperator::Less => "<",
            AlertOperator::LessOrEqual => "<=",
        }
    }
}

impl fmt::Display for AlertOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertOperator {
    type Err = DatahubError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            ">=" => Ok(AlertOperator::GreaterOrEqual),
            ">" => Ok(AlertOperator::Greater),
            "==" => Ok(AlertOperator::Equal),
            "<" => Ok(AlertOperator::Less),
            "<=" => Ok(AlertOperator::LessOrEqual),
            _ => Err(DatahubError::InvalidRequest(
                "Invalid alert operator".to_string(),
            )),
        }
    }
}

/// Alert on the number of items a channel receives within a time window.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelAlert {
    /// Channel to monitor
    pub source: String,
    pub service_name: String,
    pub time_window_minutes: u32,
    pub operator: AlertOperator,
    pub threshold: u64,
}

/// Alert on a group callback falling behind.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupAlert {
    /// Group callback to monitor
    pub source: String,
    pub service_name: String,
    pub time_window_minutes: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum AlertKind {
    Channel,
    Group,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AlertBody<'a> {
    source: &'a str,
    service_name: &'a str,
    #[serde(rename = "type")]
    kind: AlertKind,
    time_window_minutes: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    operator: Option<AlertOperator>,
    #[serde(skip_serializing_if = "Option::is_none")]
    threshold: Option<u64>,
}

fn validate_alert_common(source: &str, service_name: &str, time_window_minutes: u32) -> Result<()> {
    if source.is_empty() {
        return Err(DatahubError::missing("alert source"));
    }
    if service_name.is_empty() {
        return Err(DatahubError::missing("alert service name"));
    }
    if time_window_minutes == 0 {
        return Err(DatahubError::missing("alert time window"));
    }
    Ok(())
}

impl ChannelAlert {
    pub(crate) fn to_body(&self) -> Result<AlertBody<'_>> {
        validate_alert_common(&self.source, &self.service_name, self.time_window_minutes)?;
        if self.threshold == 0 {
            return Err(DatahubError::missing("alert threshold"));
        }
        Ok(AlertBody {
            source: &self.source,
            service_name: &self.service_name,
            kind: AlertKind::Channel,
            time_window_minutes: self.time_window_minutes,
            operator: Some(self.operator),
            threshold: Some(self.threshold),
        })
    }
}

impl GroupAlert {
    pub(crate) fn to_body(&self) -> Result<AlertBody<'_>> {
        validate_alert_common(&self.source, &self.service_name, self.time_window_minutes)?;
        Ok(AlertBody {
            source: &self.source,
            service_name: &self.service_name,
            kind: AlertKind::Group,
            time_window_minutes: self.time_window_minutes,
            operator: None,
            threshold: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[test]
    fn test_channel_config_omits_unset_fields() {
        let config = ChannelConfig::new("orders", "ops");
        assert_eq!(
            serde_json::to_value(&config).unwrap(),
            json!({"name": "orders", "owner": "ops"})
        );

        let config = ChannelConfig {
            ttl_days: Some(30),
            storage: Some(StorageMode::Batch),
            replication_source: Some("http://other/channel/orders".to_string()),
            ..ChannelConfig::new("orders", "ops")
        };
        assert_eq!(
            serde_json::to_value(&config).unwrap(),
            json!({
                "name": "orders",
                "owner": "ops",
                "ttlDays": 30,
                "replicationSource": "http://other/channel/orders",
                "storage": "BATCH",
            })
        );
    }

    #[test]
    fn test_group_callback_body_sends_flags_only_when_set() {
        let config = GroupCallbackConfig::new("g", "orders", "http://app/cb");
        let body = serde_json::to_value(config.to_body("http://hub/channel/orders".into())).unwrap();
        assert_eq!(
            body,
            json!({"channelUrl": "http://hub/channel/orders", "callbackUrl": "http://app/cb"})
        );

        let config = GroupCallbackConfig {
            paused: true,
            heartbeat: true,
            batch: Some(BatchMode::Minute),
            parallel_calls: Some(2),
            ..config
        };
        let body = serde_json::to_value(config.to_body("http://hub/channel/orders".into())).unwrap();
        assert_eq!(body["paused"], json!(true));
        assert_eq!(body["heartbeat"], json!(true));
        assert_eq!(body["batch"], json!("MINUTE"));
        assert_eq!(body["parallelCalls"], json!(2));
    }

    #[rstest]
    #[case(">=", AlertOperator::GreaterOrEqual)]
    #[case(">", AlertOperator::Greater)]
    #[case("==", AlertOperator::Equal)]
    #[case("<", AlertOperator::Less)]
    #[case("<=", AlertOperator::LessOrEqual)]
    fn test_alert_operator_parses(#[case] raw: &str, #[case] expected: AlertOperator) {
        assert_eq!(raw.parse::<AlertOperator>().unwrap(), expected);
        assert_eq!(serde_json::to_value(expected).unwrap(), json!(raw));
    }

    #[rstest]
    #[case("=")]
    #[case("!=")]
    #[case("")]
    fn test_alert_operator_rejects_unknown(#[case] raw: &str) {
        let err = raw.parse::<AlertOperator>().unwrap_err();
        assert_eq!(err.to_string(), "Invalid request: Invalid alert operator");
    }

    #[test]
    fn test_alert_bodies() {
        let alert = ChannelAlert {
            source: "orders".to_string(),
            service_name: "pager".to_string(),
            time_window_minutes: 5,
            operator: AlertOperator::Less,
            threshold: 10,
        };
        assert_eq!(
            serde_json::to_value(alert.to_body().unwrap()).unwrap(),
            json!({
                "source": "orders",
                "serviceName": "pager",
                "type": "channel",
                "timeWindowMinutes": 5,
                "operator": "<",
                "threshold": 10,
            })
        );

        let alert = GroupAlert {
            source: "orders_cb".to_string(),
            service_name: "pager".to_string(),
            time_window_minutes: 5,
        };
        assert_eq!(
            serde_json::to_value(alert.to_body().unwrap()).unwrap(),
            json!({
                "source": "orders_cb",
                "serviceName": "pager",
                "type": "group",
                "timeWindowMinutes": 5,
            })
        );
    }

    #[test]
    fn test_alert_validation() {
        let alert = ChannelAlert {
            source: "orders".to_string(),
            service_name: "pager".to_string(),
            time_window_minutes: 0,
            operator: AlertOperator::Less,
            threshold: 10,
        };
        assert!(alert.to_body().unwrap_err().to_string().contains("Missing alert time window"));

        let alert = ChannelAlert {
            time_window_minutes: 5,
            threshold: 0,
            ..alert
        };
        assert!(alert.to_body().unwrap_err().to_string().contains("Missing alert threshold"));
    }

    #[test]
    fn test_group_callback_data_tolerates_missing_fields() {
        let data: GroupCallbackData = serde_json::from_value(json!({"uris": ["http://hub/x"]})).unwrap();
        assert_eq!(data.uris, vec!["http://hub/x".to_string()]);
        assert!(data.name.is_none());
    }
}
