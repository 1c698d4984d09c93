use std::env;
use std::str::FromStr;
use std::time::Duration;

/// 账本后端选择
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerConfig {
    /// 本地 MMR 账本 (sled 目录)
    Local { db_path: String },
    /// 外部账本网关
    Remote { url: String, poll_interval: Duration },
}

/// 短信通道凭据 (Twilio)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CarrierConfig {
    pub account_sid: String,
    pub auth_token: String,
    pub from_number: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub event_db_path: String,
    pub key_path: String,
    pub ledger: LedgerConfig,
    pub classifier_url: String,
    pub classifier_timeout: Duration,
    pub anchor_timeout: Duration,
    pub notify_timeout: Duration,
    pub store_timeout: Duration,
    pub max_upload_bytes: usize,
    /// 未配置时告警只写日志
    pub carrier: Option<CarrierConfig>,
    pub emergency_contact: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// 从任意键值来源读取配置 (测试不必改进程环境变量)
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let ledger = match var("LEDGER_BACKEND", "local").as_str() {
            "local" => LedgerConfig::Local {
                db_path: var("LEDGER_DB_PATH", "data/db/ledger"),
            },
            "remote" => LedgerConfig::Remote {
                url: lookup("LEDGER_URL")
                    .ok_or_else(|| anyhow::anyhow!("LEDGER_URL is required when LEDGER_BACKEND=remote"))?,
                poll_interval: Duration::from_millis(parse(&lookup, "LEDGER_POLL_MS", 500)?),
            },
            other => anyhow::bail!("LEDGER_BACKEND must be `local` or `remote`, got `{}`", other),
        };

        let carrier = match (
            lookup("TWILIO_ACCOUNT_SID"),
            lookup("TWILIO_AUTH_TOKEN"),
            lookup("TWILIO_PHONE_NUMBER"),
        ) {
            (Some(account_sid), Some(auth_token), Some(from_number)) => Some(CarrierConfig {
                account_sid,
                auth_token,
                from_number,
            }),
            _ => None,
        };

        Ok(Self {
            host: var("HOST", "0.0.0.0"),
            port: parse(&lookup, "PORT", 8000)?,
            event_db_path: var("EVENT_DB_PATH", "data/db/events"),
            key_path: var("KEY_PATH", "guardian.key"),
            ledger,
            classifier_url: var("CLASSIFIER_URL", "http://127.0.0.1:8001/api/analyze"),
            classifier_timeout: Duration::from_secs(parse(&lookup, "CLASSIFIER_TIMEOUT_SECS", 30)?),
            anchor_timeout: Duration::from_secs(parse(&lookup, "ANCHOR_TIMEOUT_SECS", 60)?),
            notify_timeout: Duration::from_secs(parse(&lookup, "NOTIFY_TIMEOUT_SECS", 10)?),
            store_timeout: Duration::from_secs(parse(&lookup, "STORE_TIMEOUT_SECS", 5)?),
            max_upload_bytes: parse(&lookup, "MAX_UPLOAD_BYTES", 50 * 1024 * 1024)?,
            carrier,
            emergency_contact: var("EMERGENCY_CONTACT_PHONE_NUMBER", ""),
        })
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{} must be a number ({}): {}", key, raw, e)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> anyhow::Result<Config> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg.port, 8000);
        assert_eq!(cfg.classifier_url, "http://127.0.0.1:8001/api/analyze");
        assert_eq!(
            cfg.ledger,
            LedgerConfig::Local {
                db_path: "data/db/ledger".into()
            }
        );
        assert_eq!(cfg.classifier_timeout, Duration::from_secs(30));
        assert!(cfg.carrier.is_none());
    }

    #[test]
    fn remote_ledger_needs_url() {
        assert!(config(&[("LEDGER_BACKEND", "remote")]).is_err());
        assert!(config(&[("LEDGER_BACKEND", "ethereum")]).is_err());

        let cfg = config(&[
            ("LEDGER_BACKEND", "remote"),
            ("LEDGER_URL", "http://ledger:9000"),
            ("LEDGER_POLL_MS", "250"),
        ])
        .unwrap();
        assert_eq!(
            cfg.ledger,
            LedgerConfig::Remote {
                url: "http://ledger:9000".into(),
                poll_interval: Duration::from_millis(250),
            }
        );
    }

    #[test]
    fn bad_number_is_error() {
        let err = config(&[("PORT", "eighty")]).unwrap_err();
        assert!(err.to_string().contains("PORT"));
    }

    #[test]
    fn carrier_requires_all_credentials() {
        assert!(config(&[("TWILIO_ACCOUNT_SID", "AC1")]).unwrap().carrier.is_none());

        let cfg = config(&[
            ("TWILIO_ACCOUNT_SID", "AC1"),
            ("TWILIO_AUTH_TOKEN", "tok"),
            ("TWILIO_PHONE_NUMBER", "+1000"),
            ("EMERGENCY_CONTACT_PHONE_NUMBER", "+1999"),
        ])
        .unwrap();
        assert_eq!(cfg.carrier.unwrap().from_number, "+1000");
        assert_eq!(cfg.emergency_contact, "+1999");
    }
}
