use chrono_tz::Tz;
use thiserror::Error;

/// Errors from reading the environment configuration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EnvError {
    #[error("missing required environment variable {0}")]
    Missing(String),

    #[error("invalid value for {var}: {value}")]
    Invalid { var: String, value: String },
}

/// Validated environment configuration, read once at startup.
///
/// An invalid environment fails the process before the first cycle; it
/// never fails a cycle midway.
#[derive(Debug, Clone)]
pub struct SchedulerEnv {
    /// Region of the hub account (tables, event buses).
    pub region: String,
    /// Config table holding schedule and period definitions.
    pub config_table: String,
    /// Registry table holding managed resources and their stored state.
    pub registry_table: String,
    /// Maintenance-window mirror table.
    pub maintenance_window_table: String,
    /// Tag key whose value names a resource's schedule.
    pub schedule_tag_key: String,
    /// Name of the scheduling role assumed in target accounts.
    pub scheduler_role_name: String,
    /// Minutes between scheduling cycles.
    pub scheduling_interval_minutes: u32,
    /// Timezone applied to schedules that do not carry their own.
    pub default_timezone: Tz,
    /// Ceiling for an encoded dispatch payload; above it the inline stores
    /// are omitted and the runner hydrates from the config table.
    pub payload_ceiling_bytes: usize,
    /// Prefix for scheduled-action names written onto auto-scaling groups.
    pub rule_prefix: String,
    /// Whether to publish per-cycle instance counts.
    pub enable_ops_metrics: bool,
    /// Metric namespace for instance counts.
    pub metrics_namespace: String,
    /// Local event bus name, when events are enabled.
    pub local_event_bus: Option<String>,
    /// Globally aggregated event bus ARN, when configured.
    pub global_event_bus: Option<String>,
    /// Optional endpoint URL override for local development.
    pub endpoint_url: Option<String>,
}

const DEFAULT_SCHEDULE_TAG_KEY: &str = "Schedule";
const DEFAULT_INTERVAL_MINUTES: u32 = 5;
// Leaves headroom under the 256 KB dispatch payload class.
const DEFAULT_PAYLOAD_CEILING: usize = 230 * 1024;
const DEFAULT_RULE_PREFIX: &str = "offhours-";
const DEFAULT_METRICS_NAMESPACE: &str = "Offhours";

impl SchedulerEnv {
    /// Read and validate the environment.
    pub fn from_env() -> Result<Self, EnvError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Read from an arbitrary lookup function (tests inject maps here).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, EnvError> {
        let required = |var: &str| -> Result<String, EnvError> {
            lookup(var)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| EnvError::Missing(var.to_owned()))
        };

        let scheduling_interval_minutes = match lookup("SCHEDULING_INTERVAL_MINUTES") {
            Some(raw) => raw
                .parse::<u32>()
                .ok()
                .filter(|v| *v >= 1)
                .ok_or_else(|| EnvError::Invalid {
                    var: "SCHEDULING_INTERVAL_MINUTES".to_owned(),
                    value: raw,
                })?,
            None => DEFAULT_INTERVAL_MINUTES,
        };

        let default_timezone = match lookup("DEFAULT_TIMEZONE") {
            Some(raw) => raw.parse::<Tz>().map_err(|_| EnvError::Invalid {
                var: "DEFAULT_TIMEZONE".to_owned(),
                value: raw,
            })?,
            None => chrono_tz::UTC,
        };

        let payload_ceiling_bytes = match lookup("PAYLOAD_CEILING_BYTES") {
            Some(raw) => raw
                .parse::<usize>()
                .ok()
                .filter(|v| *v > 0)
                .ok_or_else(|| EnvError::Invalid {
                    var: "PAYLOAD_CEILING_BYTES".to_owned(),
                    value: raw,
                })?,
            None => DEFAULT_PAYLOAD_CEILING,
        };

        let enable_ops_metrics = match lookup("ENABLE_OPS_METRICS").as_deref() {
            None | Some("false") | Some("0") => false,
            Some("true") | Some("1") => true,
            Some(other) => {
                return Err(EnvError::Invalid {
                    var: "ENABLE_OPS_METRICS".to_owned(),
                    value: other.to_owned(),
                });
            }
        };

        Ok(Self {
            region: required("AWS_REGION")?,
            config_table: required("CONFIG_TABLE")?,
            registry_table: required("REGISTRY_TABLE")?,
            maintenance_window_table: required("MAINTENANCE_WINDOW_TABLE")?,
            schedule_tag_key: lookup("SCHEDULE_TAG_KEY")
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| DEFAULT_SCHEDULE_TAG_KEY.to_owned()),
            scheduler_role_name: required("SCHEDULER_ROLE_NAME")?,
            scheduling_interval_minutes,
            default_timezone,
            payload_ceiling_bytes,
            rule_prefix: lookup("RULE_PREFIX")
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| DEFAULT_RULE_PREFIX.to_owned()),
            enable_ops_metrics,
            metrics_namespace: lookup("METRICS_NAMESPACE")
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| DEFAULT_METRICS_NAMESPACE.to_owned()),
            local_event_bus: lookup("LOCAL_EVENT_BUS").filter(|v| !v.is_empty()),
            global_event_bus: lookup("GLOBAL_EVENT_BUS").filter(|v| !v.is_empty()),
            endpoint_url: lookup("AWS_ENDPOINT_URL").filter(|v| !v.is_empty()),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn base_vars() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("AWS_REGION", "us-east-1"),
            ("CONFIG_TABLE", "offhours-config"),
            ("REGISTRY_TABLE", "offhours-registry"),
            ("MAINTENANCE_WINDOW_TABLE", "offhours-mw"),
            ("SCHEDULER_ROLE_NAME", "offhours-scheduling-role"),
        ])
    }

    fn env_from(vars: &HashMap<&str, &str>) -> Result<SchedulerEnv, EnvError> {
        SchedulerEnv::from_lookup(|var| vars.get(var).map(|v| (*v).to_owned()))
    }

    #[test]
    fn minimal_environment_gets_defaults() {
        let env = env_from(&base_vars()).unwrap();
        assert_eq!(env.schedule_tag_key, "Schedule");
        assert_eq!(env.scheduling_interval_minutes, 5);
        assert_eq!(env.default_timezone, chrono_tz::UTC);
        assert_eq!(env.payload_ceiling_bytes, 230 * 1024);
        assert_eq!(env.rule_prefix, "offhours-");
        assert!(!env.enable_ops_metrics);
        assert!(env.local_event_bus.is_none());
    }

    #[test]
    fn missing_required_var_fails() {
        let mut vars = base_vars();
        vars.remove("REGISTRY_TABLE");
        assert_eq!(
            env_from(&vars).unwrap_err(),
            EnvError::Missing("REGISTRY_TABLE".into())
        );
    }

    #[test]
    fn invalid_interval_fails() {
        let mut vars = base_vars();
        vars.insert("SCHEDULING_INTERVAL_MINUTES", "0");
        assert!(matches!(
            env_from(&vars).unwrap_err(),
            EnvError::Invalid { .. }
        ));

        vars.insert("SCHEDULING_INTERVAL_MINUTES", "often");
        assert!(matches!(
            env_from(&vars).unwrap_err(),
            EnvError::Invalid { .. }
        ));
    }

    #[test]
    fn invalid_timezone_fails() {
        let mut vars = base_vars();
        vars.insert("DEFAULT_TIMEZONE", "Mars/Olympus");
        assert!(matches!(
            env_from(&vars).unwrap_err(),
            EnvError::Invalid { .. }
        ));
    }

    #[test]
    fn overrides_are_honored() {
        let mut vars = base_vars();
        vars.insert("SCHEDULE_TAG_KEY", "offhours:schedule");
        vars.insert("SCHEDULING_INTERVAL_MINUTES", "15");
        vars.insert("DEFAULT_TIMEZONE", "Europe/Berlin");
        vars.insert("ENABLE_OPS_METRICS", "true");
        vars.insert("LOCAL_EVENT_BUS", "offhours-events");

        let env = env_from(&vars).unwrap();
        assert_eq!(env.schedule_tag_key, "offhours:schedule");
        assert_eq!(env.scheduling_interval_minutes, 15);
        assert_eq!(env.default_timezone, chrono_tz::Europe::Berlin);
        assert!(env.enable_ops_metrics);
        assert_eq!(env.local_event_bus.as_deref(), Some("offhours-events"));
    }
}
