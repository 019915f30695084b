use std::collections::HashMap;

use chrono::NaiveTime;
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};

use offhours_core::cron::{CronExpr, RangeEnd};
use offhours_core::{Arn, AsgSize, PeriodDefinition, ScheduleDefinition};

use crate::auth::AssumedRole;
use crate::error::{AwsError, classify_sdk_error};

/// How long compiled scheduled actions stay valid before the scheduler
/// refreshes them even when the schedule is unchanged.
pub const ACTION_TTL_DAYS: i64 = 30;

/// Runtime information for one auto-scaling group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsgRuntimeInfo {
    pub name: String,
    pub arn: Arn,
    pub size: AsgSize,
    pub tags: HashMap<String, String>,
}

impl AsgRuntimeInfo {
    /// Whether the group is currently scaled to zero.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.size.is_stopped()
    }
}

/// Auto Scaling service adapter for one scheduling target.
///
/// Unlike instances, groups are not started and stopped each cycle: their
/// schedule is compiled into recurring scheduled actions owned by the
/// group, and the scheduler only rewrites them when the schedule hash or
/// the TTL says so.
pub struct AsgScheduler {
    client: aws_sdk_autoscaling::Client,
    account: String,
    region: String,
}

impl std::fmt::Debug for AsgScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsgScheduler")
            .field("account", &self.account)
            .field("region", &self.region)
            .field("client", &"<AutoScalingClient>")
            .finish()
    }
}

impl AsgScheduler {
    /// Create an adapter using the target's assumed role.
    #[must_use]
    pub fn new(role: &AssumedRole) -> Self {
        Self {
            client: aws_sdk_autoscaling::Client::new(role.sdk_config()),
            account: role.account.clone(),
            region: role.region.clone(),
        }
    }

    /// Create an adapter with a pre-built client (for testing).
    #[must_use]
    pub fn with_client(
        client: aws_sdk_autoscaling::Client,
        account: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            client,
            account: account.into(),
            region: region.into(),
        }
    }

    /// Describe every group carrying the schedule tag key.
    #[instrument(skip(self), fields(account = %self.account, region = %self.region))]
    pub async fn describe_tagged(
        &self,
        schedule_tag_key: &str,
    ) -> Result<Vec<AsgRuntimeInfo>, AwsError> {
        let mut groups = self.describe(&[]).await?;
        groups.retain(|group| group.tags.contains_key(schedule_tag_key));
        Ok(groups)
    }

    /// Describe groups by name (all groups when `names` is empty),
    /// paginated.
    pub async fn describe(&self, names: &[String]) -> Result<Vec<AsgRuntimeInfo>, AwsError> {
        let mut groups = Vec::new();
        let mut next_token: Option<String> = None;
        loop {
            let mut request = self.client.describe_auto_scaling_groups();
            if !names.is_empty() {
                request = request.set_auto_scaling_group_names(Some(names.to_vec()));
            }
            let result = request
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(|e| classify_sdk_error(&e.to_string()))?;

            for group in result.auto_scaling_groups() {
                let Some(arn) = group.auto_scaling_group_arn() else {
                    continue;
                };
                let Ok(arn) = Arn::parse(arn) else {
                    warn!(arn, "skipping auto-scaling group with unparseable ARN");
                    continue;
                };
                groups.push(AsgRuntimeInfo {
                    name: group.auto_scaling_group_name().unwrap_or_default().to_owned(),
                    arn,
                    size: AsgSize {
                        min_size: group.min_size().unwrap_or(0),
                        desired_size: group.desired_capacity().unwrap_or(0),
                        max_size: group.max_size().unwrap_or(0),
                    },
                    tags: group
                        .tags()
                        .iter()
                        .filter_map(|tag| match (tag.key(), tag.value()) {
                            (Some(k), Some(v)) => Some((k.to_owned(), v.to_owned())),
                            _ => None,
                        })
                        .collect(),
                });
            }
            match result.next_token() {
                Some(token) => next_token = Some(token.to_owned()),
                None => break,
            }
        }
        Ok(groups)
    }

    /// Compile a schedule into recurring start/stop scheduled actions on
    /// the group, replacing any actions previously written under
    /// `rule_prefix`.
    #[instrument(skip(self, schedule, periods, running_size), fields(group = %group_name, schedule = %schedule.name))]
    pub async fn configure_schedule(
        &self,
        group_name: &str,
        schedule: &ScheduleDefinition,
        periods: &[PeriodDefinition],
        running_size: AsgSize,
        rule_prefix: &str,
    ) -> Result<(), AwsError> {
        let actions = compile_scheduled_actions(schedule, periods, rule_prefix)
            .map_err(AwsError::Configuration)?;

        self.delete_scheduled_actions(group_name, rule_prefix).await?;

        let timezone = schedule.timezone.as_deref().unwrap_or("UTC");
        for action in &actions {
            let size = if action.starts {
                running_size
            } else {
                AsgSize::stopped()
            };
            debug!(action = %action.name, recurrence = %action.recurrence, "writing scheduled action");
            self.client
                .put_scheduled_update_group_action()
                .auto_scaling_group_name(group_name)
                .scheduled_action_name(&action.name)
                .recurrence(&action.recurrence)
                .time_zone(timezone)
                .min_size(size.min_size)
                .desired_capacity(size.desired_size)
                .max_size(size.max_size)
                .send()
                .await
                .map_err(|e| classify_sdk_error(&e.to_string()))?;
        }

        info!(
            group = group_name,
            count = actions.len(),
            "scheduled actions configured"
        );
        Ok(())
    }

    /// Delete every scheduled action on the group written under
    /// `rule_prefix`.
    pub async fn delete_scheduled_actions(
        &self,
        group_name: &str,
        rule_prefix: &str,
    ) -> Result<(), AwsError> {
        let mut next_token: Option<String> = None;
        let mut owned_actions = Vec::new();
        loop {
            let result = self
                .client
                .describe_scheduled_actions()
                .auto_scaling_group_name(group_name)
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(|e| classify_sdk_error(&e.to_string()))?;

            owned_actions.extend(
                result
                    .scheduled_update_group_actions()
                    .iter()
                    .filter_map(|action| action.scheduled_action_name())
                    .filter(|name| name.starts_with(rule_prefix))
                    .map(ToOwned::to_owned),
            );
            match result.next_token() {
                Some(token) => next_token = Some(token.to_owned()),
                None => break,
            }
        }

        for name in owned_actions {
            debug!(group = group_name, action = %name, "deleting scheduled action");
            self.client
                .delete_scheduled_action()
                .auto_scaling_group_name(group_name)
                .scheduled_action_name(&name)
                .send()
                .await
                .map_err(|e| classify_sdk_error(&e.to_string()))?;
        }
        Ok(())
    }

    /// Remove tags from a group by key.
    pub async fn delete_tags(&self, group_name: &str, keys: &[String]) -> Result<(), AwsError> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut request = self.client.delete_tags();
        for key in keys {
            request = request.tags(
                aws_sdk_autoscaling::types::Tag::builder()
                    .resource_id(group_name)
                    .resource_type("auto-scaling-group")
                    .key(key)
                    .build(),
            );
        }
        request
            .send()
            .await
            .map_err(|e| classify_sdk_error(&e.to_string()))?;
        Ok(())
    }

    /// Apply tags to a group (informational tags and the size snapshot).
    pub async fn set_tags(
        &self,
        group_name: &str,
        pairs: &[(String, String)],
    ) -> Result<(), AwsError> {
        if pairs.is_empty() {
            return Ok(());
        }
        let mut request = self.client.create_or_update_tags();
        for (key, value) in pairs {
            request = request.tags(
                aws_sdk_autoscaling::types::Tag::builder()
                    .resource_id(group_name)
                    .resource_type("auto-scaling-group")
                    .key(key)
                    .value(value)
                    .propagate_at_launch(false)
                    .build(),
            );
        }
        request
            .send()
            .await
            .map_err(|e| classify_sdk_error(&e.to_string()))?;
        Ok(())
    }
}

/// One compiled scheduled action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledAction {
    pub name: String,
    pub recurrence: String,
    pub starts: bool,
}

/// Compile a schedule's periods into start/stop scheduled actions.
///
/// Errors describe why the schedule cannot be expressed in the
/// scheduled-action recurrence grammar; callers surface them as
/// `IncompatibleSchedule` informational tags.
pub fn compile_scheduled_actions(
    schedule: &ScheduleDefinition,
    periods: &[PeriodDefinition],
    rule_prefix: &str,
) -> Result<Vec<CompiledAction>, String> {
    check_compatibility(schedule, periods)?;

    let by_name: HashMap<&str, &PeriodDefinition> =
        periods.iter().map(|p| (p.name.as_str(), p)).collect();

    let mut actions = Vec::new();
    for period_ref in &schedule.periods {
        let period = by_name
            .get(period_ref.name.as_str())
            .ok_or_else(|| format!("period {} not found", period_ref.name))?;
        let running = period
            .to_running_period()
            .map_err(|e| format!("period {}: {e}", period.name))?;

        let begin = running
            .begintime
            .ok_or_else(|| format!("period {} has no begintime", period.name))?;
        let end = running
            .endtime
            .ok_or_else(|| format!("period {} has no endtime", period.name))?;

        let monthdays = cron_field(&running.recurrence.monthdays, CronField::Monthdays)?;
        let months = cron_field(&running.recurrence.months, CronField::Months)?;
        let weekdays = cron_field(&running.recurrence.weekdays, CronField::Weekdays)?;

        actions.push(CompiledAction {
            name: format!("{rule_prefix}{}-{}-start", schedule.name, period.name),
            recurrence: recurrence_line(begin, &monthdays, &months, &weekdays),
            starts: true,
        });
        actions.push(CompiledAction {
            name: format!("{rule_prefix}{}-{}-stop", schedule.name, period.name),
            recurrence: recurrence_line(end, &monthdays, &months, &weekdays),
            starts: false,
        });
    }
    Ok(actions)
}

/// Whether a schedule can be expressed as recurring scheduled actions at
/// all. Returns the reason when it cannot.
pub fn check_compatibility(
    schedule: &ScheduleDefinition,
    periods: &[PeriodDefinition],
) -> Result<(), String> {
    if schedule.override_status.is_some() {
        return Err(
            "override_status cannot be expressed as recurring scheduled actions".to_owned(),
        );
    }
    let by_name: HashMap<&str, &PeriodDefinition> =
        periods.iter().map(|p| (p.name.as_str(), p)).collect();
    for period_ref in &schedule.periods {
        let period = by_name
            .get(period_ref.name.as_str())
            .ok_or_else(|| format!("period {} not found", period_ref.name))?;
        if period.begintime.is_none() || period.endtime.is_none() {
            return Err(format!(
                "period {} needs both begintime and endtime for scheduled actions",
                period.name
            ));
        }
        let running = period
            .to_running_period()
            .map_err(|e| format!("period {}: {e}", period.name))?;
        for (expr, field) in [
            (&running.recurrence.monthdays, CronField::Monthdays),
            (&running.recurrence.months, CronField::Months),
            (&running.recurrence.weekdays, CronField::Weekdays),
        ] {
            cron_field(expr, field)
                .map_err(|e| format!("period {}: {e}", period.name))?;
        }
    }
    Ok(())
}

fn recurrence_line(time: NaiveTime, monthdays: &str, months: &str, weekdays: &str) -> String {
    use chrono::Timelike;
    format!(
        "{} {} {monthdays} {months} {weekdays}",
        time.minute(),
        time.hour()
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CronField {
    Monthdays,
    Months,
    Weekdays,
}

/// Render a recurrence sub-expression as a classic cron field.
///
/// The scheduled-action grammar is plain cron: no `L`, `W`, or `#` forms,
/// no wrapping ranges, and weekdays are Sunday-0 based rather than this
/// scheduler's Monday-0.
fn cron_field(expr: &CronExpr, field: CronField) -> Result<String, String> {
    match expr {
        CronExpr::All => Ok("*".to_owned()),
        CronExpr::Value(v) => Ok(cron_value(*v, field).to_string()),
        CronExpr::Range {
            start,
            end,
            interval,
        } => {
            let Some(RangeEnd::Value(end)) = end else {
                return Err("open-ended and L-bounded ranges are not expressible".to_owned());
            };
            let (start, end) = (cron_value(*start, field), cron_value(*end, field));
            if start > end {
                return Err(format!("wrapping range {start}-{end} is not expressible"));
            }
            if *interval == 1 {
                Ok(format!("{start}-{end}"))
            } else {
                Ok(format!("{start}-{end}/{interval}"))
            }
        }
        CronExpr::Union(exprs) => {
            let fields = exprs
                .iter()
                .map(|sub| cron_field(sub, field))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(fields.join(","))
        }
        CronExpr::Last
        | CronExpr::NearestWeekday(_)
        | CronExpr::NthWeekday { .. }
        | CronExpr::LastWeekday(_) => {
            Err(format!("{expr} is not expressible in a scheduled action"))
        }
    }
}

/// Map a value into classic cron numbering. Weekdays shift from Monday-0
/// to Sunday-0; other fields pass through.
fn cron_value(value: u32, field: CronField) -> u32 {
    match field {
        CronField::Weekdays => (value + 1) % 7,
        CronField::Monthdays | CronField::Months => value,
    }
}

/// Hash of the schedule and period definitions a group's scheduled actions
/// were compiled from. Periods are sorted by name so the hash is stable
/// across iteration order.
#[must_use]
pub fn compute_schedule_hash(schedule: &ScheduleDefinition, periods: &[PeriodDefinition]) -> String {
    let mut sorted: Vec<&PeriodDefinition> = periods.iter().collect();
    sorted.sort_by(|a, b| a.name.cmp(&b.name));

    let mut hasher = Sha256::new();
    if let Ok(bytes) = serde_json::to_vec(schedule) {
        hasher.update(&bytes);
    }
    for period in sorted {
        if let Ok(bytes) = serde_json::to_vec(period) {
            hasher.update(&bytes);
        }
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use offhours_core::PeriodRef;

    use super::*;

    fn period(name: &str) -> PeriodDefinition {
        PeriodDefinition {
            name: name.into(),
            begintime: Some("09:00".into()),
            endtime: Some("17:30".into()),
            weekdays: Some(BTreeSet::from(["mon-fri".to_owned()])),
            monthdays: None,
            months: None,
            description: None,
        }
    }

    fn schedule(name: &str, period_names: &[&str]) -> ScheduleDefinition {
        ScheduleDefinition {
            name: name.into(),
            periods: period_names.iter().map(|p| PeriodRef::named(*p)).collect(),
            timezone: Some("UTC".into()),
            override_status: None,
            description: None,
            maintenance_windows: None,
            stop_new_instances: None,
            use_maintenance_window: None,
            enforced: None,
            hibernate: None,
            retain_running: None,
        }
    }

    #[test]
    fn compile_produces_start_and_stop_actions() {
        let periods = vec![period("office")];
        let actions =
            compile_scheduled_actions(&schedule("biz", &["office"]), &periods, "offhours-")
                .unwrap();
        assert_eq!(actions.len(), 2);

        let start = &actions[0];
        assert_eq!(start.name, "offhours-biz-office-start");
        // Monday-0 "mon-fri" becomes Sunday-0 "1-5".
        assert_eq!(start.recurrence, "0 9 * * 1-5");
        assert!(start.starts);

        let stop = &actions[1];
        assert_eq!(stop.name, "offhours-biz-office-stop");
        assert_eq!(stop.recurrence, "30 17 * * 1-5");
        assert!(!stop.starts);
    }

    #[test]
    fn weekday_values_shift_to_sunday_zero() {
        let mut p = period("office");
        p.weekdays = Some(BTreeSet::from(["sun".to_owned()]));
        let actions =
            compile_scheduled_actions(&schedule("biz", &["office"]), &[p], "offhours-").unwrap();
        assert_eq!(actions[0].recurrence, "0 9 * * 0");
    }

    #[test]
    fn monthday_and_month_fields_pass_through() {
        let mut p = period("office");
        p.weekdays = None;
        p.monthdays = Some(BTreeSet::from(["1-15/2".to_owned()]));
        p.months = Some(BTreeSet::from(["jan-jun".to_owned()]));
        let actions =
            compile_scheduled_actions(&schedule("biz", &["office"]), &[p], "offhours-").unwrap();
        assert_eq!(actions[0].recurrence, "0 9 1-15/2 1-6 *");
    }

    #[test]
    fn period_without_endtime_is_incompatible() {
        let mut p = period("office");
        p.endtime = None;
        let err = check_compatibility(&schedule("biz", &["office"]), &[p]).unwrap_err();
        assert!(err.contains("begintime and endtime"));
    }

    #[test]
    fn override_status_is_incompatible() {
        let mut s = schedule("biz", &["office"]);
        s.override_status = Some("running".into());
        let err = check_compatibility(&s, &[period("office")]).unwrap_err();
        assert!(err.contains("override_status"));
    }

    #[test]
    fn nth_weekday_is_incompatible() {
        let mut p = period("office");
        p.weekdays = Some(BTreeSet::from(["mon#1".to_owned()]));
        let err = check_compatibility(&schedule("biz", &["office"]), &[p]).unwrap_err();
        assert!(err.contains("not expressible"));
    }

    #[test]
    fn wrapping_weekday_range_is_incompatible() {
        let mut p = period("office");
        p.weekdays = Some(BTreeSet::from(["fri-mon".to_owned()]));
        let err = check_compatibility(&schedule("biz", &["office"]), &[p]).unwrap_err();
        assert!(err.contains("wrapping range"));
    }

    #[test]
    fn missing_period_is_incompatible() {
        let err = check_compatibility(&schedule("biz", &["ghost"]), &[]).unwrap_err();
        assert!(err.contains("not found"));
    }

    #[test]
    fn schedule_hash_is_stable_across_period_order() {
        let s = schedule("biz", &["a", "b"]);
        let p1 = period("a");
        let p2 = period("b");
        let forward = compute_schedule_hash(&s, &[p1.clone(), p2.clone()]);
        let reverse = compute_schedule_hash(&s, &[p2, p1]);
        assert_eq!(forward, reverse);
        assert_eq!(forward.len(), 64);
    }

    #[test]
    fn schedule_hash_changes_with_content() {
        let s = schedule("biz", &["a"]);
        let base = compute_schedule_hash(&s, &[period("a")]);

        let mut changed = period("a");
        changed.endtime = Some("18:00".into());
        assert_ne!(base, compute_schedule_hash(&s, &[changed]));

        let mut changed_schedule = s.clone();
        changed_schedule.timezone = Some("Europe/Berlin".into());
        assert_ne!(base, compute_schedule_hash(&changed_schedule, &[period("a")]));
    }
}
