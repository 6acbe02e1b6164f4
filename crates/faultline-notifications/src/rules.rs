//! Rule-based channel filter

use faultline_database::repositories::SettingWithRules;
use faultline_entities::notification_rules;
use faultline_entities::notifications;
use faultline_entities::types::EventLevel;

/// Facts a rule is evaluated against
#[derive(Debug, Clone, Copy)]
pub struct RuleContext<'a> {
    pub level: EventLevel,
    pub is_new: bool,
    pub was_reactivated: bool,
    /// Fingerprint of the issue, once it has been looked up
    pub fingerprint: Option<&'a str>,
}

impl<'a> RuleContext<'a> {
    pub fn new(notification: &notifications::Model) -> Self {
        Self {
            level: notification.level,
            is_new: notification.is_new,
            was_reactivated: notification.was_reactivated,
            fingerprint: None,
        }
    }

    pub fn with_fingerprint(mut self, fingerprint: &'a str) -> Self {
        self.fingerprint = Some(fingerprint);
        self
    }
}

/// A rule matches when its level filter (if any) equals the notification
/// level, its fingerprint filter (if any) equals the issue fingerprint, and
/// it asks for at least one of the triggers the notification carries.
pub fn rule_matches(rule: &notification_rules::Model, ctx: &RuleContext<'_>) -> bool {
    if let Some(level) = rule.event_level {
        if level != ctx.level {
            return false;
        }
    }

    if let Some(wanted) = rule.fingerprint.as_deref().filter(|fp| !fp.is_empty()) {
        if ctx.fingerprint != Some(wanted) {
            return false;
        }
    }

    (rule.is_new_error && ctx.is_new) || (rule.is_regression && ctx.was_reactivated)
}

pub fn setting_matches(setting: &SettingWithRules, ctx: &RuleContext<'_>) -> bool {
    setting.setting.enabled && setting.rules.iter().any(|rule| rule_matches(rule, ctx))
}

/// Enabled settings with at least one matching rule, in their original order
pub fn select_settings<'s>(
    settings: &'s [SettingWithRules],
    ctx: &RuleContext<'_>,
) -> Vec<&'s SettingWithRules> {
    settings
        .iter()
        .filter(|setting| setting_matches(setting, ctx))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use faultline_entities::notification_settings;
    use faultline_entities::types::{NotificationStatus, NotificationType};
    use sea_orm::Iterable;

    fn rule(
        level: Option<EventLevel>,
        fingerprint: Option<&str>,
        is_new_error: bool,
        is_regression: bool,
    ) -> notification_rules::Model {
        notification_rules::Model {
            id: 1,
            setting_id: 1,
            position: 0,
            event_level: level,
            fingerprint: fingerprint.map(str::to_string),
            is_new_error,
            is_regression,
        }
    }

    fn setting(id: i32, enabled: bool, rules: Vec<notification_rules::Model>) -> SettingWithRules {
        SettingWithRules {
            setting: notification_settings::Model {
                id,
                project_id: 1,
                notification_type: NotificationType::Slack,
                config: "{}".to_string(),
                enabled,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            },
            rules,
        }
    }

    fn notification(level: EventLevel, is_new: bool, was_reactivated: bool) -> notifications::Model {
        notifications::Model {
            id: 1,
            project_id: 1,
            issue_id: 1,
            user_id: None,
            level,
            is_new,
            was_reactivated,
            status: NotificationStatus::Processing,
            claimed_at: None,
            sent_at: None,
            fail_reason: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_unset_level_matches_any_level() {
        let r = rule(None, None, true, false);
        for level in EventLevel::iter() {
            let n = notification(level, true, false);
            assert!(rule_matches(&r, &RuleContext::new(&n)), "level {level}");
        }
    }

    #[test]
    fn test_new_error_rule_ignores_pure_regressions() {
        let r = rule(None, None, true, false);
        assert!(rule_matches(&r, &RuleContext::new(&notification(EventLevel::Error, true, false))));
        assert!(!rule_matches(&r, &RuleContext::new(&notification(EventLevel::Error, false, true))));
        assert!(!rule_matches(&r, &RuleContext::new(&notification(EventLevel::Error, false, false))));
    }

    #[test]
    fn test_regression_rule() {
        let r = rule(None, None, false, true);
        assert!(rule_matches(&r, &RuleContext::new(&notification(EventLevel::Info, false, true))));
        assert!(!rule_matches(&r, &RuleContext::new(&notification(EventLevel::Info, true, false))));
    }

    #[test]
    fn test_rule_without_triggers_never_matches() {
        let r = rule(None, None, false, false);
        assert!(!rule_matches(&r, &RuleContext::new(&notification(EventLevel::Error, true, true))));
    }

    #[test]
    fn test_level_filter_selects_settings() {
        let settings = vec![setting(
            1,
            true,
            vec![rule(Some(EventLevel::Error), None, true, false)],
        )];

        let error = notification(EventLevel::Error, true, false);
        let selected = select_settings(&settings, &RuleContext::new(&error));
        assert_eq!(selected.len(), 1);

        let warning = notification(EventLevel::Warning, true, false);
        assert!(select_settings(&settings, &RuleContext::new(&warning)).is_empty());
    }

    #[test]
    fn test_disabled_and_ruleless_settings_are_excluded() {
        let settings = vec![
            setting(1, false, vec![rule(None, None, true, true)]),
            setting(2, true, vec![]),
            setting(3, true, vec![rule(Some(EventLevel::Fatal), None, true, true), rule(None, None, true, false)]),
        ];
        let n = notification(EventLevel::Error, true, false);
        let selected: Vec<i32> = select_settings(&settings, &RuleContext::new(&n))
            .into_iter()
            .map(|s| s.setting.id)
            .collect();
        assert_eq!(selected, vec![3]);
    }

    #[test]
    fn test_fingerprint_filter() {
        let r = rule(None, Some("abc"), true, false);
        let n = notification(EventLevel::Error, true, false);

        assert!(rule_matches(&r, &RuleContext::new(&n).with_fingerprint("abc")));
        assert!(!rule_matches(&r, &RuleContext::new(&n).with_fingerprint("def")));
        // unknown fingerprint cannot satisfy a fingerprint filter
        assert!(!rule_matches(&r, &RuleContext::new(&n)));

        // an empty filter is treated as unset
        let empty = rule(None, Some(""), true, false);
        assert!(rule_matches(&empty, &RuleContext::new(&n)));
    }
}
