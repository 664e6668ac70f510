//! Evaluates Safety Index scores against configurable thresholds and emits
//! alerts, with cooldown suppression and time-based escalation.

use crate::types::{Alert, AlertHandler, AlertSeverity, AlertStatus, AlertType, EscalationRule};
use chrono::Utc;
use psp_common::config::{AlertConfig, AlertThresholdDefaults};
use psp_common::{AdverseEventType, SafetyIndex};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

type CooldownKey = (String, String, String);
type ScoreHistoryKey = (String, String);

/// Generates and manages clinical safety alerts from Safety Index evaluations.
///
/// Thresholds come from [`AlertConfig`]; escalation rules default to the
/// standard 15/30 minute unacknowledged-alert ladder but can be overridden.
/// Interior state is mutex-guarded so the engine can be shared across
/// concurrently evaluated patients, mirroring the gateway's registry.
pub struct AlertEngine {
    thresholds: HashMap<String, AlertThresholdDefaults>,
    disagreement_threshold: f64,
    disagreement_cooldown_seconds: i64,
    trend_cooldown_seconds: i64,
    min_score_history: usize,
    escalation_rules: Mutex<Vec<EscalationRule>>,
    active_alerts: Mutex<HashMap<String, Alert>>,
    alert_counter: AtomicU64,
    handlers: Mutex<Vec<AlertHandler>>,
    cooldowns: Mutex<HashMap<CooldownKey, chrono::DateTime<Utc>>>,
    score_history: Mutex<HashMap<ScoreHistoryKey, Vec<(f64, chrono::DateTime<Utc>)>>>,
}

impl AlertEngine {
    pub fn new(config: &AlertConfig) -> Self {
        Self {
            thresholds: config.thresholds.clone(),
            disagreement_threshold: config.disagreement_threshold,
            disagreement_cooldown_seconds: config.disagreement_cooldown_seconds as i64,
            trend_cooldown_seconds: config.trend_cooldown_seconds as i64,
            min_score_history: config.min_score_history,
            escalation_rules: Mutex::new(Self::default_escalation_rules(config)),
            active_alerts: Mutex::new(HashMap::new()),
            alert_counter: AtomicU64::new(0),
            handlers: Mutex::new(Vec::new()),
            cooldowns: Mutex::new(HashMap::new()),
            score_history: Mutex::new(HashMap::new()),
        }
    }

    fn default_escalation_rules(config: &AlertConfig) -> Vec<EscalationRule> {
        vec![
            EscalationRule {
                after_minutes: config.escalate_urgent_after_minutes,
                escalate_to_severity: AlertSeverity::Urgent,
                notify_roles: vec!["charge_nurse".to_string()],
                message_suffix: format!(
                    "[ESCALATED: unacknowledged for {} min]",
                    config.escalate_urgent_after_minutes
                ),
            },
            EscalationRule {
                after_minutes: config.escalate_critical_after_minutes,
                escalate_to_severity: AlertSeverity::Critical,
                notify_roles: vec!["attending_physician".to_string(), "charge_nurse".to_string()],
                message_suffix: format!(
                    "[ESCALATED: unacknowledged for {} min]",
                    config.escalate_critical_after_minutes
                ),
            },
        ]
    }

    /// Override the default escalation ladder.
    pub fn set_escalation_rules(&self, rules: Vec<EscalationRule>) {
        *self.escalation_rules.lock().unwrap() = rules;
    }

    /// Register a handler invoked synchronously for every newly generated alert.
    pub fn register_handler(&self, handler: AlertHandler) {
        self.handlers.lock().unwrap().push(handler);
    }

    fn next_alert_id(&self) -> String {
        let n = self.alert_counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("ALERT-{n:08}")
    }

    fn thresholds_for(&self, ae: AdverseEventType) -> AlertThresholdDefaults {
        self.thresholds
            .get(ae.as_str())
            .cloned()
            .unwrap_or(AlertThresholdDefaults {
                warning: 0.4,
                urgent: 0.6,
                critical: 0.8,
                rate_of_change_per_hour: 0.05,
                cooldown_seconds: 1800,
            })
    }

    /// Evaluate a Safety Index and return any alerts it warrants. Dispatches
    /// each new alert to every registered handler, updates score history for
    /// trend detection, and processes escalation of already-active alerts.
    pub fn evaluate(&self, si: &SafetyIndex) -> Vec<Alert> {
        let config = self.thresholds_for(si.adverse_event);

        let mut alerts = Vec::new();
        if let Some(alert) = self.check_thresholds(si, &config) {
            alerts.push(alert);
        }
        if let Some(alert) = self.check_rate_of_change(si, &config) {
            alerts.push(alert);
        }
        if si.model_agreement < self.disagreement_threshold {
            if let Some(alert) = self.create_disagreement_alert(si) {
                alerts.push(alert);
            }
        }
        if let Some(alert) = self.check_trend(si) {
            alerts.push(alert);
        }

        for alert in &alerts {
            self.active_alerts
                .lock()
                .unwrap()
                .insert(alert.alert_id.clone(), alert.clone());
            let handlers = self.handlers.lock().unwrap();
            for handler in handlers.iter() {
                if let Err(err) = handler(alert) {
                    tracing::warn!(alert_id = %alert.alert_id, error = %err, "alert handler failed");
                }
            }
        }

        let key = (si.patient_id.clone(), si.adverse_event.as_str().to_string());
        self.score_history
            .lock()
            .unwrap()
            .entry(key)
            .or_default()
            .push((si.composite_score, Utc::now()));

        self.process_escalations();

        alerts
    }

    /// Mark an alert as acknowledged. Returns `false` if the alert is unknown.
    pub fn acknowledge_alert(&self, alert_id: &str, acknowledged_by: &str) -> bool {
        let mut active = self.active_alerts.lock().unwrap();
        match active.get_mut(alert_id) {
            Some(alert) => {
                alert.status = AlertStatus::Acknowledged;
                alert.acknowledged_at = Some(Utc::now());
                alert.acknowledged_by = acknowledged_by.to_string();
                tracing::info!(alert_id, acknowledged_by, "alert acknowledged");
                true
            }
            None => false,
        }
    }

    /// Mark an alert as resolved. Returns `false` if the alert is unknown.
    pub fn resolve_alert(&self, alert_id: &str) -> bool {
        let mut active = self.active_alerts.lock().unwrap();
        match active.get_mut(alert_id) {
            Some(alert) => {
                alert.status = AlertStatus::Resolved;
                alert.resolved_at = Some(Utc::now());
                tracing::info!(alert_id, "alert resolved");
                true
            }
            None => false,
        }
    }

    /// All active or acknowledged (not resolved/suppressed) alerts, optionally
    /// filtered by patient, sorted by descending severity.
    pub fn get_active_alerts(
        &self,
        patient_id: Option<&str>,
        min_severity: AlertSeverity,
    ) -> Vec<Alert> {
        let active = self.active_alerts.lock().unwrap();
        let mut alerts: Vec<Alert> = active
            .values()
            .filter(|a| {
                matches!(a.status, AlertStatus::Active | AlertStatus::Acknowledged)
                    && a.severity >= min_severity
            })
            .filter(|a| match patient_id {
                Some(id) => a.patient_id == id,
                None => true,
            })
            .cloned()
            .collect();
        alerts.sort_by(|a, b| b.severity.cmp(&a.severity));
        alerts
    }

    fn check_thresholds(&self, si: &SafetyIndex, config: &AlertThresholdDefaults) -> Option<Alert> {
        let (severity, threshold) = if si.composite_score >= config.critical {
            (AlertSeverity::Critical, config.critical)
        } else if si.composite_score >= config.urgent {
            (AlertSeverity::Urgent, config.urgent)
        } else if si.composite_score >= config.warning {
            (AlertSeverity::Warning, config.warning)
        } else {
            return None;
        };

        if self.is_on_cooldown(
            &si.patient_id,
            si.adverse_event,
            AlertType::ThresholdBreach,
            config.cooldown_seconds as i64,
        ) {
            return None;
        }

        let recommended_actions = recommended_actions(si.adverse_event, severity);

        Some(self.create_alert(
            si.patient_id.clone(),
            si.adverse_event,
            AlertType::ThresholdBreach,
            severity,
            format!(
                "{} - {} Safety Index at {:.2}",
                severity.as_str(),
                si.adverse_event.as_str(),
                si.composite_score
            ),
            format!(
                "Patient {}: {} Safety Index ({:.3}) has crossed the {} threshold ({:.2}). \
                 Risk category: {:?}. Hours since infusion: {:.1}.",
                si.patient_id,
                si.adverse_event.as_str(),
                si.composite_score,
                severity.as_str(),
                threshold,
                si.risk_category,
                si.hours_since_infusion
            ),
            si.composite_score,
            si.composite_score,
            threshold,
            recommended_actions,
        ))
    }

    fn check_rate_of_change(
        &self,
        si: &SafetyIndex,
        config: &AlertThresholdDefaults,
    ) -> Option<Alert> {
        if si.trend.abs() < config.rate_of_change_per_hour || si.trend <= 0.0 {
            return None;
        }

        if self.is_on_cooldown(
            &si.patient_id,
            si.adverse_event,
            AlertType::RateOfChange,
            config.cooldown_seconds as i64,
        ) {
            return None;
        }

        let severity = if si.trend > config.rate_of_change_per_hour * 3.0 {
            AlertSeverity::Critical
        } else if si.trend > config.rate_of_change_per_hour * 2.0 {
            AlertSeverity::Urgent
        } else {
            AlertSeverity::Warning
        };

        Some(self.create_alert(
            si.patient_id.clone(),
            si.adverse_event,
            AlertType::RateOfChange,
            severity,
            format!(
                "Rapid {} risk increase: +{:.4}/hr",
                si.adverse_event.as_str(),
                si.trend
            ),
            format!(
                "Patient {}: {} Safety Index is increasing at {:.4}/hr (threshold: {:.4}/hr). \
                 Current score: {:.3}.",
                si.patient_id,
                si.adverse_event.as_str(),
                si.trend,
                config.rate_of_change_per_hour,
                si.composite_score
            ),
            si.composite_score,
            si.trend,
            config.rate_of_change_per_hour,
            vec![
                "Increase biomarker monitoring frequency".to_string(),
                "Review cytokine trajectory for accelerating pattern".to_string(),
                "Prepare intervention protocol".to_string(),
            ],
        ))
    }

    fn create_disagreement_alert(&self, si: &SafetyIndex) -> Option<Alert> {
        let key = (
            si.patient_id.clone(),
            si.adverse_event.as_str().to_string(),
            AlertType::ModelDisagreement.as_str().to_string(),
        );
        if !self.tick_cooldown(key, self.disagreement_cooldown_seconds) {
            return None;
        }

        Some(self.create_alert(
            si.patient_id.clone(),
            si.adverse_event,
            AlertType::ModelDisagreement,
            AlertSeverity::Warning,
            format!(
                "Model disagreement for {} (agreement: {:.0}%)",
                si.adverse_event.as_str(),
                si.model_agreement * 100.0
            ),
            format!(
                "Patient {}: Foundation models disagree on {} risk. Agreement: {:.0}%. \
                 Ensemble score: {:.3}. Clinical judgment should guide decision-making.",
                si.patient_id,
                si.adverse_event.as_str(),
                si.model_agreement * 100.0,
                si.composite_score
            ),
            si.composite_score,
            si.model_agreement,
            self.disagreement_threshold,
            vec![
                "Review individual model predictions".to_string(),
                "Prioritize biomarker data over model predictions".to_string(),
                "Consider requesting additional clinical data".to_string(),
            ],
        ))
    }

    fn check_trend(&self, si: &SafetyIndex) -> Option<Alert> {
        let key = (si.patient_id.clone(), si.adverse_event.as_str().to_string());
        let history = self.score_history.lock().unwrap();
        let recent = history.get(&key)?;
        if recent.len() < self.min_score_history {
            return None;
        }
        let recent: Vec<(f64, chrono::DateTime<Utc>)> =
            recent[recent.len() - self.min_score_history..].to_vec();
        drop(history);

        let monotonic_increasing = recent.windows(2).all(|w| w[0].0 < w[1].0);
        if !monotonic_increasing {
            return None;
        }
        let total_increase = recent.last().unwrap().0 - recent.first().unwrap().0;
        if total_increase <= 0.1 {
            return None;
        }

        let cooldown_key = (
            si.patient_id.clone(),
            si.adverse_event.as_str().to_string(),
            AlertType::TrendWorsening.as_str().to_string(),
        );
        if !self.tick_cooldown(cooldown_key, self.trend_cooldown_seconds) {
            return None;
        }

        let trajectory = recent
            .iter()
            .map(|(s, _)| format!("{s:.3}"))
            .collect::<Vec<_>>()
            .join(" -> ");

        Some(self.create_alert(
            si.patient_id.clone(),
            si.adverse_event,
            AlertType::TrendWorsening,
            AlertSeverity::Urgent,
            format!(
                "Sustained worsening: {} score increased {:.3} over last {} assessments",
                si.adverse_event.as_str(),
                total_increase,
                self.min_score_history
            ),
            format!(
                "Patient {}: {} Safety Index has been consistently worsening. \
                 Score trajectory: {}. Total increase: {:.3}.",
                si.patient_id,
                si.adverse_event.as_str(),
                trajectory,
                total_increase
            ),
            si.composite_score,
            total_increase,
            0.1,
            vec![
                "Clinical team review of patient trajectory".to_string(),
                "Consider preemptive intervention".to_string(),
                "Increase monitoring frequency to q4h or more".to_string(),
            ],
        ))
    }

    #[allow(clippy::too_many_arguments)]
    fn create_alert(
        &self,
        patient_id: String,
        adverse_event: AdverseEventType,
        alert_type: AlertType,
        severity: AlertSeverity,
        title: String,
        message: String,
        safety_index_score: f64,
        trigger_value: f64,
        threshold_value: f64,
        recommended_actions: Vec<String>,
    ) -> Alert {
        Alert::new(
            self.next_alert_id(),
            patient_id,
            adverse_event,
            alert_type,
            severity,
            title,
            message,
            safety_index_score,
            trigger_value,
            threshold_value,
            recommended_actions,
        )
    }

    /// `true` the first time a key is seen or once `cooldown_seconds` has
    /// elapsed since the last trigger; always refreshes the stored time.
    fn is_on_cooldown(
        &self,
        patient_id: &str,
        adverse_event: AdverseEventType,
        alert_type: AlertType,
        cooldown_seconds: i64,
    ) -> bool {
        let key = (
            patient_id.to_string(),
            adverse_event.as_str().to_string(),
            alert_type.as_str().to_string(),
        );
        !self.tick_cooldown(key, cooldown_seconds)
    }

    /// Returns `true` if the cooldown has elapsed (and records the trigger),
    /// `false` if still within cooldown.
    fn tick_cooldown(&self, key: CooldownKey, cooldown_seconds: i64) -> bool {
        let now = Utc::now();
        let mut cooldowns = self.cooldowns.lock().unwrap();
        match cooldowns.get(&key) {
            Some(last) if (now - *last).num_seconds() < cooldown_seconds => false,
            _ => {
                cooldowns.insert(key, now);
                true
            }
        }
    }

    fn process_escalations(&self) {
        let now = Utc::now();
        let rules = self.escalation_rules.lock().unwrap();
        let mut active = self.active_alerts.lock().unwrap();
        for alert in active.values_mut() {
            if alert.status != AlertStatus::Active {
                continue;
            }
            for rule in rules.iter() {
                let elapsed_minutes = (now - alert.created_at).num_seconds() as f64 / 60.0;
                if elapsed_minutes >= rule.after_minutes as f64
                    && alert.severity < rule.escalate_to_severity
                {
                    let old_severity = alert.severity;
                    alert.severity = rule.escalate_to_severity;
                    if !rule.message_suffix.is_empty() {
                        alert.message.push(' ');
                        alert.message.push_str(&rule.message_suffix);
                    }
                    tracing::warn!(
                        alert_id = %alert.alert_id,
                        from = old_severity.as_str(),
                        to = alert.severity.as_str(),
                        elapsed_minutes,
                        "alert escalated"
                    );
                }
            }
        }
    }
}

fn recommended_actions(adverse_event: AdverseEventType, severity: AlertSeverity) -> Vec<String> {
    let mut actions = Vec::new();
    if severity >= AlertSeverity::Critical {
        actions.push("Immediate physician bedside evaluation".to_string());
    }

    match adverse_event {
        AdverseEventType::Crs => {
            if severity >= AlertSeverity::Urgent {
                actions.push("Consider tocilizumab administration per protocol".to_string());
                actions.push("Monitor vitals q1h (BP, SpO2, temperature)".to_string());
            }
            if severity >= AlertSeverity::Critical {
                actions.push("Evaluate for vasopressor support".to_string());
                actions.push("Consider ICU transfer".to_string());
            }
            actions.push("Order stat IL-6, CRP, ferritin levels".to_string());
        }
        AdverseEventType::Icans => {
            if severity >= AlertSeverity::Urgent {
                actions.push("Perform ICE assessment".to_string());
                actions.push("Consider dexamethasone per protocol".to_string());
            }
            if severity >= AlertSeverity::Critical {
                actions.push("Evaluate for seizure prophylaxis".to_string());
                actions.push("Consider brain imaging".to_string());
            }
            actions.push("Neurological checks q2h".to_string());
        }
        AdverseEventType::Hlh => {
            if severity >= AlertSeverity::Urgent {
                actions.push("Stat ferritin, D-dimer, fibrinogen, LDH".to_string());
                actions.push("Consider anakinra per protocol".to_string());
            }
            if severity >= AlertSeverity::Critical {
                actions.push("Evaluate for ruxolitinib".to_string());
                actions.push("Consider ICU transfer for organ support".to_string());
            }
            actions.push("Monitor for coagulopathy (DIC screen)".to_string());
        }
    }

    actions
}

#[cfg(test)]
mod tests {
    use super::*;
    use psp_common::{DomainScore, RiskCategory};

    fn safety_index(score: f64, trend: f64, model_agreement: f64) -> SafetyIndex {
        SafetyIndex {
            patient_id: "PT-001".to_string(),
            adverse_event: AdverseEventType::Crs,
            composite_score: score,
            risk_category: SafetyIndex::categorize(score),
            domain_scores: vec![DomainScore::new("biomarker", score, 0.9)],
            trend,
            hours_since_infusion: 48.0,
            prediction_horizon_hours: 24.0,
            model_agreement,
            timestamp: Utc::now(),
            metadata: Default::default(),
        }
    }

    #[test]
    fn crossing_critical_threshold_emits_a_critical_alert() {
        let engine = AlertEngine::new(&AlertConfig::default());
        let si = safety_index(0.85, 0.0, 1.0);
        let alerts = engine.evaluate(&si);
        assert!(alerts
            .iter()
            .any(|a| a.alert_type == AlertType::ThresholdBreach
                && a.severity == AlertSeverity::Critical));
    }

    #[test]
    fn repeated_threshold_breach_is_suppressed_by_cooldown() {
        let engine = AlertEngine::new(&AlertConfig::default());
        let si = safety_index(0.85, 0.0, 1.0);
        let first = engine.evaluate(&si);
        let second = engine.evaluate(&si);
        assert!(first
            .iter()
            .any(|a| a.alert_type == AlertType::ThresholdBreach));
        assert!(!second
            .iter()
            .any(|a| a.alert_type == AlertType::ThresholdBreach));
    }

    #[test]
    fn low_model_agreement_triggers_disagreement_alert() {
        let engine = AlertEngine::new(&AlertConfig::default());
        let si = safety_index(0.2, 0.0, 0.3);
        let alerts = engine.evaluate(&si);
        assert!(alerts
            .iter()
            .any(|a| a.alert_type == AlertType::ModelDisagreement));
    }

    #[test]
    fn three_rising_scores_trigger_sustained_worsening_alert() {
        let engine = AlertEngine::new(&AlertConfig::default());
        engine.evaluate(&safety_index(0.1, 0.0, 1.0));
        engine.evaluate(&safety_index(0.15, 0.0, 1.0));
        let alerts = engine.evaluate(&safety_index(0.3, 0.0, 1.0));
        assert!(alerts
            .iter()
            .any(|a| a.alert_type == AlertType::TrendWorsening));
    }

    #[test]
    fn acknowledge_and_resolve_update_status() {
        let engine = AlertEngine::new(&AlertConfig::default());
        let alerts = engine.evaluate(&safety_index(0.85, 0.0, 1.0));
        let id = alerts[0].alert_id.clone();
        assert!(engine.acknowledge_alert(&id, "nurse_jane"));
        assert!(engine.resolve_alert(&id));
        assert!(!engine.acknowledge_alert("ALERT-99999999", "nobody"));
    }

    #[test]
    fn unacknowledged_critical_alert_still_reports_as_active() {
        let engine = AlertEngine::new(&AlertConfig::default());
        engine.evaluate(&safety_index(0.85, 0.0, 1.0));
        let active = engine.get_active_alerts(Some("PT-001"), AlertSeverity::Info);
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].status, AlertStatus::Active);
    }
}
