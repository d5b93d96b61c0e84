//! One collection session: preflight, per-metric dispatch, failure report.
//!
//! A session owns the two external clients, the query cache and the model
//! context resolved at preflight. Nothing here is global; dropping the
//! session drops the cache with it.

use crate::catalog::{self, Source, Transform};
use crate::config::{Config, ModelConf};
use crate::device::{PlugClient, QueryCache};
use crate::extract;
use crate::sender::{SendError, SenderClient};
use chrono::{DateTime, Local};
use std::collections::BTreeMap;
use std::process::Command;
use tracing::{debug, info, warn};

/// Fatal problems caught before the first metric is attempted.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("unusable command line '{0}': {1}")]
    BadCommandLine(String, String),
    #[error("required tool not found on PATH: {0}")]
    ToolMissing(String),
    #[error("could not resolve the hardware model from the device output")]
    ModelUnresolved,
    #[error("no line budget configured for model {0}")]
    NoLineBudget(String),
    #[error("invalid extension entry for {model}: '{entry}': {reason}")]
    BadExtension { model: String, entry: String, reason: String },
}

impl SetupError {
    /// Process exit code for this failure class.
    pub fn exit_code(&self) -> i32 {
        match self {
            SetupError::BadCommandLine(..) | SetupError::ToolMissing(_) => 1,
            SetupError::ModelUnresolved
            | SetupError::NoLineBudget(_)
            | SetupError::BadExtension { .. } => 5,
        }
    }
}

/// Per-metric problems; collected into the run report, never fatal.
#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("metric name is empty")]
    MissingName,
    #[error("device address is empty")]
    MissingDevice,
    #[error("ingest target is empty")]
    MissingTarget,
    #[error("host label is empty")]
    MissingHostLabel,
    #[error("not in the metric catalog: {0}")]
    UnknownItem(String),
    #[error(transparent)]
    Send(#[from] SendError),
}

/// One `field[:alias]` token from a model's extra list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionItem {
    pub field: String,
    pub alias: Option<String>,
}

/// Parses a comma-separated `field[:alias]` list.
pub fn parse_extension_list(entry: &str) -> Result<Vec<ExtensionItem>, String> {
    let mut items = Vec::new();
    for token in entry.split(',') {
        let token = token.trim();
        if token.is_empty() {
            return Err("empty item".to_string());
        }
        match token.split_once(':') {
            None => items.push(ExtensionItem { field: token.to_string(), alias: None }),
            Some((field, alias)) => {
                if field.is_empty() {
                    return Err(format!("item '{token}' has no field name"));
                }
                if alias.is_empty() {
                    return Err(format!("item '{token}' has an empty alias"));
                }
                if alias.contains(':') {
                    return Err(format!("item '{token}' has more than one ':'"));
                }
                items.push(ExtensionItem {
                    field: field.to_string(),
                    alias: Some(alias.to_string()),
                });
            }
        }
    }
    Ok(items)
}

/// Finds the model's family entry: exact key first, then the longest prefix.
///
/// Regional variants (`HS110_EU_`, `HS110_US_`) share the entry keyed by the
/// bare family name; an exact key still wins so a specific variant can be
/// pinned in the configuration.
fn family_entry<'a>(
    models: &'a BTreeMap<String, ModelConf>,
    model: &str,
) -> Option<(&'a str, &'a ModelConf)> {
    if let Some((key, conf)) = models.get_key_value(model) {
        return Some((key.as_str(), conf));
    }
    models
        .iter()
        .filter(|(key, _)| model.starts_with(key.as_str()))
        .max_by_key(|(key, _)| key.len())
        .map(|(key, conf)| (key.as_str(), conf))
}

/// Splits a configured command line and checks its program is callable.
fn resolve_tool(cmdline: &str) -> Result<Vec<String>, SetupError> {
    let argv = shell_words::split(cmdline)
        .map_err(|e| SetupError::BadCommandLine(cmdline.to_string(), e.to_string()))?;
    if argv.is_empty() {
        return Err(SetupError::BadCommandLine(cmdline.to_string(), "empty command".to_string()));
    }
    if !tool_on_path(&argv[0]) {
        return Err(SetupError::ToolMissing(argv[0].clone()));
    }
    Ok(argv)
}

fn tool_on_path(tool: &str) -> bool {
    Command::new("which")
        .arg(tool)
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

/// Everything one run owns: clients, cache, resolved model context.
#[derive(Debug)]
pub struct Session {
    plug: PlugClient,
    sender: SenderClient,
    cache: QueryCache,
    model: String,
    budget: usize,
    extensions: Vec<ExtensionItem>,
    now: DateTime<Local>,
}

impl Session {
    /// Runs the whole preflight and returns a ready session.
    ///
    /// Order matters: tool checks first, then one info query to resolve the
    /// model, then budget lookup and extension validation. The info output
    /// stays cached for the catalog pass, so a full run costs exactly one
    /// info query and one energy query.
    pub fn open(
        config: &Config,
        device: &str,
        target: &str,
        host_label: &str,
        verbose: bool,
        now: DateTime<Local>,
    ) -> Result<Self, SetupError> {
        let plug_argv = resolve_tool(&config.plug_cmd)?;
        let sender_argv = resolve_tool(&config.sender_cmd)?;

        let plug = PlugClient::new(plug_argv, device.to_string());
        let mut cache = QueryCache::new();

        let raw = cache.info(&plug);
        let model = extract::scan_model(raw).ok_or(SetupError::ModelUnresolved)?;
        info!("resolved hardware model {}", model);

        let (family, conf) = family_entry(&config.models, &model)
            .ok_or_else(|| SetupError::NoLineBudget(model.clone()))?;
        let budget = conf.info_lines;
        debug!("model {} uses family {} with a {}-line payload", model, family, budget);

        // Every configured entry is validated, not only the resolved model's,
        // so a typo in any family list surfaces on the first run.
        let mut parsed: BTreeMap<&str, Vec<ExtensionItem>> = BTreeMap::new();
        for (key, model_conf) in &config.models {
            if let Some(extra) = &model_conf.extra {
                let items =
                    parse_extension_list(extra).map_err(|reason| SetupError::BadExtension {
                        model: key.clone(),
                        entry: extra.clone(),
                        reason,
                    })?;
                parsed.insert(key.as_str(), items);
            }
        }
        let extensions = parsed.remove(family).unwrap_or_default();
        if !extensions.is_empty() {
            debug!("{} extension items retained for {}", extensions.len(), family);
        }

        let sender = SenderClient::new(
            sender_argv,
            target.to_string(),
            host_label.to_string(),
            config.namespace.clone(),
            verbose,
        );

        Ok(Self { plug, sender, cache, model, budget, extensions, now })
    }

    /// Sanitized hardware model resolved at preflight.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Payload line budget of the resolved family.
    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Extension items retained for the resolved model.
    pub fn extensions(&self) -> &[ExtensionItem] {
        &self.extensions
    }

    /// Extracts one catalog metric and pushes it, under `alias` when given.
    pub fn forward(&mut self, name: &str, alias: Option<&str>) -> Result<(), ForwardError> {
        self.check_ready(name)?;
        let metric =
            catalog::find(name).ok_or_else(|| ForwardError::UnknownItem(name.to_string()))?;
        let value = match metric.source {
            Source::Energy { label } => {
                let report = self.cache.energy(&self.plug);
                extract::energy_value(report, label)
            }
            Source::Info => self.info_value(name, metric.transform),
        };
        self.deliver(alias.unwrap_or(name), &value)
    }

    /// Pushes a model-extension field; bypasses the catalog on purpose.
    pub fn forward_field(&mut self, field: &str, alias: Option<&str>) -> Result<(), ForwardError> {
        self.check_ready(field)?;
        let value = self.info_value(field, Transform::None);
        self.deliver(alias.unwrap_or(field), &value)
    }

    /// Full pass: every catalog metric, then the model's extensions.
    ///
    /// Failures are collected, never short-circuited; the report decides the
    /// process exit.
    pub fn run(&mut self) -> RunReport {
        let mut failures = Vec::new();

        for metric in catalog::CATALOG.iter() {
            if let Err(e) = self.forward(metric.name, None) {
                warn!("{} failed: {}", metric.name, e);
                failures
                    .push(RunFailure { item: metric.name.to_string(), error: e.to_string() });
            }
        }

        let extensions = self.extensions.clone();
        for item in &extensions {
            if let Err(e) = self.forward_field(&item.field, item.alias.as_deref()) {
                warn!("{} failed: {}", item.field, e);
                failures.push(RunFailure { item: item.field.clone(), error: e.to_string() });
            }
        }

        RunReport { attempted: catalog::CATALOG.len() + extensions.len(), failures }
    }

    fn info_value(&mut self, field: &str, transform: Transform) -> String {
        let output = self.cache.info(&self.plug);
        let payload = match extract::info_payload(output, self.budget) {
            Some(p) => p,
            None => return String::new(),
        };
        let value = match payload.get(field) {
            Some(v) => v,
            None => return String::new(),
        };
        match transform {
            Transform::None => extract::render_value(value),
            Transform::IconHash => extract::icon_hash(value),
            Transform::LedState => extract::led_state(value),
            Transform::NextActionType => extract::next_action_type(value),
            Transform::PowerOnInstant => match value.as_i64() {
                Some(secs) => extract::power_on_instant(secs, self.now),
                None => String::new(),
            },
        }
    }

    fn check_ready(&self, name: &str) -> Result<(), ForwardError> {
        if name.trim().is_empty() {
            return Err(ForwardError::MissingName);
        }
        if self.plug.host().is_empty() {
            return Err(ForwardError::MissingDevice);
        }
        if self.sender.target().is_empty() {
            return Err(ForwardError::MissingTarget);
        }
        if self.sender.host_label().is_empty() {
            return Err(ForwardError::MissingHostLabel);
        }
        Ok(())
    }

    fn deliver(&self, key: &str, value: &str) -> Result<(), ForwardError> {
        self.sender.send(key, value)?;
        debug!("delivered {} = '{}'", key, value);
        Ok(())
    }
}

/// Outcome of a full pass.
#[derive(Debug)]
pub struct RunReport {
    pub attempted: usize,
    pub failures: Vec<RunFailure>,
}

/// One item that did not land, with the rendered reason.
#[derive(Debug)]
pub struct RunFailure {
    pub item: String,
    pub error: String,
}

impl RunReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// 0 when everything landed, 6 as soon as one item failed.
    pub fn exit_code(&self) -> i32 {
        if self.is_clean() {
            0
        } else {
            6
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use plugwatch_devkit::harness::ENERGY_FIXTURE;
    use plugwatch_devkit::TestHarness;

    const HS100_INFO: &str = "{'sw_ver': '1.0.8 Build 151113', 'hw_ver': '1.0', 'type': 'IOT.SMARTPLUGSWITCH', 'model': 'HS100(EU)', 'mac': '50:C7:BF:00:11:22', 'dev_name': 'Wi-Fi Smart Plug', 'alias': 'kettle', 'relay_state': 1, 'on_time': 3600, 'active_mode': 'none', 'feature': 'TIM', 'updating': 0, 'icon_hash': '', 'rssi': -58, 'led_off': 0, 'latitude': 0, 'longitude': 0, 'hwId': '22603EA5E716DEAEA6642A30BE87AFCA', 'fwId': 'BFF24826FBC561803E49379DBE74FD71', 'deviceId': '800654F32938FCBA8F7327887A386476172D2E4C', 'oemId': '812A90EB2FCF306A993FAD8748024B07', 'next_action': {'type': -1}, 'err_code': 0}";

    fn fixed_now() -> DateTime<Local> {
        Local.with_ymd_and_hms(2021, 6, 15, 12, 0, 0).unwrap()
    }

    fn test_config(harness: &TestHarness) -> Config {
        let mut config = Config::default();
        config.plug_cmd = harness.plug_cmd();
        config.sender_cmd = harness.sender_cmd();
        config
    }

    fn open(harness: &TestHarness) -> Session {
        Session::open(
            &test_config(harness),
            "192.168.0.10",
            "127.0.0.1",
            "office-plug",
            false,
            fixed_now(),
        )
        .unwrap()
    }

    #[test]
    fn extension_lists_parse_fields_and_aliases() {
        let items = parse_extension_list("ntc_state,obd_src").unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0], ExtensionItem { field: "ntc_state".into(), alias: None });

        let items = parse_extension_list("latitude_i:latitude_int, longitude_i:longitude_int")
            .unwrap();
        assert_eq!(items[1].field, "longitude_i");
        assert_eq!(items[1].alias.as_deref(), Some("longitude_int"));
    }

    #[test]
    fn malformed_extension_lists_are_rejected_with_a_reason() {
        assert!(parse_extension_list("").is_err());
        assert!(parse_extension_list("a,,b").is_err());
        assert!(parse_extension_list(":alias").is_err());
        assert!(parse_extension_list("field:").is_err());
        assert!(parse_extension_list("a::b").unwrap_err().contains("more than one"));
    }

    #[test]
    fn family_lookup_prefers_exact_then_longest_prefix() {
        let mut models = BTreeMap::new();
        models.insert("HS1".to_string(), ModelConf { info_lines: 9, extra: None });
        models.insert("HS110".to_string(), ModelConf { info_lines: 2, extra: None });
        models.insert("HS110_EU_".to_string(), ModelConf { info_lines: 3, extra: None });

        let (key, conf) = family_entry(&models, "HS110_EU_").unwrap();
        assert_eq!((key, conf.info_lines), ("HS110_EU_", 3));

        let (key, conf) = family_entry(&models, "HS110_US_").unwrap();
        assert_eq!((key, conf.info_lines), ("HS110", 2));

        assert!(family_entry(&models, "KP405_US_").is_none());
    }

    #[test]
    fn setup_failures_map_to_their_exit_codes() {
        assert_eq!(SetupError::ToolMissing("hs100".into()).exit_code(), 1);
        assert_eq!(SetupError::BadCommandLine("x".into(), "y".into()).exit_code(), 1);
        assert_eq!(SetupError::ModelUnresolved.exit_code(), 5);
        assert_eq!(SetupError::NoLineBudget("KP405".into()).exit_code(), 5);
        let bad = SetupError::BadExtension {
            model: "HS110".into(),
            entry: "a::b".into(),
            reason: "item 'a::b' has more than one ':'".into(),
        };
        assert_eq!(bad.exit_code(), 5);
    }

    #[test]
    fn report_exit_code_is_six_on_any_failure() {
        let clean = RunReport { attempted: 27, failures: vec![] };
        assert!(clean.is_clean());
        assert_eq!(clean.exit_code(), 0);

        let failed = RunReport {
            attempted: 27,
            failures: vec![RunFailure { item: "rssi".into(), error: "sender exited".into() }],
        };
        assert_eq!(failed.exit_code(), 6);
    }

    #[test]
    fn preflight_resolves_model_budget_and_extensions() {
        let harness = TestHarness::new().unwrap();
        let session = open(&harness);

        assert_eq!(session.model(), "HS110_EU_");
        assert_eq!(session.budget(), 2);
        assert_eq!(
            session.extensions(),
            &[
                ExtensionItem { field: "latitude_i".into(), alias: Some("latitude_int".into()) },
                ExtensionItem { field: "longitude_i".into(), alias: Some("longitude_int".into()) },
            ]
        );
        // Preflight costs exactly one info query and touches nothing else.
        assert_eq!(harness.plug.calls_for("info"), 1);
        assert_eq!(harness.plug.calls_for("emeter"), 0);
        assert!(harness.deliveries().is_empty());
    }

    #[test]
    fn sessions_render_their_resolved_context_for_debugging() {
        let harness = TestHarness::new().unwrap();
        let session = open(&harness);

        let rendered = format!("{session:?}");
        assert!(rendered.contains("HS110_EU_"));
        assert!(rendered.contains("latitude_int"));
    }

    #[test]
    fn missing_tool_fails_preflight() {
        let harness = TestHarness::new().unwrap();
        let mut config = test_config(&harness);
        config.plug_cmd = "/nonexistent/plugwatch-no-such-tool".to_string();

        let err = Session::open(&config, "192.168.0.10", "127.0.0.1", "p", false, fixed_now())
            .unwrap_err();
        assert!(matches!(err, SetupError::ToolMissing(_)));
        assert!(harness.plug.calls().is_empty());
    }

    #[test]
    fn unbalanced_command_line_fails_preflight() {
        let harness = TestHarness::new().unwrap();
        let mut config = test_config(&harness);
        config.sender_cmd = "zabbix_sender 'unclosed".to_string();

        let err = Session::open(&config, "192.168.0.10", "127.0.0.1", "p", false, fixed_now())
            .unwrap_err();
        assert!(matches!(err, SetupError::BadCommandLine(..)));
    }

    #[test]
    fn output_without_a_model_fails_preflight() {
        let harness = TestHarness::with_outputs(ENERGY_FIXTURE, "no payload here").unwrap();
        let err = Session::open(
            &test_config(&harness),
            "192.168.0.10",
            "127.0.0.1",
            "p",
            false,
            fixed_now(),
        )
        .unwrap_err();
        assert!(matches!(err, SetupError::ModelUnresolved));
    }

    #[test]
    fn unknown_family_fails_preflight() {
        let info = "{'model': 'KP405(US)', 'err_code': 0}";
        let harness = TestHarness::with_outputs(ENERGY_FIXTURE, info).unwrap();
        let err = Session::open(
            &test_config(&harness),
            "192.168.0.10",
            "127.0.0.1",
            "p",
            false,
            fixed_now(),
        )
        .unwrap_err();
        match err {
            SetupError::NoLineBudget(model) => assert_eq!(model, "KP405_US_"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn any_malformed_extension_entry_stops_the_run_before_metrics() {
        let harness = TestHarness::new().unwrap();
        let mut config = test_config(&harness);
        // The broken entry belongs to a family the device does not even match.
        config.models.insert(
            "ZZ999".to_string(),
            ModelConf { info_lines: 1, extra: Some("watts::w".to_string()) },
        );

        let err = Session::open(&config, "192.168.0.10", "127.0.0.1", "p", false, fixed_now())
            .unwrap_err();
        match err {
            SetupError::BadExtension { model, entry, .. } => {
                assert_eq!(model, "ZZ999");
                assert_eq!(entry, "watts::w");
            }
            other => panic!("unexpected error: {other}"),
        }
        // Only the preflight info query happened; nothing was forwarded.
        assert_eq!(harness.plug.calls_for("info"), 1);
        assert_eq!(harness.plug.calls_for("emeter"), 0);
        assert!(harness.deliveries().is_empty());
    }

    #[test]
    fn full_catalog_run_queries_each_endpoint_once() {
        let harness = TestHarness::with_outputs(ENERGY_FIXTURE, HS100_INFO).unwrap();
        let mut session = open(&harness);

        let report = session.run();
        assert!(report.is_clean());
        assert_eq!(report.attempted, 27);
        assert_eq!(harness.deliveries().len(), 27);
        assert_eq!(harness.plug.calls_for("emeter"), 1);
        assert_eq!(harness.plug.calls_for("info"), 1);

        harness.assert_delivered("voltage", "230.46").unwrap();
        harness.assert_delivered("current", "0.34").unwrap();
        harness.assert_delivered("total", "12.35").unwrap();
        harness.assert_delivered("model", "HS100(EU)").unwrap();
        harness.assert_delivered("relay_state", "1").unwrap();
        harness.assert_delivered("on_time", "15.06.2021 11:00:00").unwrap();
        harness.assert_delivered("icon_hash", "empty").unwrap();
        harness.assert_delivered("led_off", "1").unwrap();
        harness.assert_delivered("next_action", "-1").unwrap();
    }

    #[test]
    fn extensions_run_after_the_catalog_under_their_aliases() {
        let harness = TestHarness::new().unwrap();
        let mut session = open(&harness);

        let report = session.run();
        assert!(report.is_clean());
        assert_eq!(report.attempted, 29);

        let deliveries = harness.deliveries();
        assert_eq!(deliveries.len(), 29);
        assert_eq!(deliveries[27].key().as_deref(), Some("latitude_int"));
        assert_eq!(deliveries[28].key().as_deref(), Some("longitude_int"));
        assert_eq!(harness.delivered_value("latitude_int").as_deref(), Some("520802"));
        assert_eq!(harness.delivered_value("longitude_int").as_deref(), Some("51237"));
        // The extra queries ride on the same two cached outputs.
        assert_eq!(harness.plug.calls_for("info"), 1);
    }

    #[test]
    fn one_rejected_item_does_not_stop_the_run() {
        let harness = TestHarness::with_failing_key(ENERGY_FIXTURE, HS100_INFO, "rssi").unwrap();
        let mut session = open(&harness);

        let report = session.run();
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].item, "rssi");
        assert_eq!(report.exit_code(), 6);
        // Every item was still attempted and recorded by the sender.
        assert_eq!(harness.deliveries().len(), 27);
        harness.assert_delivered("err_code", "0").unwrap();
    }

    #[test]
    fn unreadable_energy_report_forwards_empty_values() {
        let harness = TestHarness::with_outputs("", HS100_INFO).unwrap();
        let mut session = open(&harness);

        let report = session.run();
        assert!(report.is_clean());
        assert_eq!(harness.delivered_value("voltage").as_deref(), Some(""));
        assert_eq!(harness.delivered_value("power").as_deref(), Some(""));
        harness.assert_delivered("alias", "kettle").unwrap();
    }

    #[test]
    fn absurd_on_time_still_lets_the_run_finish() {
        let info = "{'model': 'HS100(EU)', 'on_time': 100000000000000, 'err_code': 0}";
        let harness = TestHarness::with_outputs(ENERGY_FIXTURE, info).unwrap();
        let mut session = open(&harness);

        let report = session.run();
        assert!(report.is_clean());
        // The whole catalog still goes out; only the uptime comes out empty.
        assert_eq!(harness.deliveries().len(), 27);
        assert_eq!(harness.delivered_value("on_time").as_deref(), Some(""));
        harness.assert_delivered("err_code", "0").unwrap();
        harness.assert_delivered("voltage", "230.46").unwrap();
    }

    #[test]
    fn names_outside_the_catalog_are_refused() {
        let harness = TestHarness::new().unwrap();
        let mut session = open(&harness);

        assert!(matches!(session.forward("wattage", None), Err(ForwardError::UnknownItem(_))));
        assert!(matches!(session.forward("", None), Err(ForwardError::MissingName)));
    }

    #[test]
    fn forward_guards_check_session_parameters_in_order() {
        let harness = TestHarness::new().unwrap();
        let config = test_config(&harness);

        let mut no_device =
            Session::open(&config, "", "127.0.0.1", "label", false, fixed_now()).unwrap();
        assert!(matches!(no_device.forward("voltage", None), Err(ForwardError::MissingDevice)));

        let mut no_target =
            Session::open(&config, "192.168.0.10", "", "label", false, fixed_now()).unwrap();
        assert!(matches!(no_target.forward("voltage", None), Err(ForwardError::MissingTarget)));

        let mut no_label =
            Session::open(&config, "192.168.0.10", "127.0.0.1", "", false, fixed_now()).unwrap();
        assert!(matches!(
            no_label.forward("voltage", None),
            Err(ForwardError::MissingHostLabel)
        ));
    }
}
