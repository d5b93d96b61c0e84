//! Fixed catalog of the metrics every supported plug reports.
//!
//! Each entry names the item key sent downstream, where the raw value comes
//! from (energy report or system info) and which rendering transform applies.
//! Model-specific extras are not listed here; they come from the model table
//! in the configuration and always use the plain system-info path.

/// Where a metric's raw value is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// Scraped from the energy report, from the first line carrying this label.
    Energy { label: &'static str },
    /// Read from the system-info payload under the field named like the metric.
    Info,
}

/// Rendering applied to a raw value before it is forwarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    /// Forward the value as-is.
    None,
    /// An empty icon hash becomes the literal string `empty`.
    IconHash,
    /// The device reports "LED disabled"; dashboards want "LED enabled".
    LedState,
    /// Only the `type` sub-field of the nested schedule object is kept.
    NextActionType,
    /// Seconds-since-power-on becomes the absolute power-on timestamp.
    PowerOnInstant,
}

/// One catalog entry.
#[derive(Debug, Clone, Copy)]
pub struct Metric {
    pub name: &'static str,
    pub source: Source,
    pub transform: Transform,
}

const fn energy(name: &'static str, label: &'static str) -> Metric {
    Metric { name, source: Source::Energy { label }, transform: Transform::None }
}

const fn info(name: &'static str) -> Metric {
    Metric { name, source: Source::Info, transform: Transform::None }
}

const fn info_with(name: &'static str, transform: Transform) -> Metric {
    Metric { name, source: Source::Info, transform }
}

/// Everything a run forwards for every model, in forwarding order.
pub const CATALOG: [Metric; 27] = [
    energy("voltage", "Voltage:"),
    energy("current", "Current:"),
    energy("power", "Power:"),
    energy("total", "Total:"),
    info("sw_ver"),
    info("hw_ver"),
    info("type"),
    info("model"),
    info("mac"),
    info("dev_name"),
    info("alias"),
    info("relay_state"),
    info_with("on_time", Transform::PowerOnInstant),
    info("active_mode"),
    info("feature"),
    info("updating"),
    info_with("icon_hash", Transform::IconHash),
    info("rssi"),
    info_with("led_off", Transform::LedState),
    info("latitude"),
    info("longitude"),
    info("hwId"),
    info("fwId"),
    info("deviceId"),
    info("oemId"),
    info_with("next_action", Transform::NextActionType),
    info("err_code"),
];

/// Looks a metric up by its item key.
pub fn find(name: &str) -> Option<&'static Metric> {
    CATALOG.iter().find(|m| m.name == name)
}
