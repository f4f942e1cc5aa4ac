//! Outgoing message templates.
//!
//! Readings go out as short display-friendly text (the receiving nodes show
//! them on small OLED screens, so three short lines is the norm). Operators
//! pick a template by name in the config; placeholders are substituted here.
//!
//! Supported placeholders: `{date}`, `{time}`, `{time_detail}`, `{online}`,
//! `{total}`, `{temp}`, `{humidity}`, `{snr}`, `{hops}`. Signal fields render
//! as `--` when the mesh has no data for the target yet.

use std::collections::HashMap;

use chrono::{DateTime, Local};

pub const DEFAULT_TEMPLATE_NAME: &str = "template1";
pub const DEFAULT_TEMPLATE: &str =
    "{date} {time} ({online}/{total})\nT: {temp}F {snr} snr/{hops} hop\nH: {humidity}% {time_detail}";

/// One sensor reading, already unit-converted by the (external) sensor glue.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub temperature_f: f64,
    pub humidity: f64,
}

/// Everything a template can reference besides the reading itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct RenderContext {
    pub online_nodes: Option<u32>,
    pub total_nodes: Option<u32>,
    /// SNR toward the (first) target, if the mesh has heard it.
    pub snr: Option<f32>,
    pub hops: Option<u32>,
}

/// Named template table with an operator-selected default.
#[derive(Debug, Clone)]
pub struct Templates {
    templates: HashMap<String, String>,
    selected: String,
}

impl Templates {
    pub fn new(mut templates: HashMap<String, String>, selected: &str) -> Self {
        templates
            .entry(DEFAULT_TEMPLATE_NAME.to_string())
            .or_insert_with(|| DEFAULT_TEMPLATE.to_string());
        let selected = if templates.contains_key(selected) {
            selected.to_string()
        } else {
            log::warn!(
                "message template '{}' not configured, using '{}'",
                selected,
                DEFAULT_TEMPLATE_NAME
            );
            DEFAULT_TEMPLATE_NAME.to_string()
        };
        Self {
            templates,
            selected,
        }
    }

    pub fn selected_name(&self) -> &str {
        &self.selected
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.templates.keys().map(|k| k.as_str())
    }

    /// Render the selected template for one reading at the given local time.
    pub fn render(&self, reading: &Reading, ctx: &RenderContext, now: DateTime<Local>) -> String {
        let template = self
            .templates
            .get(&self.selected)
            .map(|s| s.as_str())
            .unwrap_or(DEFAULT_TEMPLATE);
        render_with(template, reading, ctx, now)
    }
}

impl Default for Templates {
    fn default() -> Self {
        Self::new(HashMap::new(), DEFAULT_TEMPLATE_NAME)
    }
}

fn render_with(
    template: &str,
    reading: &Reading,
    ctx: &RenderContext,
    now: DateTime<Local>,
) -> String {
    let snr = match ctx.snr {
        Some(v) => format!("{:.1}", v),
        None => "--".to_string(),
    };
    let hops = match ctx.hops {
        Some(h) => h.to_string(),
        None => "--".to_string(),
    };
    template
        .replace("{date}", &now.format("%m/%d").to_string())
        .replace("{time_detail}", &now.format("%H:%M:%S").to_string())
        .replace("{time}", &now.format("%H:%M").to_string())
        .replace("{online}", &ctx.online_nodes.unwrap_or(0).to_string())
        .replace("{total}", &ctx.total_nodes.unwrap_or(0).to_string())
        .replace("{temp}", &(reading.temperature_f as i64).to_string())
        .replace("{humidity}", &(reading.humidity as i64).to_string())
        .replace("{snr}", &snr)
        .replace("{hops}", &hops)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at_noon() -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 7, 21, 12, 30, 45).unwrap()
    }

    #[test]
    fn default_template_renders_all_fields() {
        let t = Templates::default();
        let out = t.render(
            &Reading {
                temperature_f: 81.4,
                humidity: 29.9,
            },
            &RenderContext {
                online_nodes: Some(5),
                total_nodes: Some(114),
                snr: Some(-8.25),
                hops: Some(2),
            },
            at_noon(),
        );
        assert_eq!(out, "07/21 12:30 (5/114)\nT: 81F -8.2 snr/2 hop\nH: 29% 12:30:45");
    }

    #[test]
    fn missing_signal_renders_dashes() {
        let t = Templates::default();
        let out = t.render(
            &Reading {
                temperature_f: 70.0,
                humidity: 50.0,
            },
            &RenderContext::default(),
            at_noon(),
        );
        assert!(out.contains("-- snr/-- hop"));
        assert!(out.contains("(0/0)"));
    }

    #[test]
    fn unknown_selection_falls_back_to_default() {
        let mut map = HashMap::new();
        map.insert("short".to_string(), "T:{temp} H:{humidity}".to_string());
        let t = Templates::new(map, "nonexistent");
        assert_eq!(t.selected_name(), DEFAULT_TEMPLATE_NAME);
    }

    #[test]
    fn custom_template_selected() {
        let mut map = HashMap::new();
        map.insert("short".to_string(), "T:{temp} H:{humidity}".to_string());
        let t = Templates::new(map, "short");
        let out = t.render(
            &Reading {
                temperature_f: 68.9,
                humidity: 41.2,
            },
            &RenderContext::default(),
            at_noon(),
        );
        assert_eq!(out, "T:68 H:41");
    }
}
