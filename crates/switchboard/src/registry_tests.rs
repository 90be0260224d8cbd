// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::model::Function;

struct Weather {
    units: &'static str,
}

impl Capability for Weather {
    fn describe() -> PluginDescriptor {
        PluginDescriptor::new("Weather")
            .unique_name("Acme.Weather")
            .description("Current conditions")
            .function(
                FunctionDescriptor::new("forecast")
                    .description("Forecast for a city")
                    .input("city", "string", "City name")
                    .returns("string", "Summary"),
            )
            .function(FunctionDescriptor::new("alerts").input("region", "string", ""))
    }
}

struct Clock;

impl Capability for Clock {
    fn describe() -> PluginDescriptor {
        PluginDescriptor::new("Clock").function(FunctionDescriptor::new("now"))
    }
}

fn canonical_weather() -> Plugin {
    Plugin {
        id: Some("p-weather".into()),
        unique_name: Some("Acme.Weather".into()),
        name: "Weather".into(),
        description: String::new(),
        functions: vec![
            Function { id: Some("f-forecast".into()), name: "forecast".into(), ..Default::default() },
            Function { id: Some("f-extra".into()), name: "extra".into(), ..Default::default() },
        ],
    }
}

// ── registration ──────────────────────────────────────────────────────────

#[test]
fn describes_functions_with_result_output() -> anyhow::Result<()> {
    let mut registry = CapabilityRegistry::new();
    let plugin = registry.add_plugin(Weather { units: "metric" })?;
    assert_eq!(plugin.unique_name.as_deref(), Some("Acme.Weather"));
    assert_eq!(plugin.functions.len(), 2);
    let forecast = plugin.function("forecast").ok_or_else(|| anyhow::anyhow!("no forecast"))?;
    assert_eq!(forecast.inputs[0].name, "city");
    assert_eq!(forecast.outputs.len(), 1);
    assert_eq!(forecast.outputs[0].name, RESULT_OUTPUT);
    Ok(())
}

#[test]
fn type_path_is_default_unique_name() -> anyhow::Result<()> {
    let mut registry = CapabilityRegistry::new();
    let plugin = registry.add_plugin_from_type::<Clock>()?;
    let unique = plugin.unique_name.clone().unwrap_or_default();
    assert!(unique.ends_with(".Clock"), "{unique}");
    assert!(!unique.contains("::"));
    Ok(())
}

#[test]
fn duplicate_registration_rejected() -> anyhow::Result<()> {
    let mut registry = CapabilityRegistry::new();
    registry.add_plugin(Weather { units: "metric" })?;
    let err = registry.add_plugin_from_type::<Weather>();
    assert!(matches!(err, Err(Error::DuplicateCapability(ref name)) if name == "Acme.Weather"));
    assert_eq!(registry.plugins().len(), 1);
    Ok(())
}

#[test]
fn instance_lookup_by_type() -> anyhow::Result<()> {
    let mut registry = CapabilityRegistry::new();
    registry.add_plugin(Weather { units: "imperial" })?;
    registry.add_plugin_from_type::<Clock>()?;
    let weather = registry.instance::<Weather>().ok_or_else(|| anyhow::anyhow!("missing"))?;
    assert_eq!(weather.units, "imperial");
    assert!(registry.instance::<Clock>().is_none());
    Ok(())
}

#[test]
fn runtime_descriptor_uses_name_as_unique() -> anyhow::Result<()> {
    let mut registry = CapabilityRegistry::new();
    registry.add_descriptor(PluginDescriptor::new("Notes"))?;
    assert!(registry.plugin("Notes").is_some());
    assert!(registry.add_descriptor(PluginDescriptor::new("Notes")).is_err());
    Ok(())
}

// ── reconcile ─────────────────────────────────────────────────────────────

#[test]
fn empty_canonical_list_changes_nothing() -> anyhow::Result<()> {
    let mut registry = CapabilityRegistry::new();
    registry.add_plugin_from_type::<Weather>()?;
    let before = registry.plugins().to_vec();
    assert_eq!(registry.reconcile(&[]), Reconciliation::default());
    assert_eq!(registry.plugins(), before.as_slice());
    Ok(())
}

#[test]
fn match_assigns_ids_without_adding_functions() -> anyhow::Result<()> {
    let mut registry = CapabilityRegistry::new();
    registry.add_plugin_from_type::<Weather>()?;
    let outcome = registry.reconcile(&[canonical_weather()]);
    assert_eq!(outcome, Reconciliation { matched: 1, adopted: 0, functions_resolved: 1 });

    let plugin = registry.plugin("Acme.Weather").ok_or_else(|| anyhow::anyhow!("missing"))?;
    assert_eq!(plugin.id.as_deref(), Some("p-weather"));
    assert_eq!(plugin.function("forecast").and_then(|f| f.id.as_deref()), Some("f-forecast"));
    assert_eq!(plugin.function("alerts").and_then(|f| f.id.as_deref()), None);
    assert!(plugin.function("extra").is_none());
    Ok(())
}

#[test]
fn match_falls_back_to_display_name() -> anyhow::Result<()> {
    let mut registry = CapabilityRegistry::new();
    registry.add_plugin_from_type::<Clock>()?;
    let remote = Plugin { id: Some("p-clock".into()), name: "Clock".into(), ..Default::default() };
    registry.reconcile(&[remote]);
    assert_eq!(registry.plugins().len(), 1);
    assert_eq!(registry.plugins()[0].id.as_deref(), Some("p-clock"));
    Ok(())
}

#[test]
fn unknown_plugin_adopted() {
    let mut registry = CapabilityRegistry::new();
    let outcome = registry.reconcile(&[canonical_weather()]);
    assert_eq!(outcome.adopted, 1);
    assert_eq!(registry.plugins(), &[canonical_weather()]);
}

#[test]
fn reconcile_is_idempotent() -> anyhow::Result<()> {
    let mut registry = CapabilityRegistry::new();
    registry.add_plugin_from_type::<Weather>()?;
    let remote = vec![canonical_weather(), Plugin { id: Some("p-x".into()), name: "X".into(), ..Default::default() }];
    registry.reconcile(&remote);
    let once = registry.plugins().to_vec();
    registry.reconcile(&remote);
    assert_eq!(registry.plugins(), once.as_slice());
    Ok(())
}
