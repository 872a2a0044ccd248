use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

const FUNCTION_HEATING: u32 = 1 << 6;
const FUNCTION_ENERGY_METER: u32 = 1 << 7;
const FUNCTION_TEMPERATURE: u32 = 1 << 8;
const FUNCTION_SWITCH: u32 = 1 << 9;

/// Thermostat set points above this are the "off" (253) and "on" (254) markers.
const HEATING_MAX_STEP: i32 = 252;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThermostatRecord {
    pub name: String,
    pub current_temperature: Option<f64>,
    /// `None` while the thermostat is switched fully off or on.
    pub target_temperature: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SwitchRecord {
    pub name: String,
    pub on: Option<bool>,
    pub power_watts: Option<f64>,
    pub energy_watt_hours: Option<f64>,
    pub temperature: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HomeData {
    pub thermostats: Vec<ThermostatRecord>,
    pub switches: Vec<SwitchRecord>,
}

#[derive(Debug, Deserialize)]
struct DeviceList {
    #[serde(rename = "device", default)]
    devices: Vec<Device>,
}

#[derive(Debug, Deserialize)]
struct Device {
    #[serde(rename = "@functionbitmask", default)]
    functions: u32,
    #[serde(default)]
    name: String,
    #[serde(default)]
    temperature: Option<Temperature>,
    #[serde(default)]
    hkr: Option<Heating>,
    #[serde(rename = "switch", default)]
    switch: Option<Switch>,
    #[serde(default)]
    powermeter: Option<PowerMeter>,
}

// Readings stay text: unreachable devices report empty elements.

// 0.1 °C steps, offset already applied
#[derive(Debug, Deserialize)]
struct Temperature {
    #[serde(default)]
    celsius: Option<String>,
}

// 0.5 °C steps (44 == 22 °C)
#[derive(Debug, Deserialize)]
struct Heating {
    #[serde(default)]
    tist: Option<String>,
    #[serde(default)]
    tsoll: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Switch {
    #[serde(default)]
    state: String,
}

// power in mW, energy in Wh
#[derive(Debug, Deserialize)]
struct PowerMeter {
    #[serde(default)]
    power: Option<String>,
    #[serde(default)]
    energy: Option<String>,
}

fn reading<T: FromStr>(device: &str, field: &str, raw: Option<&String>) -> Option<T> {
    let raw = raw?.trim();
    if raw.is_empty() {
        warn!(device, field, "no reading, device unreachable?");
        return None;
    }
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(device, field, raw, "unreadable reading");
            None
        }
    }
}

pub(crate) fn parse_device_list(body: &str) -> Result<HomeData, quick_xml::DeError> {
    let list: DeviceList = quick_xml::de::from_str(body)?;
    let mut data = HomeData::default();

    for device in list.devices {
        let name = device.name.as_str();

        if device.functions & FUNCTION_HEATING != 0 {
            if let Some(heating) = &device.hkr {
                data.thermostats.push(ThermostatRecord {
                    name: device.name.clone(),
                    current_temperature: reading::<i32>(name, "tist", heating.tist.as_ref())
                        .map(|step| f64::from(step) * 0.5),
                    target_temperature: reading::<i32>(name, "tsoll", heating.tsoll.as_ref())
                        .filter(|step| *step <= HEATING_MAX_STEP)
                        .map(|step| f64::from(step) * 0.5),
                });
            }
            continue;
        }

        if device.functions & FUNCTION_SWITCH != 0 {
            let metered = device.functions & FUNCTION_ENERGY_METER != 0;
            let meter = device.powermeter.as_ref().filter(|_| metered);
            let sensor = device
                .temperature
                .as_ref()
                .filter(|_| device.functions & FUNCTION_TEMPERATURE != 0);

            data.switches.push(SwitchRecord {
                name: device.name.clone(),
                on: device.switch.as_ref().and_then(|s| match s.state.trim() {
                    "1" => Some(true),
                    "0" => Some(false),
                    _ => None,
                }),
                power_watts: meter
                    .and_then(|m| reading::<u64>(name, "power", m.power.as_ref()))
                    .map(|mw| mw as f64 / 1000.0),
                energy_watt_hours: meter
                    .and_then(|m| reading::<u64>(name, "energy", m.energy.as_ref()))
                    .map(|wh| wh as f64),
                temperature: sensor
                    .and_then(|t| reading::<i32>(name, "celsius", t.celsius.as_ref()))
                    .map(|c| f64::from(c) / 10.0),
            });
        }
    }

    Ok(data)
}
