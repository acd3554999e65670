use cpal::traits::{DeviceTrait, HostTrait};
use cpal::Device;

fn host() -> cpal::Host {
    cpal::default_host()
}

/// Picks the named input device, or the host default when no name is given.
pub fn get_or_default_input(device_name: Option<&str>) -> anyhow::Result<Device> {
    let host = host();
    tracing::debug!("host: {:?}", host.id());
    match device_name {
        None => host
            .default_input_device()
            .ok_or_else(|| anyhow::anyhow!("no default input device")),
        Some(target) => host
            .input_devices()?
            .find(|d| d.name().is_ok_and(|name| name == target))
            .ok_or_else(|| anyhow::anyhow!("input device {:?} not found", target)),
    }
}

/// Picks the named output device, or the host default when no name is given.
pub fn get_or_default_output(device_name: Option<&str>) -> anyhow::Result<Device> {
    let host = host();
    match device_name {
        None => host
            .default_output_device()
            .ok_or_else(|| anyhow::anyhow!("no default output device")),
        Some(target) => host
            .output_devices()?
            .find(|d| d.name().is_ok_and(|name| name == target))
            .ok_or_else(|| anyhow::anyhow!("output device {:?} not found", target)),
    }
}

pub fn list_inputs() -> anyhow::Result<String> {
    let host = host();
    let default = host.default_input_device().and_then(|d| d.name().ok());
    let mut lines: Vec<String> = Vec::new();
    for device in host.input_devices()? {
        let name = device.name()?;
        let cfg = device.default_input_config()?;
        let mut line = format!(" * {}({}ch, {}hz)", name, cfg.channels(), cfg.sample_rate().0);
        if Some(&name) == default.as_ref() {
            line.push_str(" [default]");
        }
        lines.push(line);
    }
    Ok(lines.join("\n"))
}

pub fn list_outputs() -> anyhow::Result<String> {
    let host = host();
    let default = host.default_output_device().and_then(|d| d.name().ok());
    let mut lines: Vec<String> = Vec::new();
    for device in host.output_devices()? {
        let name = device.name()?;
        let cfg = device.default_output_config()?;
        let mut line = format!(" * {}({}ch, {}hz)", name, cfg.channels(), cfg.sample_rate().0);
        if Some(&name) == default.as_ref() {
            line.push_str(" [default]");
        }
        lines.push(line);
    }
    Ok(lines.join("\n"))
}
