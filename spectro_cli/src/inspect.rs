//! `eeprom` and `self-check` commands.

use eyre::WrapErr;
use serde_json::json;
use spectro_core::error::Result as CoreResult;
use spectro_core::{DeviceDescriptor, DeviceSession};

pub fn print_descriptor(d: &DeviceDescriptor, json_out: bool) {
    let bad_pixels = d.bad_pixel_indices();
    if json_out {
        let obj = json!({
            "format_version": d.format_version,
            "model": d.model,
            "serial_number": d.serial_number,
            "detector": d.detector_name,
            "pixel_count": d.pixel_count,
            "vertical_pixels": d.vertical_pixels,
            "roi_vert": d.roi_vert,
            "wavecal_coeffs": d.wavecal_coeffs,
            "excitation_nm": d.laser_excitation_nm,
            "has_laser": d.has_laser,
            "has_battery": d.has_battery,
            "feature_mask": d.feature_mask.bits(),
            "integration_ms": [d.min_integration_time_ms, d.max_integration_time_ms],
            "detector_gain": d.detector_gain,
            "laser_warmup_sec": d.laser_warmup_sec,
            "bad_pixels": bad_pixels,
            "intensity_correction_coeffs": d.intensity_correction_coeffs,
        });
        println!("{obj}");
        return;
    }
    println!("Model:        {} (format v{})", d.model, d.format_version);
    println!("Serial:       {}", d.serial_number);
    println!("Detector:     {} ({} px, {} rows)", d.detector_name, d.pixel_count, d.vertical_pixels);
    println!("Vertical ROI: {}..{}", d.roi_vert[0].0, d.roi_vert[0].1);
    println!("Wavecal:      {:?}", d.wavecal_coeffs);
    if d.has_laser {
        println!("Laser:        {:.1} nm, warmup {} s", d.laser_excitation_nm, d.laser_warmup_sec);
    } else {
        println!("Laser:        none");
    }
    println!(
        "Integration:  {}..{} ms, gain {:.2} dB",
        d.min_integration_time_ms, d.max_integration_time_ms, d.detector_gain
    );
    if !bad_pixels.is_empty() {
        println!("Bad pixels:   {bad_pixels:?}");
    }
}

/// Connects (already done by the caller), then exercises the side channels.
pub fn run_self_check(session: &mut DeviceSession, json_out: bool) -> CoreResult<()> {
    let battery = session.poll_battery()?;
    let laser = session
        .engine_mut()
        .laser_mut()
        .refresh()
        .wrap_err("reading laser state")?;
    let d = session.descriptor();
    if json_out {
        let obj = json!({
            "ok": true,
            "model": d.model,
            "serial_number": d.serial_number,
            "battery": battery.map(|b| json!({ "percent": b.percent, "charging": b.charging })),
            "interlock_closed": laser.interlock_closed,
            "laser_active": laser.laser_active,
        });
        println!("{obj}");
        return Ok(());
    }
    println!("Device:   {} {}", d.model, d.serial_number);
    match battery {
        Some(b) => println!(
            "Battery:  {}%{}",
            b.percent,
            if b.charging { " (charging)" } else { "" }
        ),
        None => println!("Battery:  busy, skipped"),
    }
    println!(
        "Interlock: {}",
        if laser.interlock_closed { "closed" } else { "open" }
    );
    println!("Self-check OK");
    Ok(())
}
