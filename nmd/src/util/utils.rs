//! Utility functions for wireless data conversion.
//!
//! Provides helpers for converting between wireless data representations:
//! driver frequencies to GHz, channels to frequencies, raw quality samples
//! to percentages, essid bytes to strings.

use log::warn;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::api::models::{Quality, QualityCalibration, QualityFlags};
use crate::types::constants::{frequency, limits};

/// Logs a failed hardware call and returns `None` from the enclosing function.
macro_rules! try_log {
    ($result:expr, $context:expr) => {
        match $result {
            Ok(value) => value,
            Err(e) => {
                log::warn!("{}: {}", $context, e);
                return None;
            }
        }
    };
}

pub(crate) use try_log;

/// Converts a driver `m * 10^e` frequency to GHz.
///
/// Drivers sometimes report a channel number instead of a frequency; values
/// below 1000 with no exponent are treated as 2.4/5 GHz channel numbers.
pub(crate) fn freq_to_ghz(m: i32, e: i16) -> f64 {
    if e == 0 && (0..1000).contains(&m) {
        return freq_from_channel(m as u16).map_or(0.0, |mhz| f64::from(mhz) / 1000.0);
    }
    f64::from(m) * 10f64.powi(i32::from(e)) / 1e9
}

/// Converts a channel number to its center frequency in MHz.
pub(crate) fn freq_from_channel(channel: u16) -> Option<u32> {
    match u32::from(channel) {
        ch @ 1..=13 => Some(frequency::BAND_2_4_START + (ch - 1) * frequency::CHANNEL_SPACING),
        14 => Some(frequency::BAND_2_4_CH14),
        ch @ 34..=165 => Some(5000 + ch * frequency::CHANNEL_SPACING),
        _ => None,
    }
}

/// Converts a frequency in MHz to a channel number.
///
/// Supports 2.4GHz (channels 1-14) and 5GHz.
/// Returns `None` for frequencies outside known bands.
pub(crate) fn channel_from_freq(mhz: u32) -> Option<u16> {
    match mhz {
        frequency::BAND_2_4_START..=frequency::BAND_2_4_END => {
            Some(((mhz - frequency::BAND_2_4_START) / frequency::CHANNEL_SPACING + 1) as u16)
        }
        frequency::BAND_2_4_CH14 => Some(14),
        frequency::BAND_5_START..=frequency::BAND_5_END => {
            Some(((mhz - 5000) / frequency::CHANNEL_SPACING) as u16)
        }
        _ => None,
    }
}

/// Rounds a GHz value to whole MHz.
pub(crate) fn ghz_to_mhz(ghz: f64) -> u32 {
    (ghz * 1000.0).round().max(0.0) as u32
}

/// Decodes essid bytes as reported by the driver.
///
/// Stops at the first NUL, replaces invalid UTF-8 and control characters,
/// and treats the empty string and the `<hidden>` sentinel as "no essid".
pub(crate) fn sanitize_essid(bytes: &[u8]) -> Option<String> {
    let bytes = &bytes[..bytes.len().min(limits::MAX_ESSID_LEN)];
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    let raw = &bytes[..end];

    let text = match std::str::from_utf8(raw) {
        Ok(s) => s.to_owned(),
        Err(e) => {
            warn!("Invalid UTF-8 in essid: {e}");
            String::from_utf8_lossy(raw).into_owned()
        }
    };
    let text: String = text
        .chars()
        .map(|c| if c.is_control() { '?' } else { c })
        .collect();

    if text.is_empty() || text == limits::HIDDEN_ESSID {
        None
    } else {
        Some(text)
    }
}

/// Converts a quality sample to a 0-100 percentage.
///
/// The quality value is scaled against the card's maximum when it is
/// valid. Otherwise the signal level is used: in dBm mode (card max level
/// of zero) it is placed between noise and a -20 dBm ceiling, in RSSI mode
/// it is scaled against the max level. Returns `None` if neither gives a
/// usable value.
pub(crate) fn qual_to_percent(qual: &Quality, cal: &QualityCalibration) -> Option<u8> {
    let max = &cal.max;
    let mut percent: i32 = -1;
    let mut level_percent: i32 = -1;

    if max.qual != 0 && !qual.updated.contains(QualityFlags::QUAL_INVALID) {
        percent = 100 * i32::from(qual.qual) / i32::from(max.qual);
    }

    let level_valid = !qual.updated.contains(QualityFlags::LEVEL_INVALID);
    if max.level == 0 && level_valid {
        // dBm values come as unsigned bytes offset by 256.
        const MAX_DBM: f64 = -20.0;
        const MIN_DBM: f64 = -90.0;
        let noise_valid = !qual.updated.contains(QualityFlags::NOISE_INVALID);
        let noise = if noise_valid && qual.noise > 0 {
            Some(f64::from(qual.noise) - 256.0)
        } else if !max.updated.contains(QualityFlags::NOISE_INVALID) && max.noise > 0 {
            Some(f64::from(max.noise) - 256.0)
        } else {
            None
        };
        if let Some(noise) = noise {
            let level = (f64::from(qual.level) - 256.0).clamp(MIN_DBM, MAX_DBM);
            let noise = noise.clamp(MIN_DBM, MAX_DBM);
            if MAX_DBM > noise {
                level_percent = (100.0 - 70.0 * ((MAX_DBM - level) / (MAX_DBM - noise))) as i32;
            }
        }
    } else if max.level != 0 && level_valid {
        let level = i32::from(qual.level).min(i32::from(max.level));
        level_percent = 100 * level / i32::from(max.level);
    }

    if percent < 1 && level_percent >= 0 {
        percent = level_percent;
    }
    if percent < 0 {
        None
    } else {
        Some(percent.clamp(0, 100) as u8)
    }
}

/// Decodes an even-length hex string.
pub(crate) fn decode_hex(hex: &str) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok())
        .collect()
}

/// Current wall-clock time in seconds since the epoch.
pub(crate) fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
