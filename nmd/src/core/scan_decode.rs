//! Decoder for wireless-extension scan result streams.
//!
//! A scan result is a sequence of events, each a little-endian
//! `len: u16, cmd: u16` header followed by a command-specific payload.
//! `SIOCGIWAP` opens a new access point record; every other recognised
//! event refines the record currently open. Events are processed strictly
//! in stream order.

use log::{debug, warn};

use crate::api::models::{
    AccessPoint, AuthMethod, MacAddr, NetworkMode, Quality, QualityCalibration, QualityFlags,
    ScanError,
};
use crate::types::constants::{encode_flags, ie, limits, wext_cmd, wext_layout, wext_mode};
use crate::util::utils::{decode_hex, freq_to_ghz, qual_to_percent, sanitize_essid};

/// Decodes a raw scan buffer into access points, in the order they appear.
///
/// A buffer with an event that overruns it, or an event too short for its
/// payload, is rejected as a whole.
pub(crate) fn parse_scan_results(
    buf: &[u8],
    calibration: &QualityCalibration,
) -> Result<Vec<AccessPoint>, ScanError> {
    let mut aps = Vec::new();
    let mut current: Option<AccessPoint> = None;
    let mut offset = 0;

    while offset + wext_layout::EVENT_HEADER_LEN <= buf.len() {
        let len = usize::from(read_u16(buf, offset));
        let cmd = read_u16(buf, offset + 2);
        if len <= wext_layout::EVENT_HEADER_LEN {
            break;
        }
        if offset + len > buf.len() {
            return Err(ScanError::Truncated { offset, len });
        }
        let payload = &buf[offset + wext_layout::EVENT_HEADER_LEN..offset + len];
        let malformed = ScanError::Malformed { cmd, offset };

        match cmd {
            wext_cmd::SIOCGIWAP => {
                let start = wext_layout::SOCKADDR_FAMILY_LEN;
                let bytes: [u8; 6] = payload
                    .get(start..start + 6)
                    .and_then(|b| b.try_into().ok())
                    .ok_or(malformed)?;
                if let Some(done) = current.replace(AccessPoint::new(MacAddr(bytes))) {
                    aps.push(done);
                }
            }
            wext_cmd::SIOCGIWMODE => {
                let mode = payload
                    .get(..wext_layout::MODE_PAYLOAD_LEN)
                    .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                    .ok_or(malformed)?;
                if let Some(ap) = current.as_mut() {
                    match mode {
                        wext_mode::ADHOC => ap.mode = NetworkMode::AdHoc,
                        wext_mode::INFRA | wext_mode::MASTER => {
                            ap.mode = NetworkMode::Infrastructure
                        }
                        other => debug!("Ignoring unknown scan mode {other}"),
                    }
                }
            }
            wext_cmd::SIOCGIWESSID => {
                let (length, flags, data) = point(payload).ok_or(malformed)?;
                if let Some(ap) = current.as_mut()
                    && flags != 0
                    && length > 0
                    && length <= limits::MAX_ESSID_LEN
                {
                    let data = data.get(..length).ok_or(malformed)?;
                    ap.essid = sanitize_essid(data);
                }
            }
            wext_cmd::SIOCGIWFREQ => {
                let b = payload
                    .get(..wext_layout::FREQ_PAYLOAD_LEN)
                    .ok_or(malformed)?;
                let m = i32::from_le_bytes([b[0], b[1], b[2], b[3]]);
                let e = i16::from_le_bytes([b[4], b[5]]);
                if let Some(ap) = current.as_mut() {
                    ap.frequency = freq_to_ghz(m, e);
                }
            }
            wext_cmd::IWEVQUAL => {
                let b = payload
                    .get(..wext_layout::QUAL_PAYLOAD_LEN)
                    .ok_or(malformed)?;
                let sample = Quality {
                    qual: b[0],
                    level: b[1],
                    noise: b[2],
                    updated: QualityFlags::from_bits_truncate(b[3]),
                };
                if let Some(ap) = current.as_mut() {
                    ap.strength = qual_to_percent(&sample, calibration).unwrap_or(0);
                }
            }
            wext_cmd::SIOCGIWENCODE => {
                let (_, flags, _) = point(payload).ok_or(malformed)?;
                if let Some(ap) = current.as_mut()
                    && flags & encode_flags::DISABLED == 0
                {
                    ap.encrypted = true;
                    ap.auth_method = AuthMethod::OpenSystem;
                }
            }
            wext_cmd::IWEVGENIE => {
                let (length, _, data) = point(payload).ok_or(malformed)?;
                let data = data.get(..length).ok_or(malformed)?;
                if let Some(ap) = current.as_mut() {
                    apply_generic_ies(ap, data);
                }
            }
            wext_cmd::IWEVCUSTOM => {
                let (length, _, data) = point(payload).ok_or(malformed)?;
                let data = data.get(..length).ok_or(malformed)?;
                if let Some(ap) = current.as_mut() {
                    apply_custom_ie(ap, data);
                }
            }
            _ => {}
        }

        offset += len;
    }

    if let Some(done) = current {
        aps.push(done);
    }
    Ok(aps)
}

fn read_u16(buf: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([buf[offset], buf[offset + 1]])
}

/// Splits a point payload into its declared length, flags and data.
fn point(payload: &[u8]) -> Option<(usize, u16, &[u8])> {
    if payload.len() < wext_layout::POINT_HEADER_LEN {
        return None;
    }
    let length = usize::from(read_u16(payload, 0));
    let flags = read_u16(payload, 2);
    Some((length, flags, &payload[wext_layout::POINT_HEADER_LEN..]))
}

/// Walks a run of information elements, keeping WPA and RSN ones.
fn apply_generic_ies(ap: &mut AccessPoint, data: &[u8]) {
    let mut pos = 0;
    while pos + 2 <= data.len() {
        let ie_len = usize::from(data[pos + 1]) + 2;
        if pos + ie_len > data.len() {
            break;
        }
        let element = &data[pos..pos + ie_len];
        if ie_len <= ie::MAX_WPA_IE_LEN {
            match element[0] {
                ie::WPA_TAG if element.get(2..6) == Some(&ie::WPA_OUI[..]) => {
                    ap.wpa_ie = Some(element.to_vec());
                }
                ie::RSN_TAG => ap.rsn_ie = Some(element.to_vec()),
                _ => {}
            }
        }
        pos += ie_len;
    }
}

/// Handles the `wpa_ie=<hex>` / `rsn_ie=<hex>` text some drivers emit.
fn apply_custom_ie(ap: &mut AccessPoint, data: &[u8]) {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let (slot, hex) = if let Some(hex) = text.strip_prefix(ie::CUSTOM_WPA_PREFIX) {
        (&mut ap.wpa_ie, hex)
    } else if let Some(hex) = text.strip_prefix(ie::CUSTOM_RSN_PREFIX) {
        (&mut ap.rsn_ie, hex)
    } else {
        return;
    };
    let hex = hex.trim_end_matches('\0');
    match decode_hex(hex) {
        Some(bytes) if bytes.len() <= ie::MAX_WPA_IE_LEN => *slot = Some(bytes),
        Some(bytes) => debug!("Skipping oversized IE ({} bytes)", bytes.len()),
        None => warn!("Skipping malformed custom IE"),
    }
}
