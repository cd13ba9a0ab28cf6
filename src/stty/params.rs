//! Translation from abstract serial configuration to ordered stty directives.
//!
//! A directive is one stty instruction string ("cs8", "min 10", "-parenb").
//! The ordering produced by [`full_params`] is significant: `sane` resets
//! everything stty knows about, so it must come before the raw-mode
//! composite, which in turn clobbers enough flags that all explicitly-set
//! fields must be re-applied after it.

use crate::config::{ConfigField, Handshake, Parity, SerialConfig, StopBits};

use super::{Result, SttyError};

/// Composite reset directive. `sane` sets cread, icrnl, onlcr, isig,
/// icanon, echo and friends back to their defaults, along with the special
/// characters.
pub fn sane_param() -> String {
    "sane".to_string()
}

/// The `[-]drain` prefix directive, controlling whether stty flushes
/// pending output before touching the device.
pub fn drain_param(enabled: bool) -> String {
    if enabled { "drain" } else { "-drain" }.to_string()
}

/// Raw-mode composite.
///
/// `raw` alone does not get the tty anywhere near a byte-in byte-out
/// serial socket, so enabling it also strips echo variants, the
/// hangup-on-close behaviour and extended input processing.
pub fn raw_mode_params(enabled: bool) -> Vec<String> {
    if enabled {
        [
            // raw is a composite that clears icanon, isig, opost, ixon and
            // the input translations, and sets min 1 time 0
            "raw",
            // don't send a hangup signal when the last process closes the tty
            "-hupcl",
            // disable modem control signals
            "clocal",
            // don't enable non-POSIX special characters
            "-iexten",
            "-echo",
            "-echoe",
            "-echok",
            "-echonl",
            "-echoprt",
            "-echoctl",
            "-echoke",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    } else {
        vec!["-raw".to_string()]
    }
}

pub fn baud_param(baud_rate: u32) -> String {
    format!("{}", baud_rate)
}

pub fn min_bytes_param(byte_count: u32) -> String {
    format!("min {}", byte_count)
}

/// Read timeout directive. stty takes the timeout in tenths of a second,
/// so the millisecond value is rounded to the nearest decisecond.
pub fn read_timeout_param(timeout_ms: u32) -> String {
    format!("time {}", (timeout_ms + 50) / 100)
}

pub fn data_bits_param(data_bits: u8) -> Result<String> {
    if !(5..=8).contains(&data_bits) {
        return Err(SttyError::InvalidDataBits(data_bits));
    }
    Ok(format!("cs{}", data_bits))
}

pub fn stop_bits_param(stop_bits: StopBits) -> Result<String> {
    match stop_bits {
        StopBits::One => Ok("-cstopb".to_string()),
        StopBits::Two => Ok("cstopb".to_string()),
        StopBits::None | StopBits::OnePointFive => Err(SttyError::InvalidStopBits(stop_bits)),
    }
}

/// Handshake maps to one hardware flow-control flag (crtscts) and a pair
/// of software flow-control flags (ixoff/ixon).
pub fn handshake_params(handshake: Handshake) -> Vec<String> {
    let params: [&str; 3] = match handshake {
        Handshake::None => ["-crtscts", "-ixoff", "-ixon"],
        Handshake::RequestToSend => ["crtscts", "-ixoff", "-ixon"],
        Handshake::XOnXOff => ["-crtscts", "ixoff", "ixon"],
        Handshake::RequestToSendXOnXOff => ["crtscts", "ixoff", "ixon"],
    };
    params.iter().map(|s| s.to_string()).collect()
}

/// Parity maps to a parity-enable flag (parenb), a mark/space flag
/// (cmspar) and an odd/even flag (parodd).
pub fn parity_params(parity: Parity) -> Vec<String> {
    let params: &[&str] = match parity {
        Parity::None => &["-parenb", "-cmspar"],
        Parity::Odd => &["parenb", "-cmspar", "parodd"],
        Parity::Even => &["parenb", "-cmspar", "-parodd"],
        Parity::Mark => &["-parenb", "cmspar", "parodd"],
        Parity::Space => &["-parenb", "cmspar", "-parodd"],
    };
    params.iter().map(|s| s.to_string()).collect()
}

/// Prefix directives that go in front of every stty invocation.
fn prefix_params(config: &SerialConfig) -> Vec<String> {
    match config.drain {
        Some(enabled) => vec![drain_param(enabled)],
        None => Vec::new(),
    }
}

/// Directive sequence for a full apply: used when the port is opened, and
/// again after a raw-mode toggle since the composite clobbers other flags.
///
/// Fields that were never explicitly set are omitted entirely.
pub fn full_params(config: &SerialConfig) -> Result<Vec<String>> {
    let mut params = prefix_params(config);

    // Start with sane to reset any previous state.
    params.push(sane_param());
    params.extend(raw_mode_params(config.raw_mode));

    if let Some(baud) = config.baud_rate {
        params.push(baud_param(baud));
    }
    if let Some(min) = config.min_bytes_to_read {
        params.push(min_bytes_param(min));
    }
    if let Some(timeout) = config.read_timeout_ms {
        params.push(read_timeout_param(timeout));
    }
    if let Some(bits) = config.data_bits {
        params.push(data_bits_param(bits)?);
    }
    if let Some(stop) = config.stop_bits {
        params.push(stop_bits_param(stop)?);
    }
    if let Some(handshake) = config.handshake {
        params.extend(handshake_params(handshake));
    }
    if let Some(parity) = config.parity {
        params.extend(parity_params(parity));
    }

    Ok(params)
}

/// Directive sequence for re-applying a single changed field on an open
/// port. Skips `sane` and the raw composite so unrelated terminal state
/// is preserved.
///
/// Raw-mode changes cannot be applied in isolation; [`field_params`]
/// returns the full sequence for them, because the composite directive
/// overwrites other flags and everything must be re-committed on top.
pub fn field_params(config: &SerialConfig, field: ConfigField) -> Result<Vec<String>> {
    if matches!(field, ConfigField::RawMode) {
        let mut params = prefix_params(config);
        params.extend(raw_mode_params(config.raw_mode));
        params.extend(full_params(config)?);
        return Ok(params);
    }

    let mut params = prefix_params(config);
    match field {
        ConfigField::BaudRate => {
            if let Some(baud) = config.baud_rate {
                params.push(baud_param(baud));
            }
        }
        ConfigField::MinBytesToRead => {
            if let Some(min) = config.min_bytes_to_read {
                params.push(min_bytes_param(min));
            }
        }
        ConfigField::ReadTimeout => {
            if let Some(timeout) = config.read_timeout_ms {
                params.push(read_timeout_param(timeout));
            }
        }
        ConfigField::DataBits => {
            if let Some(bits) = config.data_bits {
                params.push(data_bits_param(bits)?);
            }
        }
        ConfigField::StopBits => {
            if let Some(stop) = config.stop_bits {
                params.push(stop_bits_param(stop)?);
            }
        }
        ConfigField::Handshake => {
            if let Some(handshake) = config.handshake {
                params.extend(handshake_params(handshake));
            }
        }
        ConfigField::Parity => {
            if let Some(parity) = config.parity {
                params.extend(parity_params(parity));
            }
        }
        // Drain is a prefix, already included above.
        ConfigField::Drain => {}
        ConfigField::RawMode => unreachable!(),
    }

    Ok(params)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_bits_in_range_emit_single_cs_directive() {
        for bits in 5..=8u8 {
            let param = data_bits_param(bits).expect("valid data bits");
            assert_eq!(param, format!("cs{}", bits));
        }
    }

    #[test]
    fn data_bits_out_of_range_are_rejected() {
        for bits in [0u8, 4, 9, 12] {
            assert!(matches!(
                data_bits_param(bits),
                Err(SttyError::InvalidDataBits(b)) if b == bits
            ));
        }
    }

    #[test]
    fn stop_bits_mapping() {
        assert_eq!(stop_bits_param(StopBits::One).unwrap(), "-cstopb");
        assert_eq!(stop_bits_param(StopBits::Two).unwrap(), "cstopb");
        assert!(matches!(
            stop_bits_param(StopBits::None),
            Err(SttyError::InvalidStopBits(StopBits::None))
        ));
        assert!(matches!(
            stop_bits_param(StopBits::OnePointFive),
            Err(SttyError::InvalidStopBits(StopBits::OnePointFive))
        ));
    }

    #[test]
    fn handshake_none_is_stable() {
        let expected = vec!["-crtscts", "-ixoff", "-ixon"];
        for _ in 0..3 {
            assert_eq!(handshake_params(Handshake::None), expected);
        }
    }

    #[test]
    fn handshake_mappings() {
        assert_eq!(
            handshake_params(Handshake::RequestToSend),
            vec!["crtscts", "-ixoff", "-ixon"]
        );
        assert_eq!(
            handshake_params(Handshake::XOnXOff),
            vec!["-crtscts", "ixoff", "ixon"]
        );
        assert_eq!(
            handshake_params(Handshake::RequestToSendXOnXOff),
            vec!["crtscts", "ixoff", "ixon"]
        );
    }

    #[test]
    fn parity_mappings() {
        assert_eq!(parity_params(Parity::None), vec!["-parenb", "-cmspar"]);
        assert_eq!(parity_params(Parity::Odd), vec!["parenb", "-cmspar", "parodd"]);
        assert_eq!(parity_params(Parity::Even), vec!["parenb", "-cmspar", "-parodd"]);
        assert_eq!(parity_params(Parity::Mark), vec!["-parenb", "cmspar", "parodd"]);
        assert_eq!(parity_params(Parity::Space), vec!["-parenb", "cmspar", "-parodd"]);
    }

    #[test]
    fn read_timeout_rounds_to_nearest_decisecond() {
        assert_eq!(read_timeout_param(0), "time 0");
        assert_eq!(read_timeout_param(49), "time 0");
        assert_eq!(read_timeout_param(50), "time 1");
        assert_eq!(read_timeout_param(100), "time 1");
        assert_eq!(read_timeout_param(149), "time 1");
        assert_eq!(read_timeout_param(150), "time 2");
        assert_eq!(read_timeout_param(2000), "time 20");
    }

    #[test]
    fn full_params_order_and_determinism() {
        let config = SerialConfig {
            baud_rate: Some(115200),
            data_bits: Some(8),
            stop_bits: Some(StopBits::One),
            parity: Some(Parity::Even),
            handshake: Some(Handshake::None),
            raw_mode: true,
            drain: Some(false),
            min_bytes_to_read: Some(0),
            read_timeout_ms: Some(100),
        };

        let first = full_params(&config).expect("valid config");
        let second = full_params(&config).expect("valid config");
        assert_eq!(first, second, "translation must be deterministic");

        // Prefix, reset and raw composite lead the sequence.
        assert_eq!(first[0], "-drain");
        assert_eq!(first[1], "sane");
        assert_eq!(first[2], "raw");

        // Field directives follow in declaration order after the composite.
        let tail: Vec<&str> = first.iter().map(String::as_str).collect();
        let baud_at = tail.iter().position(|p| *p == "115200").unwrap();
        let min_at = tail.iter().position(|p| *p == "min 0").unwrap();
        let time_at = tail.iter().position(|p| *p == "time 1").unwrap();
        let cs_at = tail.iter().position(|p| *p == "cs8").unwrap();
        let stop_at = tail.iter().position(|p| *p == "-cstopb").unwrap();
        assert!(baud_at < min_at && min_at < time_at && time_at < cs_at && cs_at < stop_at);
    }

    #[test]
    fn unset_fields_are_never_applied() {
        let config = SerialConfig {
            baud_rate: Some(9600),
            ..SerialConfig::default()
        };

        let params = full_params(&config).expect("valid config");
        assert!(params.contains(&"9600".to_string()));
        assert!(!params.iter().any(|p| p.starts_with("cs")));
        assert!(!params.iter().any(|p| p.starts_with("min")));
        assert!(!params.iter().any(|p| p.starts_with("time")));
        assert!(!params.iter().any(|p| p.contains("parenb")));
        // Drain is unset, so neither form appears.
        assert!(!params.iter().any(|p| p.ends_with("drain")));
    }

    #[test]
    fn raw_mode_disabled_emits_single_inverse() {
        let config = SerialConfig {
            raw_mode: false,
            ..SerialConfig::default()
        };
        let params = full_params(&config).unwrap();
        assert_eq!(params, vec!["sane", "-raw"]);
    }

    #[test]
    fn single_field_apply_skips_reset_and_raw() {
        let config = SerialConfig {
            baud_rate: Some(57600),
            data_bits: Some(7),
            drain: Some(false),
            ..SerialConfig::default()
        };

        let params = field_params(&config, ConfigField::BaudRate).unwrap();
        assert_eq!(params, vec!["-drain", "57600"]);
        assert!(!params.contains(&"sane".to_string()));
    }

    #[test]
    fn raw_mode_field_triggers_full_reapply() {
        let config = SerialConfig {
            baud_rate: Some(19200),
            ..SerialConfig::default()
        };

        let params = field_params(&config, ConfigField::RawMode).unwrap();
        // The raw composite leads, then the full set is re-committed on top.
        assert_eq!(params[0], "raw");
        assert!(params.contains(&"sane".to_string()));
        assert!(params.contains(&"19200".to_string()));
    }
}
