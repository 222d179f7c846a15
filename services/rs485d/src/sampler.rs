//! Thickness sensor sampling
//!
//! One query per tick against the RS-485 gauge, or the waveform simulator
//! when no device is configured. The simulator also provides the fallback
//! value for failed real-mode reads so downstream consumers keep seeing a
//! live (but error-flagged) signal during development.

use std::time::{Duration, Instant};

use gauge_comlink::{ComLinkError, Result};
use gauge_config::Rs485Config;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;
use tokio_serial::SerialStream;
use tracing::{info, warn};

/// Placeholder gauge query: standard FC3 read of two registers at address 0
const QUERY_COMMAND: [u8; 8] = [0x01, 0x03, 0x00, 0x00, 0x00, 0x02, 0xC4, 0x0B];

/// Response settle time before reading
const RESPONSE_DELAY: Duration = Duration::from_millis(50);

/// Supported line rates; anything else warns and falls back to 19200
const SUPPORTED_BAUDRATES: [u32; 5] = [9600, 19200, 38400, 57600, 115200];

pub fn validated_baudrate(baudrate: u32) -> u32 {
    if SUPPORTED_BAUDRATES.contains(&baudrate) {
        baudrate
    } else {
        warn!(baudrate, "unsupported baudrate, using 19200");
        19200
    }
}

enum Source {
    Simulated,
    Serial(SerialStream),
}

/// Periodic thickness reader
pub struct ThicknessSampler {
    source: Source,
    timeout: Duration,
    started: Instant,
}

impl ThicknessSampler {
    /// Open the configured source.
    ///
    /// Simulation mode never touches a device; real mode opens the TTY in
    /// 8N1 with the validated baudrate.
    pub fn open(config: &Rs485Config) -> Result<Self> {
        let started = Instant::now();
        let timeout = Duration::from_millis(config.timeout_ms);

        if config.is_simulated() {
            info!(device = %config.device, "sampler running in simulation mode");
            return Ok(Self {
                source: Source::Simulated,
                timeout,
                started,
            });
        }

        let baudrate = validated_baudrate(config.baudrate);
        let builder = tokio_serial::new(&config.device, baudrate)
            .data_bits(tokio_serial::DataBits::Eight)
            .stop_bits(tokio_serial::StopBits::One)
            .parity(tokio_serial::Parity::None);
        let stream = SerialStream::open(&builder).map_err(|e| {
            ComLinkError::Connection(format!("Failed to open {}: {}", config.device, e))
        })?;

        info!(device = %config.device, baudrate, "serial port opened");
        Ok(Self {
            source: Source::Serial(stream),
            timeout,
            started,
        })
    }

    /// Whether the sampler runs against real hardware
    pub fn is_serial(&self) -> bool {
        matches!(self.source, Source::Serial(_))
    }

    /// Synthetic thickness for the current instant.
    ///
    /// Slow drift plus two ripple components around the 1.5 mm nominal.
    pub fn simulated_thickness(&self) -> f32 {
        let t = self.started.elapsed().as_secs_f64();
        let value = 1.5
            + 0.2 * (0.4 * t).sin()
            + 0.05 * (3.2 * t).sin()
            + 0.01 * (12.7 * t).sin();
        value as f32
    }

    /// Perform one thickness query.
    ///
    /// Real mode issues the query command, waits for the device to answer
    /// and parses a big-endian float out of the register payload. Any
    /// timeout or malformed frame is an error; the caller decides what the
    /// published record looks like.
    pub async fn query(&mut self) -> Result<f32> {
        if matches!(self.source, Source::Simulated) {
            return Ok(self.simulated_thickness());
        }

        let read_timeout = self.timeout;
        let Source::Serial(stream) = &mut self.source else {
            return Err(ComLinkError::Internal("no sampler source".to_string()));
        };

        stream.write_all(&QUERY_COMMAND).await?;
        tokio::time::sleep(RESPONSE_DELAY).await;

        let mut response = [0u8; 64];
        let n = match timeout(read_timeout, stream.read(&mut response)).await {
            Ok(Ok(n)) => n,
            Ok(Err(err)) => return Err(ComLinkError::Io(err.to_string())),
            Err(_) => {
                return Err(ComLinkError::Timeout(
                    "no response from gauge".to_string(),
                ))
            },
        };

        parse_thickness_response(&response[..n])
    }
}

/// Extract the thickness from a gauge response frame.
///
/// Expected shape: slave 0x01, FC 0x03, byte count >= 4, then the IEEE-754
/// value big-endian starting at byte 3.
pub fn parse_thickness_response(response: &[u8]) -> Result<f32> {
    if response.len() < 7 {
        return Err(ComLinkError::Timeout(format!(
            "short response: {} bytes",
            response.len()
        )));
    }
    if response[0] != 0x01 || response[1] != 0x03 {
        return Err(ComLinkError::InvalidData(format!(
            "unexpected frame header {:02X} {:02X}",
            response[0], response[1]
        )));
    }

    let byte_count = response[2] as usize;
    if byte_count < 4 || response.len() < 3 + byte_count + 2 {
        return Err(ComLinkError::InvalidData(format!(
            "incomplete payload: byte_count={}, frame={}",
            byte_count,
            response.len()
        )));
    }

    Ok(f32::from_be_bytes([
        response[3],
        response[4],
        response[5],
        response[6],
    ]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sim_config() -> Rs485Config {
        Rs485Config {
            simulate: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_baudrate_validation() {
        assert_eq!(validated_baudrate(9600), 9600);
        assert_eq!(validated_baudrate(115200), 115200);
        assert_eq!(validated_baudrate(12345), 19200);
        assert_eq!(validated_baudrate(0), 19200);
    }

    #[test]
    fn test_simulated_thickness_stays_in_band() {
        let sampler = ThicknessSampler::open(&sim_config()).unwrap();
        // Amplitudes sum to 0.26 around the 1.5 mm nominal
        for _ in 0..100 {
            let value = sampler.simulated_thickness();
            assert!((1.0..=2.0).contains(&value), "value {} out of band", value);
        }
    }

    #[tokio::test]
    async fn test_simulated_query_succeeds() {
        let mut sampler = ThicknessSampler::open(&sim_config()).unwrap();
        assert!(!sampler.is_serial());
        let value = sampler.query().await.unwrap();
        assert!((1.0..=2.0).contains(&value));
    }

    #[test]
    fn test_parse_valid_response() {
        // 1.5f32 = 0x3FC00000, big-endian at byte 3
        let frame = [0x01, 0x03, 0x04, 0x3F, 0xC0, 0x00, 0x00, 0xAA, 0xBB];
        let value = parse_thickness_response(&frame).unwrap();
        assert!((value - 1.5).abs() < 1e-6);
    }

    #[test]
    fn test_parse_rejects_short_frame() {
        assert!(parse_thickness_response(&[0x01, 0x03, 0x04]).is_err());
    }

    #[test]
    fn test_parse_rejects_wrong_header() {
        let frame = [0x02, 0x03, 0x04, 0x3F, 0xC0, 0x00, 0x00, 0xAA, 0xBB];
        assert!(parse_thickness_response(&frame).is_err());

        let frame = [0x01, 0x83, 0x04, 0x3F, 0xC0, 0x00, 0x00, 0xAA, 0xBB];
        assert!(parse_thickness_response(&frame).is_err());
    }

    #[test]
    fn test_parse_rejects_truncated_payload() {
        // byte_count says 4 but the CRC tail is missing
        let frame = [0x01, 0x03, 0x04, 0x3F, 0xC0, 0x00, 0x00];
        assert!(parse_thickness_response(&frame).is_err());
    }
}
