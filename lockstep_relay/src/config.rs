// Relay and round configuration.
//
// `RoundConfig` holds the per-table tunables the round core reads: round
// time limit, seat count, and the packet byte budget used by the packetizer.
// `ServerConfig` wraps it with the listen address and tick cadences.
//
// Both load from JSON (`ServerConfig::load`); every field has a default so a
// config file only needs the keys it changes. `validate()` must pass before a
// config reaches `Round::new` or `start_relay`; it is what guarantees a full
// operations packet never exceeds `max_packet_size` on the wire.

use std::path::Path;
use std::time::Duration;

use lockstep_protocol::codec::{GROUP_HEADER_LEN, RECORD_HEADER_LEN};
use lockstep_protocol::{MAX_MESSAGE_SIZE, OPS_PACKET_OVERHEAD, RoundStartOp};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoundConfig {
    /// A round still active this many seconds after it went active is ended
    /// by the next slow tick.
    pub max_round_secs: u64,
    /// Seats per table. `start_round` requires exactly this many players.
    pub required_players: usize,
    /// Upper bound on one framed operations packet, in bytes.
    pub max_packet_size: usize,
    /// Bytes reserved for the packet's fixed fields and framing. Must cover
    /// at least `OPS_PACKET_OVERHEAD`.
    pub header_reserve: usize,
    /// Extra slack kept free in every packet.
    pub safety_margin: usize,
    /// Longest nickname, in bytes, accepted at seating. A full table of
    /// nicknames this long must still fit one seating record.
    pub max_nickname_len: usize,
}

impl Default for RoundConfig {
    fn default() -> Self {
        Self {
            max_round_secs: 180,
            required_players: 2,
            max_packet_size: 5120,
            header_reserve: 32,
            safety_margin: 100,
            max_nickname_len: 32,
        }
    }
}

impl RoundConfig {
    /// Bytes of frame-group data one packet may carry.
    pub fn payload_capacity(&self) -> usize {
        self.max_packet_size
            .saturating_sub(self.header_reserve)
            .saturating_sub(self.safety_margin)
    }

    /// Largest operation payload that still fits a fresh packet along with
    /// its frame-group header and record header.
    pub fn max_payload_len(&self) -> usize {
        self.payload_capacity()
            .saturating_sub(GROUP_HEADER_LEN + RECORD_HEADER_LEN)
    }

    pub fn max_round_duration(&self) -> Duration {
        Duration::from_secs(self.max_round_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.required_players == 0 {
            return Err(ConfigError::Invalid(
                "required_players must be at least 1".into(),
            ));
        }
        if self.max_round_secs == 0 {
            return Err(ConfigError::Invalid("max_round_secs must be positive".into()));
        }
        if self.header_reserve < OPS_PACKET_OVERHEAD {
            return Err(ConfigError::Invalid(format!(
                "header_reserve {} is smaller than the {OPS_PACKET_OVERHEAD}-byte packet overhead",
                self.header_reserve
            )));
        }
        if self.max_packet_size > MAX_MESSAGE_SIZE as usize {
            return Err(ConfigError::Invalid(format!(
                "max_packet_size {} exceeds the {MAX_MESSAGE_SIZE}-byte frame limit",
                self.max_packet_size
            )));
        }
        if self.payload_capacity() <= GROUP_HEADER_LEN + RECORD_HEADER_LEN {
            return Err(ConfigError::Invalid(format!(
                "max_packet_size {} leaves no room for operation data",
                self.max_packet_size
            )));
        }
        if self.max_nickname_len == 0 {
            return Err(ConfigError::Invalid(
                "max_nickname_len must be at least 1".into(),
            ));
        }
        let seating = RoundStartOp::encoded_len(self.required_players, self.max_nickname_len);
        if seating > self.max_payload_len() {
            return Err(ConfigError::Invalid(format!(
                "a seating record for {} players with {}-byte nicknames needs {seating} bytes, \
                 more than the {}-byte payload limit",
                self.required_players,
                self.max_nickname_len,
                self.max_payload_len()
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Interface to listen on.
    pub host: String,
    pub port: u16,
    /// Fast tick: how often pending operations are flushed.
    pub frame_interval_ms: u64,
    /// Slow tick: round timeout / all-offline check.
    pub slow_tick_ms: u64,
    /// A send to one client blocked longer than this drops that client.
    pub write_timeout_ms: u64,
    pub round: RoundConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 7979,
            frame_interval_ms: 66,
            slow_tick_ms: 1000,
            write_timeout_ms: 250,
            round: RoundConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: ServerConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.frame_interval_ms == 0 || self.slow_tick_ms == 0 {
            return Err(ConfigError::Invalid("tick intervals must be positive".into()));
        }
        if self.write_timeout_ms == 0 {
            return Err(ConfigError::Invalid("write_timeout_ms must be positive".into()));
        }
        self.round.validate()
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }

    pub fn slow_tick(&self) -> Duration {
        Duration::from_millis(self.slow_tick_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        ServerConfig::default().validate().unwrap();
        let round = RoundConfig::default();
        assert_eq!(round.payload_capacity(), 5120 - 32 - 100);
        assert_eq!(round.max_payload_len(), 5120 - 32 - 100 - 20);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config =
            ServerConfig::from_json(r#"{"port": 9000, "round": {"required_players": 4}}"#)
                .unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.round.required_players, 4);
        assert_eq!(config.round.max_round_secs, 180);
        assert_eq!(config.frame_interval_ms, 66);
    }

    #[test]
    fn reserve_below_packet_overhead_rejected() {
        let config = RoundConfig {
            header_reserve: OPS_PACKET_OVERHEAD - 1,
            ..RoundConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn budget_without_room_for_records_rejected() {
        let config = RoundConfig {
            max_packet_size: 32 + 100 + GROUP_HEADER_LEN + RECORD_HEADER_LEN,
            ..RoundConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn nickname_bound_must_fit_seating_record() {
        let config = RoundConfig {
            required_players: 8,
            max_nickname_len: 1000,
            ..RoundConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let fits = RoundConfig {
            required_players: 8,
            ..RoundConfig::default()
        };
        fits.validate().unwrap();
        assert!(
            RoundStartOp::encoded_len(8, fits.max_nickname_len) <= fits.max_payload_len()
        );
    }

    #[test]
    fn zero_write_timeout_rejected() {
        let config = ServerConfig {
            write_timeout_ms: 0,
            ..ServerConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn zero_players_rejected() {
        let config = RoundConfig {
            required_players: 0,
            ..RoundConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn malformed_json_is_a_json_error() {
        assert!(matches!(
            ServerConfig::from_json("{ not json"),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn load_missing_file_is_io_error() {
        assert!(matches!(
            ServerConfig::load(Path::new("/nonexistent/lockstep-relay.json")),
            Err(ConfigError::Io(_))
        ));
    }
}
