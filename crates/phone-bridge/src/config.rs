//! Phone bridge configuration
//!
//! [`PhoneConfig`] carries everything the bridge hands to the stack on
//! creation plus the timing constants of the call teardown protocol. It can be
//! built in code with the `with_*` methods or loaded from TOML:
//!
//! ```toml
//! stun_server = "stun.example.com:3478"
//! enable_ice = true
//! udp_port = 5060
//! close_media_delay_ms = 3000
//!
//! [[video_codecs]]
//! name = "H264/97"
//! width = 1280
//! height = 720
//! fps_num = 30
//! fps_den = 1
//! avg_bitrate = 1024000
//! max_bitrate = 1024000
//!
//! [logging]
//! bridge_level = "debug"
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PhoneError, PhoneResult};
use crate::logging::LoggingConfig;
use crate::stack::VideoCodecParams;

/// Default teardown delay before a call with media is deleted
pub const DEFAULT_CLOSE_MEDIA_DELAY_MS: u64 = 3000;
/// Upper bound of the destroy-wait polling tick
pub const MAX_DESTROY_TICK_MS: u64 = 1000;

/// Encoder parameters for one video codec
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoCodecConfig {
    /// Codec id as the stack names it (e.g. `H264`)
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub fps_num: u32,
    pub fps_den: u32,
    pub avg_bitrate: u32,
    pub max_bitrate: u32,
}

impl VideoCodecConfig {
    /// VGA at 25 fps and 512 kbit/s
    pub fn vga(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            width: 640,
            height: 480,
            fps_num: 25,
            fps_den: 1,
            avg_bitrate: 512_000,
            max_bitrate: 512_000,
        }
    }

    /// Parameters in the form the stack takes them
    pub fn params(&self) -> VideoCodecParams {
        VideoCodecParams {
            width: self.width,
            height: self.height,
            fps_num: self.fps_num,
            fps_den: self.fps_den,
            avg_bitrate: self.avg_bitrate,
            max_bitrate: self.max_bitrate,
        }
    }
}

/// Configuration of a [`Phone`](crate::phone::Phone)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhoneConfig {
    /// STUN server handed to the stack
    pub stun_server: Option<String>,
    /// Enable ICE in the media transport
    pub enable_ice: bool,
    /// UDP SIP port, 0 for any
    pub udp_port: u16,
    /// TCP SIP port, 0 for any
    pub tcp_port: u16,
    /// User-Agent header value
    pub user_agent: String,
    /// Stack log file
    pub log_file: Option<PathBuf>,
    /// Time media needs to close before a disconnected call may be deleted
    pub close_media_delay_ms: u64,
    /// Polling tick of the destroy wait
    pub destroy_tick_ms: u64,
    /// Encoder parameters pushed once the stack is up
    pub video_codecs: Vec<VideoCodecConfig>,
    /// Subscriber settings for [`setup_logging`](crate::logging::setup_logging)
    pub logging: LoggingConfig,
}

impl Default for PhoneConfig {
    fn default() -> Self {
        Self {
            stun_server: None,
            enable_ice: false,
            udp_port: 0,
            tcp_port: 0,
            user_agent: format!("rvoip-phone-bridge/{}", crate::VERSION),
            log_file: None,
            close_media_delay_ms: DEFAULT_CLOSE_MEDIA_DELAY_MS,
            destroy_tick_ms: MAX_DESTROY_TICK_MS,
            video_codecs: vec![VideoCodecConfig::vga("H264"), VideoCodecConfig::vga("H263")],
            logging: LoggingConfig::default(),
        }
    }
}

impl PhoneConfig {
    /// Create a configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a TOML document; missing keys keep their defaults
    pub fn from_toml_str(source: &str) -> PhoneResult<Self> {
        let config: Self =
            toml::from_str(source).map_err(|e| PhoneError::config(format!("Invalid phone configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Set the STUN server
    pub fn with_stun_server(mut self, server: impl Into<String>) -> Self {
        self.stun_server = Some(server.into());
        self
    }

    /// Enable or disable ICE
    pub fn with_ice(mut self, enable: bool) -> Self {
        self.enable_ice = enable;
        self
    }

    /// Set the SIP transport ports
    pub fn with_ports(mut self, udp_port: u16, tcp_port: u16) -> Self {
        self.udp_port = udp_port;
        self.tcp_port = tcp_port;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    /// Set the media close delay
    pub fn with_close_media_delay(mut self, delay: Duration) -> Self {
        self.close_media_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Set the destroy-wait polling tick
    pub fn with_destroy_tick(mut self, tick: Duration) -> Self {
        self.destroy_tick_ms = tick.as_millis() as u64;
        self
    }

    /// Replace the video codec parameter list
    pub fn with_video_codecs(mut self, codecs: Vec<VideoCodecConfig>) -> Self {
        self.video_codecs = codecs;
        self
    }

    pub fn with_logging(mut self, logging: LoggingConfig) -> Self {
        self.logging = logging;
        self
    }

    pub fn close_media_delay(&self) -> Duration {
        Duration::from_millis(self.close_media_delay_ms)
    }

    pub fn destroy_tick(&self) -> Duration {
        Duration::from_millis(self.destroy_tick_ms)
    }

    /// Check the configuration for values the bridge cannot work with
    pub fn validate(&self) -> PhoneResult<()> {
        if self.destroy_tick_ms == 0 || self.destroy_tick_ms > MAX_DESTROY_TICK_MS {
            return Err(PhoneError::config(format!(
                "destroy_tick_ms must be between 1 and {}, got {}",
                MAX_DESTROY_TICK_MS, self.destroy_tick_ms
            )));
        }
        if self.user_agent.trim().is_empty() {
            return Err(PhoneError::config("user_agent must not be empty"));
        }
        for codec in &self.video_codecs {
            if codec.name.is_empty() {
                return Err(PhoneError::config("video codec without a name"));
            }
            if codec.width == 0 || codec.height == 0 || codec.fps_num == 0 || codec.fps_den == 0 {
                return Err(PhoneError::config(format!(
                    "video codec {} has zero geometry or frame rate",
                    codec.name
                )));
            }
        }
        self.logging.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PhoneConfig::default();
        assert_eq!(config.close_media_delay(), Duration::from_secs(3));
        assert_eq!(config.destroy_tick(), Duration::from_secs(1));
        assert_eq!(config.video_codecs.len(), 2);
        assert_eq!(config.video_codecs[0].params().avg_bitrate, 512_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml_keeps_defaults_for_missing_keys() {
        let config = PhoneConfig::from_toml_str(
            r#"
            stun_server = "stun.example.com"
            enable_ice = true
            udp_port = 5070
            "#,
        )
        .unwrap();
        assert_eq!(config.stun_server.as_deref(), Some("stun.example.com"));
        assert!(config.enable_ice);
        assert_eq!(config.udp_port, 5070);
        assert_eq!(config.close_media_delay_ms, DEFAULT_CLOSE_MEDIA_DELAY_MS);
    }

    #[test]
    fn test_invalid_tick_rejected() {
        let err = PhoneConfig::from_toml_str("destroy_tick_ms = 5000").unwrap_err();
        assert!(matches!(err, PhoneError::Configuration { .. }));
        assert!(PhoneConfig::new().with_destroy_tick(Duration::ZERO).validate().is_err());
    }

    #[test]
    fn test_logging_table() {
        let config = PhoneConfig::from_toml_str(
            r#"
            [logging]
            bridge_level = "debug"
            directives = ["rvoip_phone_bridge::worker=trace"]
            "#,
        )
        .unwrap();
        assert_eq!(config.logging.default_level, "warn");
        assert_eq!(
            config.logging.filter_directives().unwrap(),
            "warn,rvoip_phone_bridge=debug,rvoip_phone_bridge::worker=trace"
        );

        let err = PhoneConfig::from_toml_str("[logging]\ndefault_level = \"loud\"").unwrap_err();
        assert!(matches!(err, PhoneError::Configuration { .. }));
    }

    #[test]
    fn test_zero_codec_geometry_rejected() {
        let mut codec = VideoCodecConfig::vga("H264");
        codec.height = 0;
        let config = PhoneConfig::new().with_video_codecs(vec![codec]);
        assert!(config.validate().is_err());
    }
}
