//! Media vocabulary shared by the stack boundary, calls and devices
//!
//! These are plain value types: media kinds, directions, format ids and the
//! per-stream descriptions a [`Call`](crate::call::Call) reads through from
//! the stack.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Kind of media carried by a stream or handled by a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MediaType {
    /// Audio stream or device
    Audio,
    /// Video stream or device
    Video,
    /// Anything the stack reports that is neither audio nor video
    Unknown,
}

/// Media direction as a small bit set (capture = 0x01, playback = 0x02)
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct MediaDirection(u8);

impl MediaDirection {
    /// No direction
    pub const NONE: Self = Self(0x00);
    /// Capture (local source, outgoing media)
    pub const CAPTURE: Self = Self(0x01);
    /// Playback (remote source, rendered locally)
    pub const PLAYBACK: Self = Self(0x02);
    /// Both directions
    pub const CAPTURE_AND_PLAYBACK: Self = Self(0x03);

    /// Build from raw bits, ignoring unknown bits
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits & 0x03)
    }

    /// Raw bits
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Whether every bit of `other` is set in `self`
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether at least one bit of `other` is set in `self`
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// Union of both directions
    pub const fn with(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// `self` without the bits of `other`
    pub const fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    /// Whether no direction is set
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for MediaDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self.0 {
            0x00 => "None",
            0x01 => "Capture",
            0x02 => "Playback",
            _ => "CaptureAndPlayback",
        };
        f.write_str(name)
    }
}

/// Four-character media format id, packed little-endian (`C4<<24 | C3<<16 | C2<<8 | C1`)
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FourCc(pub u32);

impl FourCc {
    /// Linear 16-bit PCM; the only id that is not a packed code
    pub const L16: Self = Self(0);
    pub const PCMA: Self = Self::pack(b'A', b'L', b'A', b'W');
    pub const PCMU: Self = Self::pack(b'u', b'L', b'A', b'W');
    pub const RGB24: Self = Self::pack(b'R', b'G', b'B', b'3');
    pub const RGBA: Self = Self::pack(b'R', b'G', b'B', b'A');
    pub const BGRA: Self = Self::pack(b'B', b'G', b'R', b'A');
    pub const I420: Self = Self::pack(b'I', b'4', b'2', b'0');
    pub const YUY2: Self = Self::pack(b'Y', b'U', b'Y', b'2');
    pub const H263: Self = Self::pack(b'H', b'2', b'6', b'3');
    pub const H264: Self = Self::pack(b'H', b'2', b'6', b'4');

    /// Pack four ASCII characters into a format id
    pub const fn pack(c1: u8, c2: u8, c3: u8, c4: u8) -> Self {
        Self((c4 as u32) << 24 | (c3 as u32) << 16 | (c2 as u32) << 8 | c1 as u32)
    }
}

impl fmt::Display for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            return f.write_str("L16 ");
        }
        for byte in self.0.to_le_bytes() {
            let c = if byte.is_ascii_graphic() || byte == b' ' { byte as char } else { '?' };
            write!(f, "{}", c)?;
        }
        Ok(())
    }
}

impl fmt::Debug for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FourCc({})", self)
    }
}

/// Audio format parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AudioFormatDetails {
    pub clock_rate: u32,
    pub channel_count: u32,
    pub frame_time_usec: u32,
    pub bits_per_sample: u32,
    pub avg_bitrate: u32,
    pub max_bitrate: u32,
}

/// Video format parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VideoFormatDetails {
    pub fps_num: u32,
    pub fps_den: u32,
    pub width: u32,
    pub height: u32,
    pub avg_bitrate: u32,
    pub max_bitrate: u32,
}

/// Type-specific format parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FormatDetails {
    Audio(AudioFormatDetails),
    Video(VideoFormatDetails),
}

/// A media format: id plus type-specific details
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaFormat {
    pub id: FourCc,
    pub details: FormatDetails,
}

impl MediaFormat {
    /// Video format with the given geometry and frame rate
    pub fn video(id: FourCc, width: u32, height: u32, fps_num: u32, fps_den: u32) -> Self {
        Self {
            id,
            details: FormatDetails::Video(VideoFormatDetails {
                fps_num,
                fps_den,
                width,
                height,
                ..Default::default()
            }),
        }
    }

    /// Audio format from its details
    pub fn audio(id: FourCc, details: AudioFormatDetails) -> Self {
        Self {
            id,
            details: FormatDetails::Audio(details),
        }
    }

    /// Media type of this format
    pub fn media_type(&self) -> MediaType {
        match self.details {
            FormatDetails::Audio(_) => MediaType::Audio,
            FormatDetails::Video(_) => MediaType::Video,
        }
    }

    /// Video geometry, if this is a video format
    pub fn video_size(&self) -> Option<(u32, u32)> {
        match self.details {
            FormatDetails::Video(v) => Some((v.width, v.height)),
            FormatDetails::Audio(_) => None,
        }
    }
}

/// Media state of one stream of a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MediaStatus {
    #[default]
    None,
    Active,
    LocalHold,
    RemoteHold,
    Error,
}

/// Live description of one media stream of a call
#[derive(Debug, Clone, PartialEq)]
pub struct MediaStream {
    pub media_type: MediaType,
    pub dir: MediaDirection,
    pub index: usize,
    pub state: MediaStatus,
    /// Negotiated codec parameters, when the stack exposes them for this stream
    pub format: Option<FormatDetails>,
}

/// Adjustable per-stream property
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamProperty {
    /// Whether media flows in the given direction
    Enabled,
    /// Level, 0.0 mutes and 1.0 is the default
    Volume,
}

/// Value of a [`StreamProperty`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PropertyValue {
    Bool(bool),
    Float(f32),
}

impl PropertyValue {
    /// Interpret as a flag (non-zero floats are true)
    pub fn as_bool(self) -> bool {
        match self {
            Self::Bool(b) => b,
            Self::Float(v) => v != 0.0,
        }
    }

    /// Interpret as a level (true is 1.0)
    pub fn as_f32(self) -> f32 {
        match self {
            Self::Bool(b) => {
                if b {
                    1.0
                } else {
                    0.0
                }
            }
            Self::Float(v) => v,
        }
    }
}

/// A capture or playback device known to the stack
#[derive(Debug, Clone)]
pub struct SipDevice {
    pub media_type: MediaType,
    pub dir: MediaDirection,
    pub index: usize,
    pub name: String,
    pub formats: Vec<MediaFormat>,
}

/// Devices are the same device when type and name match, whatever their index
impl PartialEq for SipDevice {
    fn eq(&self, other: &Self) -> bool {
        self.media_type == other.media_type && self.name == other.name
    }
}

impl Eq for SipDevice {}

impl PartialOrd for SipDevice {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SipDevice {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.media_type
            .cmp(&other.media_type)
            .then(self.index.cmp(&other.index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_bits() {
        let both = MediaDirection::CAPTURE.with(MediaDirection::PLAYBACK);
        assert_eq!(both, MediaDirection::CAPTURE_AND_PLAYBACK);
        assert!(both.contains(MediaDirection::CAPTURE));
        assert_eq!(both.without(MediaDirection::CAPTURE), MediaDirection::PLAYBACK);
        assert!(!MediaDirection::PLAYBACK.intersects(MediaDirection::CAPTURE));
        assert!(MediaDirection::NONE.is_none());
        assert_eq!(MediaDirection::from_bits(0xff), MediaDirection::CAPTURE_AND_PLAYBACK);
    }

    #[test]
    fn test_fourcc_packing_and_display() {
        assert_eq!(FourCc::BGRA.0, 0x4152_4742);
        assert_eq!(FourCc::BGRA.to_string(), "BGRA");
        assert_eq!(FourCc::L16.to_string(), "L16 ");
    }

    #[test]
    fn test_device_identity_ignores_index() {
        let a = SipDevice {
            media_type: MediaType::Video,
            dir: MediaDirection::CAPTURE,
            index: 0,
            name: "cam".into(),
            formats: vec![],
        };
        let mut b = a.clone();
        b.index = 3;
        assert_eq!(a, b);
        assert!(a < b);
    }
}
