// AAC helpers: AudioSpecificConfig

use crate::error::{RtmpError, RtmpResult};

/// AAC-LC object type
pub const AAC_OBJECT_TYPE_LC: u8 = 2;

/// Parsed AudioSpecificConfig
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct AacConfig {
    /// Audio object type (2 for AAC-LC)
    pub object_type: u8,

    /// Sampling frequency index
    pub sampling_frequency_index: u8,

    /// Channel configuration (1 mono, 2 stereo)
    pub channel_config: u8,
}

/// Maps a sample rate in Hz to its sampling frequency index
/// Unknown rates map to the 44.1 kHz index
pub fn sampling_frequency_index(sample_rate: u32) -> u8 {
    match sample_rate {
        96000 => 0,
        88200 => 1,
        64000 => 2,
        48000 => 3,
        44100 => 4,
        32000 => 5,
        24000 => 6,
        22050 => 7,
        16000 => 8,
        12000 => 9,
        11025 => 10,
        8000 => 11,
        _ => 4,
    }
}

/// Maps a sampling frequency index back to the rate in Hz
pub fn sample_rate_for_index(index: u8) -> u32 {
    match index {
        0 => 96000,
        1 => 88200,
        2 => 64000,
        3 => 48000,
        4 => 44100,
        5 => 32000,
        6 => 24000,
        7 => 22050,
        8 => 16000,
        9 => 12000,
        10 => 11025,
        11 => 8000,
        _ => 44100,
    }
}

/// Builds an AudioSpecificConfig for AAC-LC
///
/// # Arguments
///
/// * `sample_rate` - Sampling rate in Hz
/// * `channels` - Number of channels (1 mono, 2 stereo)
pub fn audio_specific_config(sample_rate: u32, channels: u8) -> Vec<u8> {
    let freq_index = sampling_frequency_index(sample_rate);

    let channel_config = if channels >= 2 { 2u8 } else { 1u8 };

    // 5 bits object type, 4 bits frequency index, 4 bits channel config
    vec![
        (AAC_OBJECT_TYPE_LC << 3) | ((freq_index >> 1) & 0x07),
        ((freq_index & 0x01) << 7) | ((channel_config & 0x0f) << 3),
    ]
}

/// Parses an AudioSpecificConfig
pub fn parse_audio_specific_config(data: &[u8]) -> RtmpResult<AacConfig> {
    if data.len() < 2 {
        return Err(RtmpError::codec("AudioSpecificConfig too short"));
    }

    let object_type = data[0] >> 3;
    let sampling_frequency_index = ((data[0] & 0x07) << 1) | (data[1] >> 7);
    let channel_config = (data[1] >> 3) & 0x0f;

    if sampling_frequency_index == 15 {
        // Explicit 24 bit frequency follows, not used by any encoder we relay
        return Err(RtmpError::codec("explicit AAC sampling frequency not supported"));
    }

    Ok(AacConfig {
        object_type,
        sampling_frequency_index,
        channel_config,
    })
}

// Tests

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frequency_index_table() {
        assert_eq!(sampling_frequency_index(48000), 3);
        assert_eq!(sampling_frequency_index(44100), 4);
        assert_eq!(sampling_frequency_index(32000), 5);
        assert_eq!(sampling_frequency_index(8000), 11);
        assert_eq!(sampling_frequency_index(96000), 0);

        // Default for unknown rates
        assert_eq!(sampling_frequency_index(7777), 4);
    }

    #[test]
    fn test_audio_specific_config_round_trip() {
        let config = audio_specific_config(44100, 2);

        // AAC-LC, 44.1 kHz, stereo: the well-known 0x12 0x10
        assert_eq!(config, vec![0x12, 0x10]);

        let parsed = parse_audio_specific_config(&config).unwrap();

        assert_eq!(parsed.object_type, AAC_OBJECT_TYPE_LC);
        assert_eq!(parsed.sampling_frequency_index, 4);
        assert_eq!(parsed.channel_config, 2);
        assert_eq!(sample_rate_for_index(parsed.sampling_frequency_index), 44100);
    }

    #[test]
    fn test_audio_specific_config_mono_48k() {
        let config = audio_specific_config(48000, 1);

        let parsed = parse_audio_specific_config(&config).unwrap();

        assert_eq!(parsed.sampling_frequency_index, 3);
        assert_eq!(parsed.channel_config, 1);
    }
}
