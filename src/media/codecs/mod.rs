pub mod alaw;
#[cfg(test)]
mod tests;

pub use alaw::{
    bit_inverse, build_tables, convert_audio_to_line, convert_line_to_audio, CodecTables,
};

/// Sample rate of the B-channel.
pub const LINE_SAMPLE_RATE: u32 = 8000;
/// Samples per 20ms line frame.
pub const LINE_FRAME_SAMPLES: usize = 160;
