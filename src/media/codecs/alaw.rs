use crate::error::ConvertError;
use once_cell::sync::OnceCell;

const SIGN_BIT: u8 = 0x80;
const EVEN_BIT_MASK: u8 = 0x55;
const MAX_MAGNITUDE: u32 = 32767;

// exponent by (magnitude >> 8), segment 0 is handled separately
static EXP_LUT: [u8; 128] = [
    1, 1, 2, 2, 3, 3, 3, 3, 4, 4, 4, 4, 4, 4, 4, 4,
    5, 5, 5, 5, 5, 5, 5, 5, 5, 5, 5, 5, 5, 5, 5, 5,
    6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6,
    6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6,
    7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7,
    7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7,
    7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7,
    7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7,
];

static TABLES: OnceCell<CodecTables> = OnceCell::new();

/// Lookup tables between 16-bit linear PCM and A-law bytes.
///
/// Both tables hold the natural (not bit-reversed) A-law representation.
/// The line transmits every byte with reversed bit order, which the
/// conversion functions apply on top of the lookup.
pub struct CodecTables {
    linear16_to_law: Box<[i8]>,
    law_to_linear16: Box<[i16]>,
}

impl CodecTables {
    pub const ENCODE_TABLE_LEN: usize = 65536;
    pub const DECODE_TABLE_LEN: usize = 256;

    fn build() -> Self {
        let linear16_to_law = (0..Self::ENCODE_TABLE_LEN)
            .map(|index| linear_to_alaw((index as i32 - 32768) as i16) as i8)
            .collect::<Vec<_>>()
            .into_boxed_slice();
        let law_to_linear16 = (0..Self::DECODE_TABLE_LEN)
            .map(|index| alaw_to_linear(index as u8))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            linear16_to_law,
            law_to_linear16,
        }
    }

    /// Natural A-law byte for a linear sample.
    #[inline]
    pub fn encode(&self, sample: i16) -> u8 {
        self.linear16_to_law[(sample as i32 + 32768) as usize] as u8
    }

    /// Linear sample for a natural A-law byte.
    #[inline]
    pub fn decode(&self, law: u8) -> i16 {
        self.law_to_linear16[law as usize]
    }

    pub fn encode_table(&self) -> &[i8] {
        &self.linear16_to_law
    }

    pub fn decode_table(&self) -> &[i16] {
        &self.law_to_linear16
    }
}

/// Returns the process wide tables, building them on first use.
///
/// Concurrent first callers block until the single build has completed, so no
/// caller can ever observe a partially filled table.
pub fn build_tables() -> &'static CodecTables {
    TABLES.get_or_init(|| {
        tracing::debug!("building a-law lookup tables");
        CodecTables::build()
    })
}

/// Reverses the bit order of one line byte.
#[inline]
pub const fn bit_inverse(byte: u8) -> u8 {
    byte.reverse_bits()
}

fn linear_to_alaw(sample: i16) -> u8 {
    let (sign, mut mag) = if sample < 0 {
        (0u8, -(sample as i32) as u32)
    } else {
        (SIGN_BIT, sample as u32)
    };
    if mag > MAX_MAGNITUDE {
        mag = MAX_MAGNITUDE;
    }

    let mut exponent = EXP_LUT[((mag >> 8) & 0x7F) as usize] as u32;
    let mantissa = (mag >> (exponent + 3)) & 0x0F;
    if mag < 0x100 {
        exponent = 0;
    }

    (sign | (exponent << 4) as u8 | mantissa as u8) ^ EVEN_BIT_MASK
}

fn alaw_to_linear(law: u8) -> i16 {
    let law = law ^ EVEN_BIT_MASK;
    let mut t = (law & 0x7F) as i32;
    if t < 16 {
        t = (t << 4) + 8;
    } else {
        let seg = (t >> 4) & 0x07;
        t = ((t & 0x0F) << 4) + 0x108;
        t <<= seg - 1;
    }
    if law & SIGN_BIT != 0 {
        t as i16
    } else {
        -t as i16
    }
}

/// Decodes line bytes into linear PCM, one sample per byte.
///
/// The length check happens before the first write, a failed call leaves
/// `output` untouched.
pub fn convert_line_to_audio(input: &[u8], output: &mut [i16]) -> Result<usize, ConvertError> {
    if output.len() < input.len() {
        return Err(ConvertError::BufferTooSmall {
            needed: input.len(),
            available: output.len(),
        });
    }
    let tables = build_tables();
    for (out, byte) in output.iter_mut().zip(input) {
        *out = tables.decode(bit_inverse(*byte));
    }
    Ok(input.len())
}

/// Encodes linear PCM into line bytes, one byte per sample.
pub fn convert_audio_to_line(input: &[i16], output: &mut [u8]) -> Result<usize, ConvertError> {
    if output.len() < input.len() {
        return Err(ConvertError::BufferTooSmall {
            needed: input.len(),
            available: output.len(),
        });
    }
    let tables = build_tables();
    for (out, sample) in output.iter_mut().zip(input) {
        *out = bit_inverse(tables.encode(*sample));
    }
    Ok(input.len())
}

/// Line byte carrying digital silence.
pub fn line_silence() -> u8 {
    bit_inverse(build_tables().encode(0))
}
