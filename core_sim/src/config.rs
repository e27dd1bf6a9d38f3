use serde::Serialize;
use thiserror::Error;

use crate::{
    addr::{FieldWidths, WordAddr},
    cache::ReplacementPolicy,
};

/// User-facing sizing parameters. All sizes are in words.
#[derive(Debug, Clone)]
pub struct SimConfig {
    pub blocks_per_set: usize,
    pub words_per_block: usize,
    pub cache_size: usize,
    pub replacement_policy: ReplacementPolicy,
    /// Lower bound on the address width; widened to fit the largest address.
    pub num_addr_bits: u32,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidConfiguration {
    #[error("`{0}` must be positive")]
    NonPositive(&'static str),
    #[error("`{name}` must be a power of two, got {value}")]
    NotPowerOfTwo { name: &'static str, value: usize },
    #[error("{whole} {whole_name} do not divide evenly into groups of {part}")]
    Indivisible {
        whole: usize,
        whole_name: &'static str,
        part: usize,
    },
    #[error("at most 64 address bits are supported, got {0}")]
    AddrWidthTooLarge(u32),
    #[error("{needed} index and offset bits do not fit in a {available}-bit address")]
    NegativeTagWidth { needed: u32, available: u32 },
    #[error(
        "tag, index and offset widths ({tag}+{index}+{offset}) do not sum to the {addr}-bit address width"
    )]
    InconsistentWidths {
        tag: u32,
        index: u32,
        offset: u32,
        addr: u32,
    },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SimulationError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(#[from] InvalidConfiguration),
    #[error("word address {addr} does not fit in {num_addr_bits} address bits")]
    AddressOutOfRange { addr: WordAddr, num_addr_bits: u32 },
}

/// Cache geometry derived from a [`SimConfig`] and the reference stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DerivedParams {
    pub num_blocks: usize,
    pub num_sets: usize,
    pub num_addr_bits: u32,
    pub num_tag_bits: u32,
    pub num_index_bits: u32,
    pub num_offset_bits: u32,
}

impl DerivedParams {
    pub fn derive(config: &SimConfig, word_addrs: &[WordAddr]) -> Result<Self, SimulationError> {
        let SimConfig {
            blocks_per_set,
            words_per_block,
            cache_size,
            num_addr_bits,
            ..
        } = *config;
        for (name, value) in [
            ("cache-size", cache_size),
            ("words-per-block", words_per_block),
            ("blocks-per-set", blocks_per_set),
        ] {
            if value == 0 {
                return Err(InvalidConfiguration::NonPositive(name).into());
            }
        }
        if !words_per_block.is_power_of_two() {
            return Err(InvalidConfiguration::NotPowerOfTwo {
                name: "words-per-block",
                value: words_per_block,
            }
            .into());
        }
        if cache_size % words_per_block != 0 {
            return Err(InvalidConfiguration::Indivisible {
                whole: cache_size,
                whole_name: "cache words",
                part: words_per_block,
            }
            .into());
        }
        let num_blocks = cache_size / words_per_block;
        if num_blocks % blocks_per_set != 0 {
            return Err(InvalidConfiguration::Indivisible {
                whole: num_blocks,
                whole_name: "cache blocks",
                part: blocks_per_set,
            }
            .into());
        }
        let num_sets = num_blocks / blocks_per_set;
        if !num_sets.is_power_of_two() {
            return Err(InvalidConfiguration::NotPowerOfTwo {
                name: "num-sets",
                value: num_sets,
            }
            .into());
        }
        if num_addr_bits > u64::BITS {
            return Err(InvalidConfiguration::AddrWidthTooLarge(num_addr_bits).into());
        }
        // widen the address space until the largest referenced address fits
        let widest = word_addrs.iter().map(|a| a.min_bits()).max().unwrap_or(1);
        let num_addr_bits = num_addr_bits.max(widest);
        let num_offset_bits = words_per_block.trailing_zeros();
        let num_index_bits = num_sets.trailing_zeros();
        let used = num_index_bits + num_offset_bits;
        let num_tag_bits =
            num_addr_bits
                .checked_sub(used)
                .ok_or(InvalidConfiguration::NegativeTagWidth {
                    needed: used,
                    available: num_addr_bits,
                })?;
        Ok(Self {
            num_blocks,
            num_sets,
            num_addr_bits,
            num_tag_bits,
            num_index_bits,
            num_offset_bits,
        })
    }

    pub fn field_widths(&self) -> FieldWidths {
        FieldWidths {
            addr: self.num_addr_bits,
            tag: self.num_tag_bits,
            index: self.num_index_bits,
            offset: self.num_offset_bits,
        }
    }
}
