use serde::{Deserialize, Serialize};

use crate::{
    cache::{Cache, Timing},
    error::ConfigError,
};

/// Geometry and timing of the simulated cache. Every field is optional in
/// the JSON form; `{}` gives the reference 1024-set, 4-way, 32-byte cache.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub sets: usize,
    pub ways: usize,
    pub block_size: usize,
    pub hit_cycles: u64,
    pub fetch_penalty: u64,
    pub write_back_penalty: u64,
    /// Install the line dirty when a write misses. The reference cache
    /// leaves it clean and only dirties lines on a write hit.
    pub dirty_on_write_miss: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            sets: 1024,
            ways: 4,
            block_size: 32,
            hit_cycles: 1,
            fetch_penalty: 50,
            write_back_penalty: 50,
            dirty_on_write_miss: false,
        }
    }
}

impl Config {
    pub fn from_json(json: &str) -> Result<Config, ConfigError> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        // ranks wrap modulo any associativity; only the bit-field sizes need powers of two
        if self.ways == 0 {
            return Err(ConfigError::NoWays);
        }
        for (field, value) in [("sets", self.sets), ("block_size", self.block_size)] {
            if !value.is_power_of_two() {
                return Err(ConfigError::NotPowerOfTwo { field, value });
            }
        }

        let offset_bits = self.block_size.ilog2();
        let index_bits = self.sets.ilog2();
        if offset_bits + index_bits > u32::BITS {
            return Err(ConfigError::AddressTooNarrow {
                offset_bits,
                index_bits,
            });
        }
        Ok(())
    }

    pub fn timing(&self) -> Timing {
        Timing {
            hit_cycles: self.hit_cycles,
            fetch_penalty: self.fetch_penalty,
            write_back_penalty: self.write_back_penalty,
        }
    }

    pub fn to_cache(&self) -> Result<Cache, ConfigError> {
        self.validate()?;
        Ok(Cache::new(
            self.block_size,
            self.sets,
            self.ways,
            self.timing(),
            self.dirty_on_write_miss,
        ))
    }
}
