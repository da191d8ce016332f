//! JSON debug interface
//!
//! A full introspective dump and load of the configuration plus tile array,
//! keyed by block name, driven by the catalogue field tables. Values are
//! integers or arrays of integers, read and written little-endian straight
//! from the register bytes, so the dump shows exactly what the hardware
//! will see.

use serde_json::{json, Map, Value};

use crate::backend::BackEnd;
use crate::catalog::{CONFIG_BLOCKS, TILE_FIELDS};
use crate::error::{PlanError, Result};
use crate::regs::TilesConfig;

fn read_val(bytes: &[u8], offset: usize, size: usize) -> u32 {
    let mut val: u32 = 0;
    for i in 0..size {
        val |= (bytes[offset + i] as u32) << (i * 8);
    }
    val
}

fn write_val(bytes: &mut [u8], offset: usize, size: usize, val: u32) {
    for i in 0..size {
        bytes[offset + i] = (val >> (i * 8)) as u8;
    }
}

fn field_to_value(bytes: &[u8], base: usize, field: &crate::catalog::FieldDesc) -> Value {
    if field.num == 1 {
        json!(read_val(bytes, base + field.offset, field.size))
    } else {
        let vals: Vec<u32> = (0..field.num)
            .map(|i| read_val(bytes, base + field.offset + i * field.size, field.size))
            .collect();
        json!(vals)
    }
}

impl BackEnd {
    /// Dump a finished configuration and its tile plan as JSON, one ordered
    /// object per block.
    pub fn get_json_config(&self, config: &TilesConfig) -> Result<String> {
        let config_bytes = bytemuck::bytes_of(&config.config);

        let mut blocks = Map::new();
        for block in CONFIG_BLOCKS {
            let mut fields = Map::new();
            for field in block.fields {
                fields.insert(field.name.to_string(), field_to_value(config_bytes, block.offset, field));
            }
            blocks.insert(block.name.to_string(), Value::Object(fields));
        }

        let mut tiles = Vec::with_capacity(config.num_tiles as usize);
        for t in config.tiles.iter().take(config.num_tiles as usize) {
            let tile_bytes = bytemuck::bytes_of(t);
            let mut fields = Map::new();
            for field in TILE_FIELDS {
                fields.insert(field.name.to_string(), field_to_value(tile_bytes, 0, field));
            }
            tiles.push(Value::Object(fields));
        }

        let root = json!({
            "version": 1.0,
            "be_revision": self.variant().version,
            "config": Value::Object(blocks),
            "tiles": tiles,
        });

        Ok(serde_json::to_string_pretty(&root)?)
    }

    /// Load a configuration dumped by [`BackEnd::get_json_config`]. Every
    /// catalogue field must be present. Dirty flags are cleared afterwards
    /// (the loaded state is authoritative) but the pipeline is always
    /// retiled so the tile structures match.
    pub fn set_json_config(&mut self, json_str: &str) -> Result<()> {
        let root: Value = serde_json::from_str(json_str)?;
        let config = root
            .get("config")
            .and_then(|c| c.as_object())
            .ok_or_else(|| PlanError::InvalidConfig("json config missing 'config' object".to_string()))?;

        let mut new_config = self.config;
        let bytes = bytemuck::bytes_of_mut(&mut new_config);

        for block in CONFIG_BLOCKS {
            let block_obj = config
                .get(block.name)
                .and_then(|b| b.as_object())
                .ok_or_else(|| PlanError::InvalidConfig(format!("json config missing block '{}'", block.name)))?;

            for field in block.fields {
                let value = block_obj.get(field.name).ok_or_else(|| {
                    PlanError::InvalidConfig(format!("json config missing field '{}.{}'", block.name, field.name))
                })?;

                if field.num == 1 {
                    let v = value.as_u64().ok_or_else(|| {
                        PlanError::InvalidConfig(format!("'{}.{}' is not an integer", block.name, field.name))
                    })? as u32;
                    write_val(bytes, block.offset + field.offset, field.size, v);
                } else {
                    let arr = value.as_array().ok_or_else(|| {
                        PlanError::InvalidConfig(format!("'{}.{}' is not an array", block.name, field.name))
                    })?;
                    if arr.len() != field.num {
                        return Err(PlanError::InvalidConfig(format!(
                            "'{}.{}' has {} entries, expected {}",
                            block.name,
                            field.name,
                            arr.len(),
                            field.num
                        )));
                    }
                    for (i, v) in arr.iter().enumerate() {
                        let v = v.as_u64().ok_or_else(|| {
                            PlanError::InvalidConfig(format!("'{}.{}[{i}]' is not an integer", block.name, field.name))
                        })? as u32;
                        write_val(bytes, block.offset + field.offset + i * field.size, field.size, v);
                    }
                }
            }
        }

        self.config = new_config;

        // No reconfiguration on the next prepare, but do retile so the
        // tile structures are set up for the loaded geometry.
        self.extra.dirty_bayer = 0;
        self.extra.dirty_rgb = 0;
        self.extra.dirty_extra = 0;
        self.retile = true;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_write_val_round_trip() {
        let mut bytes = [0u8; 8];
        write_val(&mut bytes, 2, 4, 0xdead_beef);
        assert_eq!(read_val(&bytes, 2, 4), 0xdead_beef);
        // little-endian layout
        assert_eq!(bytes[2], 0xef);
        assert_eq!(bytes[5], 0xde);

        write_val(&mut bytes, 0, 2, 0x1234);
        assert_eq!(read_val(&bytes, 0, 2), 0x1234);
        write_val(&mut bytes, 7, 1, 0xab);
        assert_eq!(read_val(&bytes, 7, 1), 0xab);
    }
}
