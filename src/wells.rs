//! Well-list CSV contract.
//!
//! On-disk format: header `cycle,X,Y,Z`, one data row per well in traversal
//! order. A capture run consumes either a freshly solved grid or a
//! pre-authored file of this shape; both land in the same
//! `Vec<WellPosition>`.

use crate::error::{RigError, RigResult};
use crate::grid::WellPosition;
use log::info;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Serialize, Deserialize)]
struct WellRecord {
    cycle: u32,
    #[serde(rename = "X")]
    x: f64,
    #[serde(rename = "Y")]
    y: f64,
    #[serde(rename = "Z")]
    z: f64,
}

/// Load a well list, checking that cycles run 1..=n in file order.
pub fn load_wells(path: &Path) -> RigResult<Vec<WellPosition>> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut wells = Vec::new();

    for (index, record) in reader.deserialize::<WellRecord>().enumerate() {
        let record = record?;
        let expected = index as u32 + 1;
        if record.cycle != expected {
            return Err(RigError::WellList(format!(
                "{}: row {} has cycle {}, expected {}",
                path.display(),
                index + 1,
                record.cycle,
                expected
            )));
        }
        wells.push(WellPosition {
            cycle: record.cycle,
            x: record.x,
            y: record.y,
            z: record.z,
        });
    }

    if wells.is_empty() {
        return Err(RigError::WellList(format!(
            "{}: no well rows",
            path.display()
        )));
    }

    info!("Loaded {} wells from {}", wells.len(), path.display());
    Ok(wells)
}

/// Write a well list in traversal order.
pub fn write_wells(path: &Path, wells: &[WellPosition]) -> RigResult<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for well in wells {
        writer.serialize(WellRecord {
            cycle: well.cycle,
            x: well.x,
            y: well.y,
            z: well.z,
        })?;
    }
    writer.flush()?;
    info!("Wrote {} wells to {}", wells.len(), path.display());
    Ok(())
}
