//! Mission Information Base loading.
//!
//! A MIB is a JSON document holding the parameter layout and calibration tables:
//!
//! ```json
//! {
//!   "parameters": [
//!     {"name": "temp", "apid": 100, "bit_offset": 0, "bit_length": 12, "encoding": "uint16", "unit": "counts"}
//!   ],
//!   "calibrations": [
//!     {"parameter_name": "temp", "method": "polynomial", "coefficients": [-55.0, 0.044], "unit": "degC"}
//!   ]
//! }
//! ```
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::calibration::{CalibrationEntry, CalibrationSpec, CalibrationTable};
use crate::parameter::{ParameterDefinition, ParameterTable};
use crate::{Error, Result};

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Mib {
    #[serde(default)]
    pub parameters: Vec<ParameterDefinition>,
    #[serde(default)]
    pub calibrations: Vec<CalibrationSpec>,
}

impl Mib {
    /// Load from a JSON reader. Nothing is validated until [Mib::into_tables].
    ///
    /// # Errors
    /// [Error::Json] if the document cannot be parsed.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mib: Mib = serde_json::from_reader(reader)?;
        debug!(
            parameters = mib.parameters.len(),
            calibrations = mib.calibrations.len(),
            "loaded mib"
        );
        Ok(mib)
    }

    /// Load from a JSON file.
    ///
    /// # Errors
    /// [Error::Io] if the file cannot be opened, otherwise see [Mib::from_reader].
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file))
    }

    /// Build the validated tables.
    ///
    /// # Errors
    /// [Error::Config] if any parameter definition or calibration is invalid, names are
    /// duplicated, or a calibration targets a parameter that is not defined.
    pub fn into_tables(self) -> Result<(ParameterTable, CalibrationTable)> {
        let params = ParameterTable::new(self.parameters)?;
        let entries = self
            .calibrations
            .into_iter()
            .map(CalibrationEntry::try_from)
            .collect::<Result<Vec<_>>>()?;
        if let Some(orphan) = entries
            .iter()
            .find(|c| params.get(c.parameter_name()).is_none())
        {
            return Err(Error::Config(format!(
                "calibration for undefined parameter {}",
                orphan.parameter_name()
            )));
        }
        let cals = CalibrationTable::new(entries)?;
        Ok((params, cals))
    }
}
