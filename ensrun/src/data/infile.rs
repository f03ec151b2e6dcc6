use std::fs;
use std::path::Path;

use enscore::run::descriptor::{ResponseBox, RunDescriptor};

use crate::error::ReadError;

/// Input file read by the sensitivity and member-value codes, one value per
/// line: ensemble size, sensitivity hour, response hour, response code,
/// lower lon, upper lon, lower lat, upper lat, and whether member response
/// values should be written as well.
#[derive(Clone, Debug, PartialEq)]
pub struct SensInputDescriptor {
    pub ensemble_size: usize,
    pub sensitivity_hour: u32,
    pub response_hour: u32,
    pub response_index: u8,
    pub response_box: ResponseBox,
    pub emit_response_values: bool,
}

impl SensInputDescriptor {
    pub fn from_descriptor(descriptor: &RunDescriptor, emit_response_values: bool) -> Self {
        SensInputDescriptor {
            ensemble_size: descriptor.ensemble_size(),
            sensitivity_hour: descriptor.sensitivity_hour(),
            response_hour: descriptor.response_hour(),
            response_index: descriptor.response_index(),
            response_box: descriptor.response_box(),
            emit_response_values,
        }
    }

    pub fn render(&self) -> String {
        let b = &self.response_box;
        let flag = if self.emit_response_values { ".true." } else { ".false." };
        format!(
            "{}\n{}\n{}\n{}\n{}\n{}\n{}\n{}\n{}\n",
            self.ensemble_size,
            self.sensitivity_hour,
            self.response_hour,
            self.response_index,
            b.lower_lon,
            b.upper_lon,
            b.lower_lat,
            b.upper_lat,
            flag
        )
    }

    pub fn parse(text: &str) -> Result<Self, ReadError> {
        let lines: Vec<&str> = text.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
        if lines.len() != 9 {
            return Err(malformed(format!("expected 9 lines, found {}", lines.len())));
        }

        fn field<T: std::str::FromStr>(lines: &[&str], i: usize, name: &str) -> Result<T, ReadError> {
            lines[i]
                .parse()
                .map_err(|_| malformed(format!("line {}: bad {} `{}`", i + 1, name, lines[i])))
        }

        let emit_response_values = match lines[8].to_ascii_lowercase().as_str() {
            ".true." | "t" => true,
            ".false." | "f" => false,
            other => return Err(malformed(format!("line 9: bad flag `{}`", other))),
        };

        let response_box = ResponseBox::new(
            field(&lines, 6, "lower latitude")?,
            field(&lines, 7, "upper latitude")?,
            field(&lines, 4, "lower longitude")?,
            field(&lines, 5, "upper longitude")?,
        )
        .map_err(|e| malformed(e.to_string()))?;

        Ok(SensInputDescriptor {
            ensemble_size: field(&lines, 0, "ensemble size")?,
            sensitivity_hour: field(&lines, 1, "sensitivity hour")?,
            response_hour: field(&lines, 2, "response hour")?,
            response_index: field(&lines, 3, "response code")?,
            response_box,
            emit_response_values,
        })
    }

    /// Write (or overwrite) the input file.
    pub fn write(&self, path: &Path) -> std::io::Result<()> {
        fs::write(path, self.render())
    }

    pub fn read(path: &Path) -> Result<Self, ReadError> {
        let text = fs::read_to_string(path).map_err(|source| ReadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        SensInputDescriptor::parse(&text)
    }
}

fn malformed(message: String) -> ReadError {
    ReadError::Malformed {
        what: "sensitivity input file",
        message,
    }
}
