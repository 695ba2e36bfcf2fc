//! File formats for measured and processed arrays.
//!
//! Front ends and the Save event go through the [`FormatRegistry`], which
//! picks a format by extension for saving and tries every readable format
//! when loading. The built-in [`CsvFormat`] stores an array of any
//! dimensionality in long form: one row per sample with one coordinate column
//! per axis, followed by the real part and, if needed, the imaginary part.

use crate::data_container::DataArray;
use crate::error::{Result, TerapyError};
use crate::units::AxisInfo;
use csv::{ReaderBuilder, WriterBuilder};
use ndarray::{Array1, ArrayD, IxDyn};
use num_complex::Complex64;
use std::fmt::Debug;
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// A reader and/or writer for one file type.
pub trait FileFormat: Send + Sync + Debug {
    /// Extensions without the leading dot.
    fn ext(&self) -> &[&'static str];

    fn desc(&self) -> &str;

    fn can_read(&self) -> bool;

    fn can_save(&self) -> bool;

    /// Whether one file may hold several arrays.
    fn multi_data(&self) -> bool {
        false
    }

    /// Reads every array in `path`. `Ok(None)` means the file is not in this format.
    fn read(&self, path: &Path) -> Result<Option<Vec<DataArray>>>;

    fn save(&self, path: &Path, array: &DataArray, name: Option<&str>) -> Result<()>;
}

/// All known file formats, in priority order.
#[derive(Debug, Default)]
pub struct FormatRegistry {
    formats: Vec<Box<dyn FileFormat>>,
}

impl FormatRegistry {
    pub fn with_builtin() -> FormatRegistry {
        let mut registry = FormatRegistry::default();
        registry.register(Box::new(CsvFormat));
        registry
    }

    pub fn register(&mut self, format: Box<dyn FileFormat>) {
        self.formats.push(format);
    }

    pub fn formats(&self) -> impl Iterator<Item = &dyn FileFormat> {
        self.formats.iter().map(|f| f.as_ref())
    }

    fn matches(format: &dyn FileFormat, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| format.ext().iter().any(|x| x.eq_ignore_ascii_case(e)))
            .unwrap_or(false)
    }

    /// Loads `path` with the first format that understands it.
    ///
    /// Formats claiming the file's extension are tried first.
    pub fn load(&self, path: &Path) -> Result<Vec<DataArray>> {
        let (preferred, others): (Vec<&dyn FileFormat>, Vec<&dyn FileFormat>) = self
            .formats()
            .filter(|f| f.can_read())
            .partition(|f| Self::matches(*f, path));
        for format in preferred.into_iter().chain(others) {
            match format.read(path) {
                Ok(Some(arrays)) if !arrays.is_empty() => {
                    log::info!("loaded {} array(s) from {} as {}", arrays.len(), path.display(), format.desc());
                    return Ok(arrays);
                }
                Ok(_) => {}
                Err(err) => log::debug!("{} could not read {}: {err}", format.desc(), path.display()),
            }
        }
        Err(TerapyError::FileFormatMismatch(path.display().to_string()))
    }

    /// Saves with the first writable format that claims the extension.
    pub fn save(&self, path: &Path, array: &DataArray, name: Option<&str>) -> Result<()> {
        let format = self
            .formats()
            .find(|f| f.can_save() && Self::matches(*f, path))
            .ok_or_else(|| TerapyError::FileFormatMismatch(path.display().to_string()))?;
        format.save(path, array, name)
    }
}

/// `name [units]` column header.
fn header(axis: &AxisInfo) -> String {
    let units = axis.units.to_string();
    if units.is_empty() {
        axis.name.clone()
    } else {
        format!("{} [{}]", axis.name, units)
    }
}

fn parse_header(text: &str) -> AxisInfo {
    let text = text.trim();
    match (text.rfind(" ["), text.ends_with(']')) {
        (Some(start), true) => AxisInfo::parse(&text[..start], &text[start + 2..text.len() - 1]),
        _ => AxisInfo::dimensionless(text),
    }
}

/// Long-form comma separated values.
///
/// ```text
/// # name: scan
/// # shape: 2 3
/// Position [mm],Delay [ps],Signal [V]
/// 0,0,1.5
/// ...
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct CsvFormat;

impl CsvFormat {
    const EXT: [&'static str; 2] = ["csv", "txt"];
}

impl FileFormat for CsvFormat {
    fn ext(&self) -> &[&'static str] {
        &Self::EXT
    }

    fn desc(&self) -> &str {
        "Comma separated values"
    }

    fn can_read(&self) -> bool {
        true
    }

    fn can_save(&self) -> bool {
        true
    }

    fn read(&self, path: &Path) -> Result<Option<Vec<DataArray>>> {
        let text = std::fs::read_to_string(path)?;
        let mut name = String::new();
        let mut shape: Option<Vec<usize>> = None;
        for line in text.lines().take_while(|l| l.starts_with('#')) {
            let line = line.trim_start_matches('#').trim();
            if let Some(n) = line.strip_prefix("name:") {
                name = n.trim().to_string();
            } else if let Some(s) = line.strip_prefix("shape:") {
                shape = s.split_whitespace().map(|v| v.parse().ok()).collect();
            }
        }

        let mut reader = ReaderBuilder::new()
            .comment(Some(b'#'))
            .has_headers(true)
            .from_reader(text.as_bytes());
        let headers: Vec<AxisInfo> = reader.headers()?.iter().map(parse_header).collect();
        let mut rows: Vec<Vec<f64>> = Vec::new();
        for record in reader.records() {
            let record = record?;
            let row: Option<Vec<f64>> = record.iter().map(|v| v.trim().parse().ok()).collect();
            match row {
                Some(row) => rows.push(row),
                None => return Ok(None),
            }
        }
        if headers.is_empty() || rows.is_empty() {
            return Ok(None);
        }

        let shape = shape.unwrap_or_else(|| vec![rows.len()]);
        let d = shape.len();
        let complex = headers.len() == d + 2;
        if headers.len() != d + 1 && !complex {
            return Ok(None);
        }
        if rows.len() != shape.iter().product::<usize>() || rows.iter().any(|r| r.len() != headers.len()) {
            return Ok(None);
        }

        let mut array = DataArray::new(&shape, headers[..d].to_vec(), headers[d].clone());
        array.name = if name.is_empty() {
            path.file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default()
        } else {
            name
        };
        array.filename = Some(path.to_path_buf());

        let mut values = Vec::with_capacity(rows.len());
        let mut strides = vec![1usize; d];
        for i in (0..d.saturating_sub(1)).rev() {
            strides[i] = strides[i + 1] * shape[i + 1];
        }
        for (r, row) in rows.iter().enumerate() {
            for axis in 0..d {
                let k = (r / strides[axis]) % shape[axis];
                array.coords[axis][k] = row[axis];
            }
            let im = if complex { row[d + 1] } else { 0.0 };
            values.push(Complex64::new(row[d], im));
        }
        array.data = ArrayD::from_shape_vec(IxDyn(&shape), values)
            .map_err(|e| TerapyError::FileFormatMismatch(e.to_string()))?;
        Ok(Some(vec![array]))
    }

    fn save(&self, path: &Path, array: &DataArray, name: Option<&str>) -> Result<()> {
        let mut file = File::create(path)?;
        let name = name.unwrap_or(&array.name);
        writeln!(file, "# name: {name}")?;
        writeln!(
            file,
            "# shape: {}",
            array.shape.iter().map(|s| s.to_string()).collect::<Vec<_>>().join(" ")
        )?;

        let complex = array.data.iter().any(|v| v.im != 0.0 && !v.im.is_nan());
        let mut columns: Vec<String> = array.axes.iter().map(header).collect();
        columns.push(header(&array.input));
        if complex {
            columns.push(format!("{} (imag)", header(&array.input)));
        }

        let mut writer = WriterBuilder::new().has_headers(false).from_writer(file);
        writer.write_record(&columns)?;
        for (index, value) in array.data.indexed_iter() {
            let mut record: Vec<String> = (0..array.dimension())
                .map(|axis| array.coords[axis][index[axis]].to_string())
                .collect();
            record.push(value.re.to_string());
            if complex {
                record.push(value.im.to_string());
            }
            writer.write_record(&record)?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Reads scan positions from a text file: numbers separated by commas, whitespace or newlines.
pub fn read_positions(path: &Path) -> Result<Array1<f64>> {
    let text = std::fs::read_to_string(path)?;
    text.split(|c: char| c == ',' || c == ';' || c.is_whitespace())
        .filter(|t| !t.is_empty())
        .map(|t| {
            t.parse::<f64>()
                .map_err(|_| TerapyError::ConfigParseError(format!("bad position \"{t}\" in {}", path.display())))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use tempfile::tempdir;

    #[test]
    fn csv_round_trip_keeps_shape_coords_and_units() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("scan.csv");
        let mut array = DataArray::new(
            &[2, 3],
            vec![AxisInfo::parse("Position", "mm"), AxisInfo::parse("Delay", "ps")],
            AxisInfo::parse("Signal", "V"),
        );
        array.coords[0] = Array1::from(vec![0.0, 1.0]);
        array.coords[1] = Array1::from(vec![10.0, 20.0, 30.0]);
        array.data = ArrayD::from_shape_fn(IxDyn(&[2, 3]), |i| Complex64::new((i[0] * 3 + i[1]) as f64, 0.0));

        let registry = FormatRegistry::with_builtin();
        registry.save(&path, &array, Some("raster")).unwrap();
        let loaded = registry.load(&path).unwrap();
        let back = &loaded[0];
        assert_eq!(back.name, "raster");
        assert_eq!(back.shape, vec![2, 3]);
        assert_eq!(back.axes[1].name, "Delay");
        assert_eq!(back.axes[1].units.to_string(), "ps");
        assert_eq!(back.input.units.to_string(), "V");
        assert_relative_eq!(back.coords[1][2], 30.0);
        assert_relative_eq!(back.data[IxDyn(&[1, 2])].re, 5.0);
        assert!(back.is_consistent());
    }

    #[test]
    fn complex_values_get_an_imaginary_column() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("spectrum.csv");
        let array = DataArray::from_complex_trace(
            Array1::from(vec![0.5, 1.0]),
            Array1::from(vec![Complex64::new(1.0, -1.0), Complex64::new(0.0, 2.0)]),
            AxisInfo::parse("Frequency", "THz"),
            AxisInfo::parse("Signal", "V*ps"),
        );
        CsvFormat.save(&path, &array, None).unwrap();
        let back = CsvFormat.read(&path).unwrap().unwrap();
        assert_relative_eq!(back[0].data[IxDyn(&[1])].im, 2.0);
        assert_eq!(back[0].input.units.to_string(), "V*ps");
    }

    #[test]
    fn unknown_files_are_a_format_mismatch() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "hello,world\nnot,numbers\n").unwrap();
        let registry = FormatRegistry::with_builtin();
        assert!(matches!(registry.load(&path), Err(TerapyError::FileFormatMismatch(_))));
        assert!(matches!(
            registry.save(&dir.path().join("x.h5"), &DataArray::new(&[1], vec![], AxisInfo::default()), None),
            Err(TerapyError::FileFormatMismatch(_))
        ));
    }

    #[test]
    fn positions_file_accepts_mixed_separators() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("positions.txt");
        std::fs::write(&path, "0, 1.5\n3\n4.5;6").unwrap();
        assert_eq!(read_positions(&path).unwrap().to_vec(), vec![0.0, 1.5, 3.0, 4.5, 6.0]);
    }
}
