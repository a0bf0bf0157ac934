//! CSV persistence for captured spectra.
//!
//! One file per spectrum, header `Wavelength,Intensity`, one row per pixel:
//!
//! - steady state: `spectrum_sample{i}_{HH-MM-SS-mmm}.csv`
//! - degradation: `spectrum_{index:04}_{HH-MM-SS-mmm}.csv`
//!
//! Writing and reading require the `storage_csv` feature (on by default).

use crate::error::{AppResult, DaqError};
use crate::measurement::Spectrum;
use chrono::{DateTime, Local, NaiveTime, Timelike};
use std::path::{Path, PathBuf};

/// Column headers of every spectrum file.
pub const CSV_HEADER: [&str; 2] = ["Wavelength", "Intensity"];

/// File name prefix shared by all spectrum files.
pub const SPECTRUM_PREFIX: &str = "spectrum_";

const TIME_FORMAT: &str = "%H-%M-%S-%3f";

/// A spectrum loaded back from disk.
#[derive(Debug, Clone)]
pub struct StoredSpectrum {
    /// Source file
    pub path: PathBuf,
    /// Time of day encoded in the file name, seconds since midnight
    pub time_of_day_s: Option<f64>,
    /// File contents
    pub spectrum: Spectrum,
}

/// Output directories of one run: `<save_directory>/csv` and `<save_directory>/plots`.
#[derive(Debug, Clone)]
pub struct SpectrumStore {
    csv_dir: PathBuf,
    plot_dir: PathBuf,
}

impl SpectrumStore {
    /// Create both directories below `save_directory`.
    pub fn create(save_directory: &Path) -> AppResult<Self> {
        let csv_dir = save_directory.join("csv");
        let plot_dir = save_directory.join("plots");
        for dir in [&csv_dir, &plot_dir] {
            std::fs::create_dir_all(dir).map_err(|e| {
                DaqError::Storage(format!("cannot create '{}': {}", dir.display(), e))
            })?;
        }
        tracing::info!(csv = %csv_dir.display(), plots = %plot_dir.display(), "output directories ready");
        Ok(Self { csv_dir, plot_dir })
    }

    /// Directory holding spectrum CSV files.
    pub fn csv_dir(&self) -> &Path {
        &self.csv_dir
    }

    /// Directory holding charts.
    pub fn plot_dir(&self) -> &Path {
        &self.plot_dir
    }

    /// Path of a chart file.
    pub fn plot_path(&self, file_name: &str) -> PathBuf {
        self.plot_dir.join(file_name)
    }

    /// Persist a steady-state sample.
    pub fn write_sample(
        &self,
        sample: u32,
        timestamp: &DateTime<Local>,
        spectrum: &Spectrum,
    ) -> AppResult<PathBuf> {
        let path = self.csv_dir.join(sample_file_name(sample, timestamp));
        write_spectrum(&path, spectrum)?;
        Ok(path)
    }

    /// Persist a degradation cycle.
    pub fn write_cycle(
        &self,
        index: u32,
        timestamp: &DateTime<Local>,
        spectrum: &Spectrum,
    ) -> AppResult<PathBuf> {
        let path = self.csv_dir.join(cycle_file_name(index, timestamp));
        write_spectrum(&path, spectrum)?;
        Ok(path)
    }
}

/// `spectrum_sample{i}_{HH-MM-SS-mmm}.csv`
pub fn sample_file_name(sample: u32, timestamp: &DateTime<Local>) -> String {
    format!(
        "{SPECTRUM_PREFIX}sample{sample}_{}.csv",
        timestamp.format(TIME_FORMAT)
    )
}

/// `spectrum_{index:04}_{HH-MM-SS-mmm}.csv`
pub fn cycle_file_name(index: u32, timestamp: &DateTime<Local>) -> String {
    format!(
        "{SPECTRUM_PREFIX}{index:04}_{}.csv",
        timestamp.format(TIME_FORMAT)
    )
}

/// Seconds since midnight from the trailing `HH-MM-SS[-mmm]` of a file stem.
pub fn time_of_day_from_name(path: &Path) -> Option<f64> {
    let stem = path.file_stem()?.to_str()?;
    let parts: Vec<&str> = stem.rsplit('_').take(1).collect();
    let stamp = parts.first()?;
    let time = NaiveTime::parse_from_str(stamp, TIME_FORMAT)
        .or_else(|_| NaiveTime::parse_from_str(stamp, "%H-%M-%S"))
        .ok()?;
    Some(time.num_seconds_from_midnight() as f64 + time.nanosecond() as f64 * 1e-9)
}

/// Write `spectrum` as a two-column CSV file.
pub fn write_spectrum(path: &Path, spectrum: &Spectrum) -> AppResult<()> {
    #[cfg(not(feature = "storage_csv"))]
    {
        let _ = (path, spectrum);
        Err(DaqError::FeatureNotEnabled("storage_csv".to_string()))
    }

    #[cfg(feature = "storage_csv")]
    {
        let mut writer = csv::Writer::from_path(path).map_err(|e| {
            DaqError::Storage(format!("Failed to create CSV file '{}': {}", path.display(), e))
        })?;
        writer
            .write_record(CSV_HEADER)
            .map_err(|e| DaqError::Storage(e.to_string()))?;
        for (wl, value) in spectrum.wavelength().iter().zip(spectrum.intensity()) {
            writer
                .write_record(&[wl.to_string(), value.to_string()])
                .map_err(|e| DaqError::Storage(e.to_string()))?;
        }
        writer
            .flush()
            .map_err(|e| DaqError::Storage(e.to_string()))?;
        tracing::debug!(path = %path.display(), pixels = spectrum.len(), "spectrum saved");
        Ok(())
    }
}

/// Read a spectrum CSV file written by [`write_spectrum`].
pub fn read_spectrum(path: &Path) -> AppResult<Spectrum> {
    #[cfg(not(feature = "storage_csv"))]
    {
        let _ = path;
        Err(DaqError::FeatureNotEnabled("storage_csv".to_string()))
    }

    #[cfg(feature = "storage_csv")]
    {
        let storage_err =
            |msg: String| DaqError::Storage(format!("{}: {}", path.display(), msg));
        let mut reader = csv::Reader::from_path(path).map_err(|e| storage_err(e.to_string()))?;
        let mut wavelength = Vec::new();
        let mut intensity = Vec::new();
        for (row, record) in reader.records().enumerate() {
            let record = record.map_err(|e| storage_err(format!("row {}: {}", row + 1, e)))?;
            let field = |idx: usize| -> AppResult<f64> {
                let raw = record.get(idx).unwrap_or("").trim();
                raw.parse::<f64>().map_err(|_| {
                    storage_err(format!("row {}: '{}' is not a number", row + 1, raw))
                })
            };
            wavelength.push(field(0)?);
            intensity.push(field(1)?);
        }
        Spectrum::new(wavelength, intensity).map_err(|e| storage_err(e.to_string()))
    }
}

/// Load every `<prefix>*.csv` in `dir`, sorted by file name.
pub fn load_series(dir: &Path, prefix: &str) -> AppResult<Vec<StoredSpectrum>> {
    let entries = std::fs::read_dir(dir).map_err(|e| {
        DaqError::Storage(format!("cannot list '{}': {}", dir.display(), e))
    })?;
    let mut paths: Vec<PathBuf> = Vec::new();
    for entry in entries {
        let path = entry?.path();
        let matches = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(prefix) && n.ends_with(".csv"));
        if matches && path.is_file() {
            paths.push(path);
        }
    }
    paths.sort();

    paths
        .into_iter()
        .map(|path| {
            let spectrum = read_spectrum(&path)?;
            Ok(StoredSpectrum {
                time_of_day_s: time_of_day_from_name(&path),
                path,
                spectrum,
            })
        })
        .collect()
}

#[cfg(all(test, feature = "storage_csv"))]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tracing_test::traced_test;

    fn at(h: u32, m: u32, s: u32, ms: u32) -> DateTime<Local> {
        Local
            .with_ymd_and_hms(2024, 5, 17, h, m, s)
            .unwrap()
            + chrono::Duration::milliseconds(ms as i64)
    }

    #[test]
    fn file_names_follow_mode_patterns() {
        let ts = at(14, 3, 9, 42);
        assert_eq!(sample_file_name(2, &ts), "spectrum_sample2_14-03-09-042.csv");
        assert_eq!(cycle_file_name(7, &ts), "spectrum_0007_14-03-09-042.csv");
    }

    #[test]
    fn time_of_day_is_parsed_from_name() {
        let t = time_of_day_from_name(Path::new("spectrum_0003_01-00-02-500.csv")).unwrap();
        assert!((t - 3602.5).abs() < 1e-9);
        assert!(time_of_day_from_name(Path::new("spectrum_notes.csv")).is_none());
    }

    #[test]
    #[traced_test]
    fn written_file_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = SpectrumStore::create(dir.path()).unwrap();
        assert!(logs_contain("output directories ready"));
        let spectrum = Spectrum::new(vec![600.0, 600.5, 601.0], vec![0.0, 12.25, 3.5]).unwrap();
        let path = store.write_cycle(1, &at(9, 0, 0, 0), &spectrum).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("Wavelength,Intensity\n"));
        assert_eq!(read_spectrum(&path).unwrap(), spectrum);
    }

    #[test]
    fn series_is_filtered_and_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let store = SpectrumStore::create(dir.path()).unwrap();
        let s = Spectrum::new(vec![1.0, 2.0], vec![1.0, 2.0]).unwrap();
        store.write_cycle(2, &at(9, 0, 10, 0), &s).unwrap();
        store.write_cycle(1, &at(9, 0, 0, 0), &s).unwrap();
        std::fs::write(store.csv_dir().join("notes.txt"), "x").unwrap();

        let series = load_series(store.csv_dir(), SPECTRUM_PREFIX).unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].time_of_day_s, Some(9.0 * 3600.0));
        assert_eq!(series[1].time_of_day_s, Some(9.0 * 3600.0 + 10.0));
    }
}
