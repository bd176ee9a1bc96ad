//! CSV recording of triangulated points.

use std::path::{Path, PathBuf};

use nalgebra::Point3;
use tracing::info;

use crate::Result;

/// Writes one row per frame: `timestamp,x1,y1,z1,x2,y2,z2,...`.
///
/// The number of columns varies with the number of points visible on each
/// frame, so rows are written with the flexible-length writer configuration.
pub struct CsvRecorder {
    writer: csv::Writer<std::fs::File>,
    path: PathBuf,
    rows: u64,
}

impl CsvRecorder {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = std::fs::File::create(&path)?;
        let writer = csv::WriterBuilder::new()
            .flexible(true)
            .has_headers(false)
            .from_writer(file);
        info!(path = %path.display(), "recording started");
        Ok(Self {
            writer,
            path,
            rows: 0,
        })
    }

    pub fn write_frame(&mut self, time_ms: f64, points: &[Point3<f64>]) -> Result<()> {
        let mut record = Vec::with_capacity(1 + points.len() * 3);
        record.push(time_ms.to_string());
        for pt in points {
            record.push(pt.x.to_string());
            record.push(pt.y.to_string());
            record.push(pt.z.to_string());
        }
        self.writer.write_record(&record)?;
        self.rows += 1;
        Ok(())
    }

    pub fn finish(mut self) -> Result<()> {
        self.writer.flush()?;
        info!(path = %self.path.display(), rows = self.rows, "recording stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_follow_point_count() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.csv");

        let mut recorder = CsvRecorder::create(&path).unwrap();
        recorder
            .write_frame(12.5, &[Point3::new(1.0, 2.0, 3.0)])
            .unwrap();
        recorder
            .write_frame(
                20.0,
                &[Point3::new(1.0, 2.0, 3.0), Point3::new(4.0, 5.0, 6.0)],
            )
            .unwrap();
        recorder.write_frame(27.5, &[]).unwrap();
        recorder.finish().unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "12.5,1,2,3");
        assert_eq!(lines[1], "20,1,2,3,4,5,6");
        assert_eq!(lines[2], "27.5");
    }
}
